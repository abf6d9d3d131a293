use crate::config::{Settings, StoreKind};
use log::{info, warn};
use reqwest::Client;
use scopegate_core::store::memory::InMemoryStore;
use scopegate_core::store::Backend;
use scopegate_core::{
    Authority, BearerValidator, IdentityDelegate, JwtStrategy, SigningStrategy, SiteRouter,
    SiteTable, Store, StoreBackend,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to create store: {0}")]
    Store(#[from] scopegate_core::StoreError),
    #[error("Failed to configure token signing: {0}")]
    Signing(String),
    #[error("Failed to configure identity delegate: {0}")]
    Identity(String),
    #[error("Failed to load sites: {0}")]
    Sites(#[from] scopegate_core::SiteError),
    #[error("Failed to create upstream client: {0}")]
    Upstream(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub authority: Authority,
    pub signer: Arc<dyn SigningStrategy>,
    pub validator: BearerValidator,
    pub sites: Arc<SiteRouter>,
    pub delegate: Option<IdentityDelegate>,
    pub upstream_client: Arc<Client>,
}

impl AppState {
    fn create_upstream_client(timeout: Duration) -> Result<Client, reqwest::Error> {
        Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(2))
            // Redirects belong to the caller, not the gateway
            .redirect(reqwest::redirect::Policy::none())
            // Configure connection pool
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
    }

    pub async fn new(settings: Settings) -> Result<Self, StateError> {
        let store = create_store(&settings).await?;
        let signer = create_signer(&settings)?;
        let sites = match &settings.gateway.sites_file {
            Some(path) => {
                let table = SiteTable::from_file(path)?;
                info!(
                    "Loaded {} sites from {}",
                    table.host_count(),
                    path.display()
                );
                SiteRouter::new(table)
            }
            None => {
                warn!("No sites file configured, the gateway will answer 404");
                SiteRouter::default()
            }
        };
        Self::assemble(settings, store, signer, sites)
    }

    fn assemble(
        settings: Settings,
        store: Store,
        signer: Arc<dyn SigningStrategy>,
        sites: SiteRouter,
    ) -> Result<Self, StateError> {
        let authority = Authority::new(store);
        let delegate = create_delegate(&settings)?;
        let upstream_client = Self::create_upstream_client(settings.gateway.upstream_timeout())?;

        Ok(Self {
            validator: authority.bearer_validator(signer.clone()),
            settings: Arc::new(settings),
            authority,
            signer,
            sites: Arc::new(sites),
            delegate,
            upstream_client: Arc::new(upstream_client),
        })
    }

    /// State backed by an in-memory store and HS256 signing
    #[cfg(test)]
    pub fn for_testing(settings: &Settings) -> Self {
        let secret = settings
            .token
            .hmac_secret
            .clone()
            .unwrap_or_else(|| "test-signing-secret".to_string());
        let signer = Arc::new(JwtStrategy::hs256(
            secret.as_bytes(),
            &settings.token.issuer,
        ));
        let store = Store::new(
            Backend::InMemory(InMemoryStore::new()),
            settings.store.timeout(),
        );
        Self::assemble(settings.clone(), store, signer, SiteRouter::default())
            .expect("Failed to create test state")
    }

    /// Check if all components are healthy
    pub async fn health_check(&self) -> bool {
        match self.authority.store().health_check().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Store health check failed: {}", e);
                false
            }
        }
    }
}

/// Creates the store selected by the configuration
pub async fn create_store(settings: &Settings) -> Result<Store, StateError> {
    let timeout = settings.store.timeout();
    let store = match settings.store.backend {
        StoreKind::InMemory => Store::new(Backend::InMemory(InMemoryStore::new()), timeout),
        StoreKind::Redis => {
            if settings.store.redis_url.is_empty() {
                return Err(StateError::Store(scopegate_core::StoreError::Config(
                    "SCOPEGATE_STORE_REDIS_URL is required for the redis backend".to_string(),
                )));
            }
            Store::redis(&settings.store.redis_url, timeout).await?
        }
    };
    info!("Using {} store", store.backend_name());
    Ok(store)
}

/// RS256 when a key pair is configured, HS256 with the shared secret otherwise
pub fn create_signer(settings: &Settings) -> Result<Arc<dyn SigningStrategy>, StateError> {
    let token = &settings.token;
    match (
        &token.private_key_path,
        &token.public_key_path,
        &token.hmac_secret,
    ) {
        (Some(private_path), Some(public_path), _) => {
            let read = |path: &std::path::Path| {
                std::fs::read(path)
                    .map_err(|e| StateError::Signing(format!("{}: {}", path.display(), e)))
            };
            let strategy =
                JwtStrategy::rs256(&read(private_path)?, &read(public_path)?, &token.issuer)
                    .map_err(|e| StateError::Signing(e.to_string()))?;
            info!("Signing tokens with RS256");
            Ok(Arc::new(strategy))
        }
        (None, None, Some(secret)) if !secret.is_empty() => {
            warn!("Signing tokens with HS256, configure an RSA key pair for production");
            Ok(Arc::new(JwtStrategy::hs256(secret.as_bytes(), &token.issuer)))
        }
        (Some(_), None, _) | (None, Some(_), _) => Err(StateError::Signing(
            "both private and public key paths are required".to_string(),
        )),
        _ => Err(StateError::Signing(
            "no signing key configured, set an RSA key pair or an HMAC secret".to_string(),
        )),
    }
}

fn create_delegate(settings: &Settings) -> Result<Option<IdentityDelegate>, StateError> {
    let identity = &settings.identity;
    let Some(endpoint) = &identity.endpoint else {
        return Ok(None);
    };

    let endpoint = Url::parse(endpoint).map_err(|e| StateError::Identity(e.to_string()))?;
    let key = identity
        .decoded_key()
        .map_err(|e| StateError::Identity(format!("invalid shared key: {e}")))?
        .ok_or_else(|| StateError::Identity("a shared key is required".to_string()))?;

    let delegate = IdentityDelegate::new(endpoint, &key, identity.timeout())
        .map_err(|e| StateError::Identity(e.to_string()))?;
    info!("Delegating password checks to {}", delegate.endpoint());
    Ok(Some(delegate))
}
