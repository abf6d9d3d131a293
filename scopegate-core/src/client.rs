//! Registered OAuth2 clients.
//!
//! The app type is a tagged variant carrying only the fields that type needs.
//! Grant and response types are derived from the tag and are never stored.

use crate::error::AuthorityError;
use crate::scope::Scope;
use crate::store::{Store, StoreBackend, StoreError};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use log::{debug, info};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

/// Android apps cannot register an https redirect, so the implicit flow
/// always targets this URI and the app picks the fragment up locally.
pub const ANDROID_REDIRECT_URI: &str = "http://localhost";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
    Implicit,
    Password,
    ClientCredentials,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Code,
    Token,
}

/// App type of a client together with its type-specific registration data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "app_type", rename_all = "snake_case")]
pub enum AppKind {
    WebBackend {
        redirect_uri: String,
    },
    WebApp {
        redirect_uri: String,
    },
    Android {
        package_name: String,
        key_hash: String,
        start_activity: String,
    },
    /// Reserved. Registration rejects it.
    Ios,
    /// First-party app using the resource owner password grant.
    Owner,
    /// Machine client using the client credentials grant.
    Client,
}

impl AppKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::WebBackend { .. } => "web_backend",
            Self::WebApp { .. } => "web_app",
            Self::Android { .. } => "android",
            Self::Ios => "ios",
            Self::Owner => "owner",
            Self::Client => "client",
        }
    }

    pub fn grant_types(&self) -> &'static [GrantType] {
        match self {
            Self::WebBackend { .. } => &[GrantType::AuthorizationCode, GrantType::RefreshToken],
            Self::WebApp { .. } => &[GrantType::Implicit],
            Self::Android { .. } | Self::Ios => &[GrantType::Implicit, GrantType::RefreshToken],
            // Owner sessions are refreshable when the grant holds the mandatory scope
            Self::Owner => &[GrantType::Password, GrantType::RefreshToken],
            Self::Client => &[GrantType::ClientCredentials],
        }
    }

    pub fn response_types(&self) -> &'static [ResponseType] {
        match self {
            Self::WebBackend { .. } => &[ResponseType::Code, ResponseType::Token],
            _ => &[ResponseType::Token],
        }
    }

    pub fn redirect_uri(&self) -> Option<&str> {
        match self {
            Self::WebBackend { redirect_uri } | Self::WebApp { redirect_uri } => {
                Some(redirect_uri)
            }
            Self::Android { .. } => Some(ANDROID_REDIRECT_URI),
            _ => None,
        }
    }

    /// Public clients present no secret at the token endpoint.
    pub fn is_public(&self) -> bool {
        matches!(self, Self::WebApp { .. } | Self::Android { .. } | Self::Ios)
    }

    pub fn same_type(&self, other: &AppKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub app: AppKind,
    pub scopes: Vec<Scope>,
    #[serde(default)]
    pub trusted: bool,
    secret_hash: String,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("app", &self.app)
            .field("scopes", &self.scopes)
            .field("trusted", &self.trusted)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client with a freshly generated secret. The plaintext secret
    /// is returned once and is not recoverable afterwards.
    pub fn new(
        name: impl Into<String>,
        app: AppKind,
        scopes: Vec<Scope>,
        trusted: bool,
    ) -> (Self, String) {
        let secret = generate_secret();
        let client = Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            app,
            scopes,
            trusted,
            secret_hash: hash_secret(&secret),
            created_at: Utc::now(),
        };
        (client, secret)
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    pub fn is_public(&self) -> bool {
        self.app.is_public()
    }

    pub fn scope_names(&self) -> Vec<String> {
        self.scopes.iter().map(|s| s.name.clone()).collect()
    }

    pub fn allows_grant(&self, grant: GrantType) -> bool {
        self.app.grant_types().contains(&grant)
    }

    pub fn allows_response(&self, response: ResponseType) -> bool {
        self.app.response_types().contains(&response)
    }

    /// Constant-time comparison of the candidate against the stored hash.
    pub fn verify_secret(&self, candidate: &str) -> bool {
        let candidate = hash_secret(candidate);
        candidate
            .as_bytes()
            .ct_eq(self.secret_hash.as_bytes())
            .into()
    }

    fn set_secret(&mut self, secret: &str) {
        self.secret_hash = hash_secret(secret);
    }
}

/// Generates a new 256-bit client secret.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Fields a registration may change. The app type may be replaced only by a
/// value of the same type.
#[derive(Debug, Clone, Default)]
pub struct ClientUpdate {
    pub name: Option<String>,
    pub app: Option<AppKind>,
    pub scopes: Option<Vec<Scope>>,
}

/// Lookup, verification and administration of registered clients.
#[derive(Clone)]
pub struct ClientDirectory {
    store: Store,
}

impl ClientDirectory {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn lookup(&self, id: &str) -> Result<Client, AuthorityError> {
        self.store
            .get_client(id)
            .await?
            .ok_or(AuthorityError::RecordNotFound)
    }

    pub fn verify_secret(client: &Client, candidate: &str) -> bool {
        client.verify_secret(candidate)
    }

    pub fn is_trusted(client: &Client) -> bool {
        client.is_trusted()
    }

    /// Authenticates a client at the token endpoint. Unknown clients and bad
    /// secrets are indistinguishable to the caller. Public clients skip the
    /// secret check.
    pub async fn authenticate(
        &self,
        id: &str,
        secret: Option<&str>,
    ) -> Result<Client, AuthorityError> {
        let client = match self.store.get_client(id).await? {
            Some(client) => client,
            None => {
                debug!("Unknown client {}", id);
                return Err(AuthorityError::InvalidClient);
            }
        };

        if client.is_public() {
            return Ok(client);
        }

        match secret {
            Some(secret) if client.verify_secret(secret) => Ok(client),
            _ => {
                debug!("Secret mismatch for client {}", id);
                Err(AuthorityError::InvalidClient)
            }
        }
    }

    /// Registers a client and returns it along with its plaintext secret.
    pub async fn register(
        &self,
        name: &str,
        app: AppKind,
        scopes: Vec<Scope>,
        trusted: bool,
    ) -> Result<(Client, String), AuthorityError> {
        if matches!(app, AppKind::Ios) {
            return Err(AuthorityError::UnsupportedAppType(app.name().to_string()));
        }

        let (client, secret) = Client::new(name, app, scopes, trusted);
        self.store
            .create_client(&client)
            .await
            .map_err(|err| name_conflict(err, name))?;

        info!(
            "Registered client {} ({}, app type {})",
            client.name,
            client.id,
            client.app.name()
        );
        Ok((client, secret))
    }

    pub async fn update(&self, id: &str, update: ClientUpdate) -> Result<Client, AuthorityError> {
        let mut client = self.lookup(id).await?;

        if let Some(app) = update.app {
            if !client.app.same_type(&app) {
                return Err(AuthorityError::AppTypeImmutable);
            }
            client.app = app;
        }
        if let Some(name) = update.name {
            client.name = name;
        }
        if let Some(scopes) = update.scopes {
            client.scopes = scopes;
        }

        self.store
            .update_client(&client)
            .await
            .map_err(|err| name_conflict(err, &client.name))?;
        Ok(client)
    }

    /// Replaces the client's secret and returns the new plaintext once.
    pub async fn reset_secret(&self, id: &str) -> Result<String, AuthorityError> {
        let mut client = self.lookup(id).await?;
        let secret = generate_secret();
        client.set_secret(&secret);
        self.store.update_client(&client).await?;
        info!("Reset secret of client {}", id);
        Ok(secret)
    }

    /// Deletes the client together with its connections, codes and tokens.
    pub async fn delete(&self, id: &str) -> Result<(), AuthorityError> {
        if self.store.delete_client(id).await? {
            info!("Deleted client {}", id);
            Ok(())
        } else {
            Err(AuthorityError::RecordNotFound)
        }
    }

    pub async fn list(&self) -> Result<Vec<Client>, AuthorityError> {
        Ok(self.store.list_clients().await?)
    }

    pub async fn find_trusted_by_name(&self, name: &str) -> Result<Option<Client>, AuthorityError> {
        Ok(self
            .store
            .list_clients()
            .await?
            .into_iter()
            .find(|c| c.trusted && c.name == name))
    }

    /// Creates or refreshes the trusted owner client named `name`.
    ///
    /// When `secret` is given it becomes the client's secret. When it is not
    /// and the client has to be created, a secret is generated and returned.
    pub async fn ensure_trusted(
        &self,
        name: &str,
        secret: Option<&str>,
        scopes: Vec<Scope>,
    ) -> Result<(Client, Option<String>), AuthorityError> {
        match self.find_trusted_by_name(name).await? {
            Some(mut client) => {
                client.scopes = scopes;
                if let Some(secret) = secret {
                    client.set_secret(secret);
                }
                self.store.update_client(&client).await?;
                Ok((client, None))
            }
            None => {
                let (mut client, generated) = Client::new(name, AppKind::Owner, scopes, true);
                let returned = match secret {
                    Some(secret) => {
                        client.set_secret(secret);
                        None
                    }
                    None => Some(generated),
                };
                self.store
                    .create_client(&client)
                    .await
                    .map_err(|err| name_conflict(err, name))?;
                info!("Created trusted client {} ({})", client.name, client.id);
                Ok((client, returned))
            }
        }
    }
}

fn name_conflict(err: StoreError, name: &str) -> AuthorityError {
    match err {
        StoreError::Conflict(_) => AuthorityError::DuplicateTrustedClientName(name.to_string()),
        StoreError::NotFound => AuthorityError::RecordNotFound,
        other => AuthorityError::Store(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> ClientDirectory {
        ClientDirectory::new(Store::in_memory())
    }

    fn web_backend() -> AppKind {
        AppKind::WebBackend {
            redirect_uri: "https://app.example.com/callback".to_string(),
        }
    }

    #[test]
    fn test_grant_types_follow_app_type() {
        assert_eq!(
            web_backend().grant_types(),
            &[GrantType::AuthorizationCode, GrantType::RefreshToken]
        );
        assert_eq!(AppKind::Owner.grant_types(), &[GrantType::Password, GrantType::RefreshToken]);
        assert_eq!(AppKind::Client.grant_types(), &[GrantType::ClientCredentials]);
        assert_eq!(AppKind::Client.response_types(), &[ResponseType::Token]);
    }

    #[test]
    fn test_android_redirect_is_fixed() {
        let android = AppKind::Android {
            package_name: "com.example".to_string(),
            key_hash: "hash".to_string(),
            start_activity: "com.example.Main".to_string(),
        };
        assert_eq!(android.redirect_uri(), Some(ANDROID_REDIRECT_URI));
        assert!(android.is_public());
        assert!(!web_backend().is_public());
    }

    #[test]
    fn test_app_kind_serialization() {
        let json = serde_json::to_value(web_backend()).unwrap();
        assert_eq!(json["app_type"], "web_backend");
        assert_eq!(json["redirect_uri"], "https://app.example.com/callback");

        let owner: AppKind = serde_json::from_str(r#"{"app_type":"owner"}"#).unwrap();
        assert_eq!(owner, AppKind::Owner);
    }

    #[test]
    fn test_verify_secret() {
        let (client, secret) = Client::new("app", web_backend(), vec![], false);
        assert!(client.verify_secret(&secret));
        assert!(!client.verify_secret("wrong"));
        assert!(!format!("{:?}", client).contains(&client.secret_hash));
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let directory = directory();
        let (client, _) = directory
            .register("gallery", web_backend(), vec![Scope::new("picture")], false)
            .await
            .unwrap();

        let found = directory.lookup(&client.id).await.unwrap();
        assert_eq!(found.name, "gallery");
        assert!(matches!(
            directory.lookup("missing").await,
            Err(AuthorityError::RecordNotFound)
        ));
    }

    #[tokio::test]
    async fn test_register_rejects_ios() {
        let result = directory().register("ios", AppKind::Ios, vec![], false).await;
        assert!(matches!(result, Err(AuthorityError::UnsupportedAppType(_))));
    }

    #[tokio::test]
    async fn test_duplicate_trusted_name_is_rejected() {
        let directory = directory();
        directory
            .register("portal", AppKind::Owner, vec![], true)
            .await
            .unwrap();

        let result = directory.register("portal", web_backend(), vec![], false).await;
        assert!(matches!(
            result,
            Err(AuthorityError::DuplicateTrustedClientName(name)) if name == "portal"
        ));

        // Untrusted clients may share a name with each other.
        directory.register("shared", web_backend(), vec![], false).await.unwrap();
        directory.register("shared", web_backend(), vec![], false).await.unwrap();
        let result = directory.register("shared", AppKind::Owner, vec![], true).await;
        assert!(matches!(result, Err(AuthorityError::DuplicateTrustedClientName(_))));
    }

    #[tokio::test]
    async fn test_reset_secret_invalidates_old_secret() {
        let directory = directory();
        let (client, old_secret) = directory
            .register("gallery", web_backend(), vec![], false)
            .await
            .unwrap();

        let new_secret = directory.reset_secret(&client.id).await.unwrap();
        assert_ne!(old_secret, new_secret);
        assert!(matches!(
            directory.authenticate(&client.id, Some(&old_secret)).await,
            Err(AuthorityError::InvalidClient)
        ));
        assert!(directory.authenticate(&client.id, Some(&new_secret)).await.is_ok());
    }

    #[tokio::test]
    async fn test_authenticate_public_client_without_secret() {
        let directory = directory();
        let (client, _) = directory
            .register(
                "spa",
                AppKind::WebApp {
                    redirect_uri: "https://spa.example.com".to_string(),
                },
                vec![],
                false,
            )
            .await
            .unwrap();

        assert!(directory.authenticate(&client.id, None).await.is_ok());
        assert!(matches!(
            directory.authenticate("unknown", None).await,
            Err(AuthorityError::InvalidClient)
        ));
    }

    #[tokio::test]
    async fn test_update_keeps_app_type() {
        let directory = directory();
        let (client, _) = directory
            .register("gallery", web_backend(), vec![], false)
            .await
            .unwrap();

        let result = directory
            .update(
                &client.id,
                ClientUpdate {
                    app: Some(AppKind::Client),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(AuthorityError::AppTypeImmutable)));

        let updated = directory
            .update(
                &client.id,
                ClientUpdate {
                    app: Some(AppKind::WebBackend {
                        redirect_uri: "https://new.example.com".to_string(),
                    }),
                    scopes: Some(vec![Scope::new("email")]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.app.redirect_uri(), Some("https://new.example.com"));
        assert_eq!(updated.scope_names(), vec!["email"]);
    }

    #[tokio::test]
    async fn test_ensure_trusted_is_idempotent() {
        let directory = directory();
        let (first, generated) = directory
            .ensure_trusted("portal", None, vec![Scope::new("admin")])
            .await
            .unwrap();
        assert!(generated.is_some());
        assert!(first.is_trusted());

        let (second, generated) = directory
            .ensure_trusted("portal", Some("configured"), vec![Scope::new("admin")])
            .await
            .unwrap();
        assert!(generated.is_none());
        assert_eq!(first.id, second.id);
        assert!(directory.authenticate(&second.id, Some("configured")).await.is_ok());
    }
}
