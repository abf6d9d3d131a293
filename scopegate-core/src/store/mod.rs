use crate::client::Client;
use crate::connection::Connection;
use crate::credential::{AuthorizationCode, TokenRecord};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod redis;

/// Bound applied to every store operation unless configured otherwise.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,
    #[error("Record already exists: {0}")]
    Duplicate(String),
    #[error("Conflicting record: {0}")]
    Conflict(String),
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Redis error: {0}")]
    Redis(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Persistence contract for clients, connections and credentials.
///
/// Every method is one atomic unit in the backing store. The compound
/// operations [`exchange_code`](Self::exchange_code) and
/// [`rotate_refresh`](Self::rotate_refresh) delete the consumed record and
/// create its successors together: when the consumed record is missing they
/// fail with [`StoreError::NotFound`] and write nothing, and when a successor
/// signature is already taken they fail with [`StoreError::Duplicate`] and
/// delete nothing.
#[async_trait::async_trait]
pub trait StoreBackend: Send + Sync {
    /// Fails with `Conflict` when the name is shared with a trusted client,
    /// or when a trusted client reuses a taken name.
    async fn create_client(&self, client: &Client) -> Result<(), StoreError>;

    /// Same name rules as [`create_client`](Self::create_client).
    async fn update_client(&self, client: &Client) -> Result<(), StoreError>;

    async fn get_client(&self, id: &str) -> Result<Option<Client>, StoreError>;

    async fn list_clients(&self) -> Result<Vec<Client>, StoreError>;

    /// Removes the client and every connection, code and token issued to it.
    async fn delete_client(&self, id: &str) -> Result<bool, StoreError>;

    /// Creates or merges the connection of the pair.
    async fn merge_connection(
        &self,
        client_id: &str,
        user_id: &str,
        scopes: &[String],
    ) -> Result<Connection, StoreError>;

    async fn get_connection(&self, id: &str) -> Result<Option<Connection>, StoreError>;

    async fn list_connections(&self, user_id: &str) -> Result<Vec<Connection>, StoreError>;

    async fn delete_connection(&self, id: &str) -> Result<bool, StoreError>;

    async fn create_code(&self, code: &AuthorizationCode) -> Result<(), StoreError>;

    async fn get_code(&self, signature: &str) -> Result<Option<AuthorizationCode>, StoreError>;

    async fn delete_code(&self, signature: &str) -> Result<bool, StoreError>;

    async fn create_token(&self, token: &TokenRecord) -> Result<(), StoreError>;

    async fn get_token(&self, signature: &str) -> Result<Option<TokenRecord>, StoreError>;

    async fn delete_token(&self, signature: &str) -> Result<bool, StoreError>;

    /// Stores all records or none of them. A taken signature fails the whole
    /// call with `Duplicate`.
    async fn create_tokens(&self, issued: &[TokenRecord]) -> Result<(), StoreError>;

    async fn exchange_code(
        &self,
        code_signature: &str,
        issued: &[TokenRecord],
    ) -> Result<(), StoreError>;

    async fn rotate_refresh(
        &self,
        old_signature: &str,
        issued: &[TokenRecord],
    ) -> Result<(), StoreError>;

    /// Returns Ok(()) if healthy, or Err with a descriptive message if unhealthy.
    async fn health_check(&self) -> Result<(), String>;
}

#[derive(Clone)]
pub enum Backend {
    /// Process-local tables, for tests and single-instance deployments
    InMemory(memory::InMemoryStore),
    /// Redis-backed store shared between instances
    Redis(redis::RedisStore),
}

/// Store handle dispatching to the configured backend.
///
/// Every operation is bounded by the operation timeout; exceeding it yields
/// [`StoreError::Timeout`], which callers treat as retryable.
#[derive(Clone)]
pub struct Store {
    backend: Backend,
    timeout: Duration,
}

macro_rules! dispatch {
    ($self:ident, $backend:ident => $call:expr) => {
        $self
            .bounded(async {
                match &$self.backend {
                    Backend::InMemory($backend) => $call.await,
                    Backend::Redis($backend) => $call.await,
                }
            })
            .await
    };
}

impl Store {
    pub fn new(backend: Backend, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn in_memory() -> Self {
        Self::new(
            Backend::InMemory(memory::InMemoryStore::new()),
            DEFAULT_OPERATION_TIMEOUT,
        )
    }

    pub async fn redis(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let store = redis::RedisStore::new(url).await.map_err(StoreError::Config)?;
        Ok(Self::new(Backend::Redis(store), timeout))
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::InMemory(_) => "in-memory",
            Backend::Redis(_) => "redis",
        }
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.timeout, operation)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}

#[async_trait::async_trait]
impl StoreBackend for Store {
    async fn create_client(&self, client: &Client) -> Result<(), StoreError> {
        dispatch!(self, store => store.create_client(client))
    }

    async fn update_client(&self, client: &Client) -> Result<(), StoreError> {
        dispatch!(self, store => store.update_client(client))
    }

    async fn get_client(&self, id: &str) -> Result<Option<Client>, StoreError> {
        dispatch!(self, store => store.get_client(id))
    }

    async fn list_clients(&self) -> Result<Vec<Client>, StoreError> {
        dispatch!(self, store => store.list_clients())
    }

    async fn delete_client(&self, id: &str) -> Result<bool, StoreError> {
        dispatch!(self, store => store.delete_client(id))
    }

    async fn merge_connection(
        &self,
        client_id: &str,
        user_id: &str,
        scopes: &[String],
    ) -> Result<Connection, StoreError> {
        dispatch!(self, store => store.merge_connection(client_id, user_id, scopes))
    }

    async fn get_connection(&self, id: &str) -> Result<Option<Connection>, StoreError> {
        dispatch!(self, store => store.get_connection(id))
    }

    async fn list_connections(&self, user_id: &str) -> Result<Vec<Connection>, StoreError> {
        dispatch!(self, store => store.list_connections(user_id))
    }

    async fn delete_connection(&self, id: &str) -> Result<bool, StoreError> {
        dispatch!(self, store => store.delete_connection(id))
    }

    async fn create_code(&self, code: &AuthorizationCode) -> Result<(), StoreError> {
        dispatch!(self, store => store.create_code(code))
    }

    async fn get_code(&self, signature: &str) -> Result<Option<AuthorizationCode>, StoreError> {
        dispatch!(self, store => store.get_code(signature))
    }

    async fn delete_code(&self, signature: &str) -> Result<bool, StoreError> {
        dispatch!(self, store => store.delete_code(signature))
    }

    async fn create_token(&self, token: &TokenRecord) -> Result<(), StoreError> {
        dispatch!(self, store => store.create_token(token))
    }

    async fn get_token(&self, signature: &str) -> Result<Option<TokenRecord>, StoreError> {
        dispatch!(self, store => store.get_token(signature))
    }

    async fn delete_token(&self, signature: &str) -> Result<bool, StoreError> {
        dispatch!(self, store => store.delete_token(signature))
    }

    async fn create_tokens(&self, issued: &[TokenRecord]) -> Result<(), StoreError> {
        dispatch!(self, store => store.create_tokens(issued))
    }

    async fn exchange_code(
        &self,
        code_signature: &str,
        issued: &[TokenRecord],
    ) -> Result<(), StoreError> {
        dispatch!(self, store => store.exchange_code(code_signature, issued))
    }

    async fn rotate_refresh(
        &self,
        old_signature: &str,
        issued: &[TokenRecord],
    ) -> Result<(), StoreError> {
        dispatch!(self, store => store.rotate_refresh(old_signature, issued))
    }

    async fn health_check(&self) -> Result<(), String> {
        let operation = async {
            match &self.backend {
                Backend::InMemory(store) => store.health_check().await,
                Backend::Redis(store) => store.health_check().await,
            }
        };
        tokio::time::timeout(self.timeout, operation)
            .await
            .unwrap_or_else(|_| Err(format!("Store health check timed out after {:?}", self.timeout)))
    }
}
