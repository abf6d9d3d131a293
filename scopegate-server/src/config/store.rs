use confique::Config;
use serde::Deserialize;
use std::time::Duration;

/// Specifies which storage backend to use
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum StoreKind {
    InMemory,
    Redis,
}

/// Configuration for the storage backend
#[derive(Debug, Config, Clone)]
pub struct StoreConfig {
    /// Store type: "in-memory" or "redis" (default: in-memory)
    #[config(env = "SCOPEGATE_STORE_BACKEND", default = "in-memory")]
    pub backend: StoreKind,

    /// Redis connection URL, required when the backend is "redis"
    #[config(env = "SCOPEGATE_STORE_REDIS_URL", default = "")]
    pub redis_url: String,

    /// Bound on every store operation in milliseconds (default: 5000)
    #[config(env = "SCOPEGATE_STORE_TIMEOUT_MS", default = 5000)]
    pub timeout_ms: u64,
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
