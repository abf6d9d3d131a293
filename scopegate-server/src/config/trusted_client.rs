use confique::Config;
use scopegate_core::Scope;

/// The first-party owner client created or refreshed at startup
#[derive(Debug, Config, Clone)]
pub struct TrustedClientConfig {
    /// Client name, unique among trusted clients (default: "scopegate")
    #[config(env = "SCOPEGATE_TRUSTED_CLIENT_NAME", default = "scopegate")]
    pub name: String,

    /// Client secret. A secret is generated and printed once when unset.
    #[config(env = "SCOPEGATE_TRUSTED_CLIENT_SECRET")]
    pub secret: Option<String>,

    /// Scopes granted to the client
    /// Comma-separated list (default: "admin")
    #[config(env = "SCOPEGATE_TRUSTED_CLIENT_SCOPES", default = "admin")]
    pub scopes: String,
}

impl TrustedClientConfig {
    /// Get scopes as a vector
    pub fn get_scopes(&self) -> Vec<Scope> {
        self.scopes
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(Scope::new)
            .collect()
    }
}
