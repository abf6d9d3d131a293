pub(crate) use crate::config::gateway::GatewayConfig;
pub(crate) use crate::config::identity::IdentityConfig;
pub(crate) use crate::config::store::{StoreConfig, StoreKind};
pub(crate) use crate::config::token::TokenConfig;
pub(crate) use crate::config::trusted_client::TrustedClientConfig;
use confique::Config;

pub mod gateway;
pub mod identity;
pub mod store;
pub mod token;
pub mod trusted_client;

/// Optional TOML file merged under the environment (default: scopegate.toml)
const CONFIG_FILE_ENV: &str = "SCOPEGATE_CONFIG_FILE";
const DEFAULT_CONFIG_FILE: &str = "scopegate.toml";

/// Main configuration structure for the scopegate server
#[derive(Debug, Config, Clone)]
pub struct Settings {
    /// The port the server will listen to (default: 8080)
    #[config(env = "SCOPEGATE_PORT", default = 8080)]
    pub port: u16,

    /// Scope every client may request without holding it. Its presence in a
    /// grant is what earns a refresh token (default: "offline").
    #[config(env = "SCOPEGATE_MANDATORY_SCOPE", default = "offline")]
    pub mandatory_scope: String,

    #[config(nested)]
    pub token: TokenConfig,

    #[config(nested)]
    pub store: StoreConfig,

    #[config(nested)]
    pub identity: IdentityConfig,

    #[config(nested)]
    pub trusted_client: TrustedClientConfig,

    #[config(nested)]
    pub gateway: GatewayConfig,
}

impl Settings {
    /// Loads the configuration from environment variables, then the TOML file.
    /// Environment variables take precedence.
    pub fn load() -> Result<Self, confique::Error> {
        let file =
            std::env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::builder().env().file(file).load()
    }

    #[cfg(test)]
    pub fn for_test() -> Self {
        let mut settings = Self::builder()
            .load()
            .expect("Failed to load default settings");
        settings.port = 0; // Let the OS choose a port
        settings.token.issuer = "https://auth.test".to_string();
        settings.token.hmac_secret = Some("test-signing-secret".to_string());
        settings.store.timeout_ms = 1000;
        settings.gateway.upstream_timeout = 5;
        settings
    }
}
