use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use confique::Config;
use std::time::Duration;

/// External identity endpoint that verifies resource owner passwords
#[derive(Debug, Config, Clone)]
pub struct IdentityConfig {
    /// URL the sealed credentials are posted to. Without it, password grants
    /// from untrusted clients are denied.
    #[config(env = "SCOPEGATE_IDENTITY_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Base64 encoded 256-bit key shared with the identity endpoint
    #[config(env = "SCOPEGATE_IDENTITY_SHARED_KEY")]
    pub shared_key: Option<String>,

    /// Request timeout in seconds (default: 5)
    #[config(env = "SCOPEGATE_IDENTITY_TIMEOUT", default = 5)]
    pub timeout_secs: u64,
}

impl IdentityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Decoded shared key, if one is configured.
    pub fn decoded_key(&self) -> Result<Option<Vec<u8>>, base64::DecodeError> {
        self.shared_key
            .as_deref()
            .map(|key| STANDARD.decode(key.trim()))
            .transpose()
    }
}
