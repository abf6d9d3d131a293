use confique::Config;
use std::path::PathBuf;

/// Token issuance configuration
#[derive(Debug, Config, Clone)]
pub struct TokenConfig {
    /// Issuer written into the `iss` claim and checked on validation
    #[config(env = "SCOPEGATE_TOKEN_ISSUER", default = "https://auth.scopegate.local")]
    pub issuer: String,

    /// Access token lifetime in seconds (default: 21600 = 6 hours)
    #[config(env = "SCOPEGATE_TOKEN_ACCESS_TTL", default = 21600)]
    pub access_ttl: u64,

    /// Refresh token lifetime in seconds (default: 2592000 = 30 days)
    #[config(env = "SCOPEGATE_TOKEN_REFRESH_TTL", default = 2592000)]
    pub refresh_ttl: u64,

    /// Authorization code lifetime in seconds (default: 600)
    #[config(env = "SCOPEGATE_TOKEN_CODE_TTL", default = 600)]
    pub code_ttl: u64,

    /// PEM encoded RSA private key used for RS256 signing
    #[config(env = "SCOPEGATE_TOKEN_PRIVATE_KEY_PATH")]
    pub private_key_path: Option<PathBuf>,

    /// PEM encoded RSA public key matching `private_key_path`
    #[config(env = "SCOPEGATE_TOKEN_PUBLIC_KEY_PATH")]
    pub public_key_path: Option<PathBuf>,

    /// HS256 secret, used only when no RSA key pair is configured
    #[config(env = "SCOPEGATE_TOKEN_HMAC_SECRET")]
    pub hmac_secret: Option<String>,
}

impl TokenConfig {
    pub fn access_ttl(&self) -> chrono::Duration {
        seconds(self.access_ttl)
    }

    pub fn refresh_ttl(&self) -> chrono::Duration {
        seconds(self.refresh_ttl)
    }

    pub fn code_ttl(&self) -> chrono::Duration {
        seconds(self.code_ttl)
    }
}

fn seconds(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_token_config() {
        let config = TokenConfig::builder().load().unwrap();
        assert_eq!(config.issuer, "https://auth.scopegate.local");
        assert_eq!(config.access_ttl, 21600);
        assert_eq!(config.refresh_ttl, 2592000);
        assert_eq!(config.code_ttl, 600);
        assert!(config.private_key_path.is_none());
        assert!(config.hmac_secret.is_none());
        assert_eq!(config.access_ttl(), chrono::Duration::hours(6));
    }
}
