use confique::Config;
use std::path::PathBuf;
use std::time::Duration;

/// Reverse proxy configuration
#[derive(Debug, Config, Clone)]
pub struct GatewayConfig {
    /// JSON routing document. Without it every gateway request is a 404.
    #[config(env = "SCOPEGATE_GATEWAY_SITES_FILE")]
    pub sites_file: Option<PathBuf>,

    /// Timeout for upstream requests in seconds (default: 60)
    #[config(env = "SCOPEGATE_GATEWAY_UPSTREAM_TIMEOUT", default = 60)]
    pub upstream_timeout: u64,

    /// Largest request body forwarded upstream, in bytes (default: 10 MiB)
    #[config(env = "SCOPEGATE_GATEWAY_MAX_BODY_BYTES", default = 10485760)]
    pub max_body_bytes: usize,
}

impl GatewayConfig {
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }
}
