//! HTTP client configuration

use sandstorm_config::ProviderConfig;
use std::time::Duration;

/// Settings shared by the provisioning and driver clients
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Whole-request timeout
    pub timeout: Duration,

    pub connect_timeout: Duration,

    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("Sandstorm/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl From<&ProviderConfig> for HttpConfig {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            timeout: config.request_timeout,
            ..Default::default()
        }
    }
}
