//! Sandbox provisioning service configuration

use crate::error::ConfigResult;
use crate::validation::{
    validate_at_least, validate_port_range, validate_positive, validate_required_string,
    Validatable, Violations,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Minimum idle lifetime accepted for a sandbox
pub const MIN_SANDBOX_TIMEOUT_SECS: u64 = 60;

/// Which provisioning backend drives the batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Remote,
    /// In-process fake, for dry runs and tests
    Simulated,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "remote" => Ok(ProviderKind::Remote),
            "simulated" | "sim" => Ok(ProviderKind::Simulated),
            _ => Err(format!("Invalid provider kind: {}", s)),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Remote => f.write_str("remote"),
            ProviderKind::Simulated => f.write_str("simulated"),
        }
    }
}

/// Provisioning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,

    /// API key sent with every provisioning request
    #[serde(default)]
    pub api_key: String,

    /// Service domain, e.g. `sandbox.example.com`
    #[serde(default)]
    pub domain: String,

    /// Sandbox template to instantiate
    #[serde(default)]
    pub template: String,

    /// Idle lifetime of each sandbox
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_sandbox_timeout")]
    pub sandbox_timeout: Duration,

    /// Port of the device automation server inside the sandbox
    #[serde(default = "default_driver_port")]
    pub driver_port: u16,

    /// HTTP request timeout for provisioning calls
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_request_timeout")]
    pub request_timeout: Duration,

    /// Artificial latency of each simulated call
    #[serde(default = "default_simulated_latency_ms")]
    pub simulated_latency_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            api_key: String::new(),
            domain: String::new(),
            template: String::new(),
            sandbox_timeout: default_sandbox_timeout(),
            driver_port: default_driver_port(),
            request_timeout: default_request_timeout(),
            simulated_latency_ms: default_simulated_latency_ms(),
        }
    }
}

impl ProviderConfig {
    /// Copy with the API key masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.api_key.is_empty() {
            copy.api_key = "***".to_string();
        }
        copy
    }
}

impl Validatable for ProviderConfig {
    fn validate(&self) -> ConfigResult<()> {
        let domain = self.domain_name();
        let mut violations = Violations::new();

        violations.check(validate_required_string(&self.template, "template", domain));
        if self.kind == ProviderKind::Remote {
            violations.check(validate_required_string(&self.api_key, "api_key", domain));
            violations.check(validate_required_string(&self.domain, "domain", domain));
        }
        violations.check(validate_at_least(
            self.sandbox_timeout.as_secs(),
            MIN_SANDBOX_TIMEOUT_SECS,
            "sandbox_timeout",
            domain,
        ));
        violations.check(validate_port_range(self.driver_port, "driver_port", domain));
        violations.check(validate_positive(
            self.request_timeout.as_secs(),
            "request_timeout",
            domain,
        ));

        violations.into_result()
    }

    fn domain_name(&self) -> &'static str {
        "provider"
    }
}

fn default_sandbox_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_driver_port() -> u16 {
    4723
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_simulated_latency_ms() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_defaults() {
        let config = ProviderConfig::default();
        assert_eq!(config.kind, ProviderKind::Remote);
        assert_eq!(config.sandbox_timeout, Duration::from_secs(300));
        assert_eq!(config.driver_port, 4723);
    }

    #[test]
    fn test_remote_requires_credentials() {
        let err = ProviderConfig::default().validate().unwrap_err();
        let messages = err.messages();
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().any(|m| m.contains("api_key")));
        assert!(messages.iter().any(|m| m.contains("domain cannot be empty")));
        assert!(messages.iter().any(|m| m.contains("template")));
    }

    #[test]
    fn test_simulated_needs_only_template() {
        let config = ProviderConfig {
            kind: ProviderKind::Simulated,
            template: "mobile-v1".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_short_sandbox_timeout_rejected() {
        let config = ProviderConfig {
            kind: ProviderKind::Simulated,
            template: "mobile-v1".to_string(),
            sandbox_timeout: Duration::from_secs(59),
            ..Default::default()
        };
        let messages = config.validate().unwrap_err().messages();
        assert_eq!(messages, vec!["provider: sandbox_timeout must be >= 60, got 59"]);
    }

    #[test]
    fn test_redacted_masks_key() {
        let config = ProviderConfig {
            api_key: "secret".to_string(),
            ..Default::default()
        };
        assert_eq!(config.redacted().api_key, "***");
    }
}
