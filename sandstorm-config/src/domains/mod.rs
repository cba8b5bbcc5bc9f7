//! Domain-specific configuration modules

pub mod app;
pub mod batch;
pub mod logging;
pub mod output;
pub mod provider;
pub mod retry;
pub mod utils;
pub mod worker;

use crate::error::ConfigResult;
use crate::validation::{Validatable, Violations};
use serde::{Deserialize, Serialize};

/// Main Sandstorm configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SandstormConfig {
    /// Sandbox provisioning service
    #[serde(default)]
    pub provider: provider::ProviderConfig,

    /// Batch shape and pacing
    #[serde(default)]
    pub batch: batch::BatchConfig,

    /// Create-phase and per-operation retries
    #[serde(default)]
    pub retry: retry::RetryConfig,

    /// App profile driven on each device
    #[serde(default)]
    pub app: app::AppConfig,

    /// Result files
    #[serde(default)]
    pub output: output::OutputConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,

    /// Present only in the snapshot handed to a worker process
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<worker::WorkerAssignment>,
}

impl SandstormConfig {
    /// Validate all domain configurations, collecting every violation
    pub fn validate_all(&self) -> ConfigResult<()> {
        let mut violations = Violations::new();

        violations.check(self.provider.validate());
        violations.check(self.batch.validate());
        violations.check(self.retry.validate());
        violations.check(self.app.validate());
        violations.check(self.output.validate());
        violations.check(self.logging.validate());

        if let Some(worker) = &self.worker {
            if worker.process_count == 0 {
                violations.push("worker: process_count must be greater than 0");
            }
        }

        violations.into_result()
    }

    /// Non-fatal findings, logged by the loader
    pub fn warnings(&self) -> Vec<String> {
        self.batch.warnings()
    }

    /// Whether this process is the only one in its batch
    pub fn is_sole_process(&self) -> bool {
        match &self.worker {
            Some(assignment) => assignment.is_sole_process(),
            None => self.batch.effective_process_count() <= 1,
        }
    }

    /// Copy with secrets masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.provider = self.provider.redacted();
        copy
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let mut config = SandstormConfig::default();
        config.provider.api_key = "your-api-key".to_string();
        config.provider.domain = "sandbox.example.com".to_string();
        config.provider.template = "mobile-v1".to_string();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
