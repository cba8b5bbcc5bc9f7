//! Configuration loading and environment variable handling

use crate::domains::output::RecordEncodingSetting;
use crate::domains::provider::ProviderKind;
use crate::domains::utils::parse_bool;
use crate::domains::SandstormConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::validation::Violations;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "SANDSTORM".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load `.env` from the working directory. A missing file is not an error.
    pub fn load_dotenv() -> Option<PathBuf> {
        match dotenvy::dotenv() {
            Ok(path) => Some(path),
            Err(e) if e.not_found() => None,
            Err(e) => {
                log::warn!("Ignoring unreadable .env file: {}", e);
                None
            }
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<SandstormConfig> {
        let config = self.read_file(path)?;
        self.finish(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<SandstormConfig> {
        self.finish(SandstormConfig::default())
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<SandstormConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Load without validating, for display and for diagnosing broken setups
    pub fn load_raw(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<SandstormConfig> {
        let mut config = match config_path {
            Some(path) => self.read_file(path)?,
            None => SandstormConfig::default(),
        };
        let mut violations = Violations::new();
        self.apply_env_overrides(&mut config, &mut violations);
        violations.into_result()?;
        Ok(config)
    }

    /// Load a JSON config snapshot written for a worker process. Snapshots
    /// are complete, so the environment is not consulted.
    pub fn from_snapshot(path: impl AsRef<Path>) -> ConfigResult<SandstormConfig> {
        let content = std::fs::read_to_string(path)?;
        let config: SandstormConfig = serde_json::from_str(&content)?;
        config.validate_all()?;
        Ok(config)
    }

    fn read_file(&self, path: impl AsRef<Path>) -> ConfigResult<SandstormConfig> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    fn finish(&self, mut config: SandstormConfig) -> ConfigResult<SandstormConfig> {
        let mut violations = Violations::new();
        self.apply_env_overrides(&mut config, &mut violations);
        violations.check(config.validate_all());
        violations.into_result()?;

        for warning in config.warnings() {
            log::warn!("{}", warning);
        }
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut SandstormConfig, violations: &mut Violations) {
        self.apply_provider_overrides(config, violations);
        self.apply_batch_overrides(config, violations);
        self.apply_retry_overrides(config, violations);
        self.apply_app_overrides(config);
        self.apply_output_overrides(config, violations);
        self.apply_logging_overrides(config, violations);
    }

    /// Apply provider config overrides
    fn apply_provider_overrides(&self, config: &mut SandstormConfig, violations: &mut Violations) {
        let provider = &mut config.provider;

        if let Ok(api_key) = self.get_env_var("API_KEY") {
            provider.api_key = api_key;
        }
        if let Ok(domain) = self.get_env_var("DOMAIN") {
            provider.domain = domain;
        }
        if let Ok(template) = self.get_env_var("TEMPLATE") {
            provider.template = template;
        }
        if let Some(kind) = self.parse_env::<ProviderKind>("PROVIDER", violations) {
            provider.kind = kind;
        }
        if let Some(seconds) = self.parse_env::<u64>("SANDBOX_TIMEOUT", violations) {
            provider.sandbox_timeout = Duration::from_secs(seconds);
        }
    }

    /// Apply batch config overrides
    fn apply_batch_overrides(&self, config: &mut SandstormConfig, violations: &mut Violations) {
        let batch = &mut config.batch;

        if let Some(count) = self.parse_env("UNIT_COUNT", violations) {
            batch.unit_count = count;
        }
        if let Some(count) = self.parse_env("PROCESS_COUNT", violations) {
            batch.process_count = count;
        }
        if let Some(size) = self.parse_env("THREAD_POOL_SIZE", violations) {
            batch.thread_pool_size = Some(size);
        }
        if let Ok(raw) = self.get_env_var("USE_PRE_MOUNTED_ASSETS") {
            match parse_bool(&raw) {
                Some(value) => batch.use_pre_mounted_assets = value,
                None => violations.push(format!(
                    "Invalid {}_USE_PRE_MOUNTED_ASSETS: '{}' is not a boolean",
                    self.prefix, raw
                )),
            }
        }
        if let Some(delay) = self.parse_env("SETTLE_DELAY_MS", violations) {
            batch.settle_delay_ms = delay;
        }
    }

    /// Apply retry config overrides
    fn apply_retry_overrides(&self, config: &mut SandstormConfig, violations: &mut Violations) {
        if let Some(retries) = self.parse_env("MAX_RETRIES", violations) {
            config.retry.max_retries = retries;
        }
        if let Some(delay) = self.parse_env("RETRY_DELAY_MS", violations) {
            config.retry.retry_delay_ms = delay;
        }
    }

    fn apply_app_overrides(&self, config: &mut SandstormConfig) {
        if let Ok(path) = self.get_env_var("APK_PATH") {
            config.app.apk_path = path;
        }
    }

    /// Apply output config overrides
    fn apply_output_overrides(&self, config: &mut SandstormConfig, violations: &mut Violations) {
        if let Ok(dir) = self.get_env_var("OUTPUT_DIR") {
            config.output.directory = PathBuf::from(dir);
        }
        if let Some(encoding) = self.parse_env::<RecordEncodingSetting>("RECORD_ENCODING", violations) {
            config.output.record_encoding = encoding;
        }
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(&self, config: &mut SandstormConfig, violations: &mut Violations) {
        if let Some(level) = self.parse_env("LOG_LEVEL", violations) {
            config.logging.level = level;
        }
        if let Some(format) = self.parse_env("LOG_FORMAT", violations) {
            config.logging.format = format;
        }
    }

    /// Parse a prefixed variable, recording a violation when it is malformed
    fn parse_env<T>(&self, name: &str, violations: &mut Violations) -> Option<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.get_env_var(name).ok()?;
        match raw.trim().parse::<T>() {
            Ok(value) => Some(value),
            Err(e) => {
                violations.absorb(ConfigError::EnvError(format!(
                    "Invalid {}_{}: {}",
                    self.prefix, name, e
                )));
                None
            }
        }
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
