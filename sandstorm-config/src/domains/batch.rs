//! Batch shape and pacing configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_url, Validatable, Violations};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on the blocking thread pool of one process
pub const MAX_THREAD_POOL_SIZE: usize = 1000;

/// Unit counts above this only produce a warning
pub const LARGE_BATCH_WARNING: usize = 100;

/// Batch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Total number of sandboxes driven by the batch
    #[serde(default = "default_unit_count")]
    pub unit_count: usize,

    /// Worker processes to fan out to
    #[serde(default = "default_process_count")]
    pub process_count: usize,

    /// Blocking threads per process; unset means one per unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_pool_size: Option<usize>,

    /// The app package is already mounted inside each sandbox
    #[serde(default = "crate::domains::utils::default_false")]
    pub use_pre_mounted_assets: bool,

    /// Page opened by the browser step
    #[serde(default = "default_browser_url")]
    pub browser_url: String,

    /// Pause after launching the app or opening the browser
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Screen size assumed when the device does not report one
    #[serde(default)]
    pub default_screen: ScreenDimensions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenDimensions {
    pub width: u32,
    pub height: u32,
}

impl Default for ScreenDimensions {
    fn default() -> Self {
        Self {
            width: 720,
            height: 1280,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            unit_count: default_unit_count(),
            process_count: default_process_count(),
            thread_pool_size: None,
            use_pre_mounted_assets: false,
            browser_url: default_browser_url(),
            settle_delay_ms: default_settle_delay_ms(),
            default_screen: ScreenDimensions::default(),
        }
    }
}

impl BatchConfig {
    /// Process count clamped to `[1, unit_count]`
    pub fn effective_process_count(&self) -> usize {
        self.process_count.clamp(1, self.unit_count.max(1))
    }

    /// Configured pool size, or `unit_count` when unset, clamped to
    /// `[1, MAX_THREAD_POOL_SIZE]`
    pub fn effective_thread_pool_size(&self) -> usize {
        self.thread_pool_size
            .unwrap_or(self.unit_count)
            .clamp(1, MAX_THREAD_POOL_SIZE)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Non-fatal oddities worth telling the operator about
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.unit_count > LARGE_BATCH_WARNING {
            warnings.push(format!(
                "unit_count {} is large; make sure the provider quota allows it",
                self.unit_count
            ));
        }
        if self.unit_count > 0 && self.process_count > self.unit_count {
            warnings.push(format!(
                "process_count {} exceeds unit_count {}; {} processes will be used",
                self.process_count,
                self.unit_count,
                self.effective_process_count()
            ));
        }
        if let Some(size) = self.thread_pool_size.filter(|size| *size > MAX_THREAD_POOL_SIZE) {
            warnings.push(format!(
                "thread_pool_size {} is capped at {}",
                size, MAX_THREAD_POOL_SIZE
            ));
        }
        warnings
    }
}

impl Validatable for BatchConfig {
    fn validate(&self) -> ConfigResult<()> {
        let domain = self.domain_name();
        let mut violations = Violations::new();

        violations.check(validate_positive(self.unit_count, "unit_count", domain));
        violations.check(validate_positive(self.process_count, "process_count", domain));
        if let Some(size) = self.thread_pool_size {
            violations.check(validate_positive(size, "thread_pool_size", domain));
        }
        violations.check(validate_url(&self.browser_url, "browser_url", domain));
        if self.default_screen.width == 0 || self.default_screen.height == 0 {
            violations.push(format!(
                "{}: default_screen must be non-zero, got {}x{}",
                domain, self.default_screen.width, self.default_screen.height
            ));
        }

        violations.into_result()
    }

    fn domain_name(&self) -> &'static str {
        "batch"
    }
}

fn default_unit_count() -> usize {
    2
}

fn default_process_count() -> usize {
    2
}

fn default_browser_url() -> String {
    "https://www.tencent.com/zh-cn/".to_string()
}

fn default_settle_delay_ms() -> u64 {
    2000
}
