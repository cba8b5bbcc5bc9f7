//! Domain-driven configuration management for Sandstorm
//!
//! This crate provides modular configuration split by functional domains,
//! with collect-all validation, defaults, `.env` support and environment
//! variable overrides.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

// Re-export domain configurations
pub use domains::{
    app::AppConfig,
    batch::{BatchConfig, ScreenDimensions},
    logging::{LogFormat, LogLevel, LoggingConfig},
    output::{OutputConfig, RecordEncodingSetting},
    provider::{ProviderConfig, ProviderKind},
    retry::RetryConfig,
    worker::WorkerAssignment,
    SandstormConfig,
};

// Re-export utilities
pub use domains::utils::serde_duration;
