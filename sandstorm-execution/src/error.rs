//! Error types for batch execution

use sandstorm_config::ConfigError;
use sandstorm_core::HarnessError;
use thiserror::Error;

use crate::pool::PoolError;

/// Batch execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Worker error: {0}")]
    WorkerError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Harness(#[from] HarnessError),
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;

// Convert from config errors
impl From<ConfigError> for ExecutionError {
    fn from(err: ConfigError) -> Self {
        Self::ConfigurationError(err.to_string())
    }
}
