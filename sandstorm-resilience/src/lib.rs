//! Resilience patterns for Sandstorm
//!
//! Retry policies shared by the create phase and every operation step, and
//! the process-wide shutdown supervisor.

pub mod retry;
pub mod shutdown;

// Re-export commonly used types
pub use retry::{RetryExecutor, RetryOutcome, RetryPolicy};
pub use shutdown::{
    ChildExit, ChildProcessSet, ResourceTeardown, ShutdownError, ShutdownSupervisor, TeardownReport,
};
