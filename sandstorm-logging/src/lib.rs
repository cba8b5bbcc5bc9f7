//! Logging setup for Sandstorm
//!
//! Every process logs through `tracing`. The coordinator and single-process
//! runs write to stdout, workers write to stderr, and batch runs can mirror
//! everything into `console.log` next to their results.

pub mod init;
pub mod timer;

pub use init::{init_batch_logging, init_simple_tracing, init_worker_tracing, ConsoleTarget, CONSOLE_LOG_FILE};
pub use timer::LocalClock;
