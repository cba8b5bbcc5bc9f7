//! Core domain models for Sandstorm
//!
//! This crate holds the pieces every other Sandstorm crate agrees on: the
//! per-operation metrics accumulator, the per-unit result record and its
//! durable encodings, the batch report, and the interfaces of the external
//! collaborators (sandbox provisioning and device drivers). It performs no I/O.

pub mod driver;
pub mod error;
pub mod metrics;
pub mod operation;
pub mod provider;
pub mod record;
pub mod report;

// Re-export commonly used types at the crate root
pub use driver::{AppState, DeviceDriver, DriverEndpoint, DriverError, DriverFactory, ScreenSize};
pub use error::{truncate_message, ExternalFailure, HarnessError, HarnessResult};
pub use metrics::{MetricsSummary, OperationMetrics};
pub use operation::OperationKind;
pub use provider::{ProvisionError, SandboxHandle, SandboxProvider};
pub use record::{DetailsDocument, RecordEncoding, RecordSummary, ResultRecord, StoredRecord};
pub use report::{BatchReport, ConfigEcho, RetrySection, RetryStats, RunSummary};

/// Version stamped into every durable document this crate defines.
pub const FORMAT_VERSION: u32 = 1;
