//! Batch execution engine for Sandstorm
//!
//! A batch is driven at two levels. [`coordinator::FanOutCoordinator`] splits
//! the units across worker processes and merges what they leave on disk.
//! Inside each process, [`scheduler::BatchScheduler`] starts every unit at
//! once on a single-threaded runtime, routing blocking driver calls through a
//! bounded [`pool::BlockingPool`]. Live sandboxes and drivers are tracked in a
//! [`registry::ResourceRegistry`] so they can be released on shutdown.

pub mod coordinator;
pub mod error;
pub mod operations;
pub mod pool;
pub mod registry;
pub mod scheduler;
pub mod simulated;
pub mod store;
pub mod unit;

pub use coordinator::{
    collect_worker_results, plan_workers, split_units, CollectedResults, CurrentExeLauncher,
    FanOutCoordinator, WorkerLauncher, WorkerPlan,
};
pub use error::{ExecutionError, ExecutionResult};
pub use operations::{push_apk, shell, OperationContext, Step, StepOutput};
pub use pool::{build_coordinator_runtime, build_worker_runtime, BlockingPool, PoolError};
pub use registry::ResourceRegistry;
pub use scheduler::{BatchScheduler, ProcessRun, SchedulerPlan};
pub use simulated::{FaultPlan, SimulatedDriverFactory, SimulatedProvider};
pub use store::ResultStore;
pub use unit::{UnitEnvironment, UnitPhase, UnitSettings, UnitWorker};
