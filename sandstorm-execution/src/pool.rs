//! Bounded pool for blocking driver calls and runtime builders

use std::any::Any;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::Semaphore;

/// Upper bound for the blocking pool of one process
pub const MAX_POOL_SIZE: usize = 1000;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Blocking pool is closed")]
    Closed,

    #[error("Blocking job panicked: {0}")]
    Panicked(String),

    #[error("Blocking job was cancelled")]
    Cancelled,
}

/// At most `size` blocking jobs run at once; the rest wait for a permit.
#[derive(Debug, Clone)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl BlockingPool {
    pub fn new(size: usize) -> Self {
        let size = size.clamp(1, MAX_POOL_SIZE);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `job` on a blocking thread once a permit is free
    pub async fn run<F, T>(&self, job: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        });

        match handle.await {
            Ok(value) => Ok(value),
            Err(e) if e.is_panic() => Err(PoolError::Panicked(panic_message(e.into_panic()))),
            Err(_) => Err(PoolError::Cancelled),
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Single-threaded runtime for a worker process. Blocking threads are capped
/// at the pool size so the pool is the only source of parallel driver calls.
pub fn build_worker_runtime(pool_size: usize) -> std::io::Result<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .max_blocking_threads(pool_size.clamp(1, MAX_POOL_SIZE))
        .thread_name("sandstorm-worker")
        .build()
}

/// Runtime for a coordinator, which mostly waits on children and files
pub fn build_coordinator_runtime() -> std::io::Result<Runtime> {
    Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("sandstorm-coordinator")
        .build()
}
