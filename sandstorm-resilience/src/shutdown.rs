//! Process-wide shutdown supervision
//!
//! One [`ShutdownSupervisor`] lives in every Sandstorm process. Its cleanup
//! runs at most once, whichever of normal exit, a termination signal or an
//! unwinding `main` gets there first. A coordinator interrupts its children
//! and escalates to a kill after a deadline; any process that owns live
//! sandboxes tears them down afterwards.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Collective grace period for children after the interrupt
pub const DEFAULT_GRACEFUL_TIMEOUT: Duration = Duration::from_secs(8);

/// Per-child wait after a forced kill
pub const DEFAULT_FORCED_TIMEOUT: Duration = Duration::from_secs(2);

const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shutdown error types
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    /// Cleanup already ran or is running
    #[error("Shutdown already in progress")]
    AlreadyShuttingDown,
}

/// What a teardown pass managed to do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub attempted: usize,
    pub failed: usize,
}

/// Something holding remote resources that must be released on exit
#[async_trait]
pub trait ResourceTeardown: Send + Sync {
    /// Release everything still registered. Never fails; failures are counted.
    async fn teardown_all(&self) -> TeardownReport;

    /// Fallback used when no async runtime is available. Ignores individual failures.
    fn teardown_all_blocking(&self) -> TeardownReport;
}

/// Exit of one child process
#[derive(Debug, Clone, Copy)]
pub struct ChildExit {
    pub worker_id: usize,
    /// `None` when waiting for the child failed
    pub status: Option<ExitStatus>,
}

impl ChildExit {
    pub fn success(&self) -> bool {
        self.status.map(|s| s.success()).unwrap_or(false)
    }
}

/// Worker processes spawned by a coordinator
#[derive(Default)]
pub struct ChildProcessSet {
    children: Mutex<Vec<(usize, Child)>>,
}

impl ChildProcessSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, worker_id: usize, child: Child) {
        self.children.lock().push((worker_id, child));
    }

    pub fn len(&self) -> usize {
        self.children.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.lock().is_empty()
    }

    /// Wait until every child has exited. Children taken over by a
    /// concurrent termination are not reported.
    pub async fn wait_all(&self) -> Vec<ChildExit> {
        let mut exits = Vec::new();
        loop {
            {
                let mut children = self.children.lock();
                children.retain_mut(|(worker_id, child)| match child.try_wait() {
                    Ok(Some(status)) => {
                        exits.push(ChildExit {
                            worker_id: *worker_id,
                            status: Some(status),
                        });
                        false
                    }
                    Ok(None) => true,
                    Err(e) => {
                        warn!("Failed to poll worker {}: {}", worker_id, e);
                        exits.push(ChildExit {
                            worker_id: *worker_id,
                            status: None,
                        });
                        false
                    }
                });
                if children.is_empty() {
                    break;
                }
            }
            tokio::time::sleep(CHILD_POLL_INTERVAL).await;
        }
        exits.sort_by_key(|exit| exit.worker_id);
        exits
    }

    /// Interrupt every child, wait up to `graceful` collectively, kill the
    /// rest and wait up to `forced` for each of them. Returns how many
    /// children had to be killed.
    pub fn terminate_all_blocking(&self, graceful: Duration, forced: Duration) -> usize {
        let mut children = std::mem::take(&mut *self.children.lock());
        if children.is_empty() {
            return 0;
        }

        info!("Interrupting {} worker process(es)", children.len());
        for (worker_id, child) in children.iter_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                interrupt(*worker_id, child);
            }
        }

        let deadline = Instant::now() + graceful;
        loop {
            children.retain_mut(|(_, child)| matches!(child.try_wait(), Ok(None)));
            if children.is_empty() || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(CHILD_POLL_INTERVAL);
        }

        let killed = children.len();
        for (worker_id, child) in children.iter_mut() {
            warn!("Worker {} ignored the interrupt, killing it", worker_id);
            if let Err(e) = child.kill() {
                error!("Failed to kill worker {}: {}", worker_id, e);
                continue;
            }
            let deadline = Instant::now() + forced;
            while matches!(child.try_wait(), Ok(None)) && Instant::now() < deadline {
                std::thread::sleep(CHILD_POLL_INTERVAL);
            }
        }
        killed
    }
}

#[cfg(unix)]
fn interrupt(worker_id: usize, child: &mut Child) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(child.id() as i32);
    if let Err(e) = signal::kill(pid, Signal::SIGINT) {
        warn!("Failed to send SIGINT to worker {}: {}", worker_id, e);
    }
}

#[cfg(not(unix))]
fn interrupt(worker_id: usize, child: &mut Child) {
    // No graceful interrupt available; the forced phase follows
    debug!("Cannot interrupt worker {} on this platform", worker_id);
    let _ = child;
}

/// Process-wide, at-most-once cleanup
pub struct ShutdownSupervisor {
    started: AtomicBool,
    children: Arc<ChildProcessSet>,
    resources: Mutex<Option<Arc<dyn ResourceTeardown>>>,
    graceful_timeout: Duration,
    forced_timeout: Duration,
}

impl ShutdownSupervisor {
    pub fn new() -> Self {
        Self::with_timeouts(DEFAULT_GRACEFUL_TIMEOUT, DEFAULT_FORCED_TIMEOUT)
    }

    pub fn with_timeouts(graceful_timeout: Duration, forced_timeout: Duration) -> Self {
        Self {
            started: AtomicBool::new(false),
            children: Arc::new(ChildProcessSet::new()),
            resources: Mutex::new(None),
            graceful_timeout,
            forced_timeout,
        }
    }

    /// Children this process is responsible for
    pub fn children(&self) -> &Arc<ChildProcessSet> {
        &self.children
    }

    /// Register the owner of this process's remote resources
    pub fn attach_resources(&self, resources: Arc<dyn ResourceTeardown>) {
        *self.resources.lock() = Some(resources);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn begin(&self) -> Result<(), ShutdownError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ShutdownError::AlreadyShuttingDown);
        }
        Ok(())
    }

    /// Run cleanup on the async runtime
    pub async fn cleanup(&self) -> Result<(), ShutdownError> {
        self.begin()?;
        debug!("Running shutdown cleanup");

        if !self.children.is_empty() {
            let children = self.children.clone();
            let (graceful, forced) = (self.graceful_timeout, self.forced_timeout);
            match tokio::task::spawn_blocking(move || children.terminate_all_blocking(graceful, forced))
                .await
            {
                Ok(killed) if killed > 0 => warn!("{} worker process(es) were killed", killed),
                Ok(_) => {}
                Err(e) => error!("Worker termination task failed: {}", e),
            }
        }

        let resources = self.resources.lock().clone();
        if let Some(resources) = resources {
            log_report(resources.teardown_all().await);
        }
        Ok(())
    }

    /// Run cleanup without an async runtime
    pub fn cleanup_blocking(&self) -> Result<(), ShutdownError> {
        self.begin()?;
        debug!("Running blocking shutdown cleanup");

        let killed = self
            .children
            .terminate_all_blocking(self.graceful_timeout, self.forced_timeout);
        if killed > 0 {
            warn!("{} worker process(es) were killed", killed);
        }

        let resources = self.resources.lock().clone();
        if let Some(resources) = resources {
            log_report(resources.teardown_all_blocking());
        }
        Ok(())
    }

    /// On SIGINT or SIGTERM run cleanup, then exit the process with status 0
    pub fn spawn_signal_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            wait_for_termination().await;
            warn!("Termination signal received, cleaning up");
            if let Err(e) = supervisor.cleanup().await {
                debug!("Cleanup skipped: {}", e);
            }
            std::process::exit(0);
        })
    }
}

impl Default for ShutdownSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn log_report(report: TeardownReport) {
    if report.attempted == 0 {
        return;
    }
    if report.failed > 0 {
        warn!(
            "Released {} of {} resource(s); {} failed",
            report.attempted - report.failed,
            report.attempted,
            report.failed
        );
    } else {
        info!("Released {} resource(s)", report.attempted);
    }
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingTeardown {
        async_calls: AtomicUsize,
        blocking_calls: AtomicUsize,
    }

    #[async_trait]
    impl ResourceTeardown for CountingTeardown {
        async fn teardown_all(&self) -> TeardownReport {
            self.async_calls.fetch_add(1, Ordering::SeqCst);
            TeardownReport {
                attempted: 2,
                failed: 1,
            }
        }

        fn teardown_all_blocking(&self) -> TeardownReport {
            self.blocking_calls.fetch_add(1, Ordering::SeqCst);
            TeardownReport::default()
        }
    }

    #[tokio::test]
    async fn test_cleanup_runs_once() {
        let supervisor = ShutdownSupervisor::new();
        let resources = Arc::new(CountingTeardown::default());
        supervisor.attach_resources(resources.clone());

        assert!(supervisor.cleanup().await.is_ok());
        assert!(matches!(
            supervisor.cleanup().await,
            Err(ShutdownError::AlreadyShuttingDown)
        ));
        assert!(matches!(
            supervisor.cleanup_blocking(),
            Err(ShutdownError::AlreadyShuttingDown)
        ));

        assert_eq!(resources.async_calls.load(Ordering::SeqCst), 1);
        assert_eq!(resources.blocking_calls.load(Ordering::SeqCst), 0);
        assert!(supervisor.is_shutting_down());
    }

    #[test]
    fn test_blocking_cleanup_without_runtime() {
        let supervisor = ShutdownSupervisor::new();
        let resources = Arc::new(CountingTeardown::default());
        supervisor.attach_resources(resources.clone());

        assert!(supervisor.cleanup_blocking().is_ok());
        assert_eq!(resources.blocking_calls.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_all_reports_exit_codes() {
        let set = ChildProcessSet::new();
        set.push(1, std::process::Command::new("false").spawn().unwrap());
        set.push(0, std::process::Command::new("true").spawn().unwrap());

        let exits = set.wait_all().await;
        assert_eq!(exits.len(), 2);
        assert_eq!(exits[0].worker_id, 0);
        assert!(exits[0].success());
        assert!(!exits[1].success());
        assert!(set.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_interrupts_children() {
        let set = ChildProcessSet::new();
        set.push(0, std::process::Command::new("sleep").arg("30").spawn().unwrap());

        let started = Instant::now();
        let killed = set.terminate_all_blocking(Duration::from_secs(5), Duration::from_secs(1));

        assert_eq!(killed, 0);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(set.is_empty());
    }
}
