//! Live remote resources owned by one process

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use sandstorm_core::{DeviceDriver, ExternalFailure, SandboxHandle};
use sandstorm_resilience::{ResourceTeardown, TeardownReport};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

#[derive(Default)]
struct RegistryState {
    sandboxes: HashMap<usize, Arc<dyn SandboxHandle>>,
    drivers: HashMap<usize, Arc<dyn DeviceDriver>>,
    cleanup_done: bool,
}

impl RegistryState {
    fn drain(&mut self) -> Option<(Vec<(usize, Arc<dyn DeviceDriver>)>, Vec<(usize, Arc<dyn SandboxHandle>)>)> {
        if self.cleanup_done {
            return None;
        }
        self.cleanup_done = true;
        let mut drivers: Vec<_> = self.drivers.drain().collect();
        let mut sandboxes: Vec<_> = self.sandboxes.drain().collect();
        drivers.sort_by_key(|(id, _)| *id);
        sandboxes.sort_by_key(|(id, _)| *id);
        Some((drivers, sandboxes))
    }
}

/// Sandboxes and drivers that are live and not yet unregistered, keyed by unit id.
///
/// Every mutation happens under one lock that is never held across an await
/// point. Bulk teardown runs at most once.
#[derive(Default)]
pub struct ResourceRegistry {
    state: Mutex<RegistryState>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_sandbox(&self, unit_id: usize, sandbox: Arc<dyn SandboxHandle>) {
        let mut state = self.state.lock();
        if state.cleanup_done {
            warn!("[unit {:>2}] Sandbox {} registered after cleanup", unit_id, sandbox.id());
        }
        state.sandboxes.insert(unit_id, sandbox);
    }

    pub fn register_driver(&self, unit_id: usize, driver: Arc<dyn DeviceDriver>) {
        self.state.lock().drivers.insert(unit_id, driver);
    }

    /// Forget both resources of a unit
    pub fn unregister(&self, unit_id: usize) {
        let mut state = self.state.lock();
        state.sandboxes.remove(&unit_id);
        state.drivers.remove(&unit_id);
    }

    /// (sandboxes, drivers) currently registered
    pub fn live_counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.sandboxes.len(), state.drivers.len())
    }

    pub fn cleanup_done(&self) -> bool {
        self.state.lock().cleanup_done
    }

    /// Kill every sandbox while the drivers quit on their own threads. A
    /// second call is a no-op.
    ///
    /// Only async calls and dedicated threads are used, so teardown never
    /// waits for a blocking-pool slot held by an in-flight unit.
    pub async fn cleanup_all(&self) -> TeardownReport {
        let drained = self.state.lock().drain();
        let Some((drivers, sandboxes)) = drained else {
            debug!("Registry cleanup already done");
            return TeardownReport::default();
        };
        if drivers.is_empty() && sandboxes.is_empty() {
            return TeardownReport::default();
        }
        info!(
            "Cleaning up {} driver(s) and {} sandbox(es)",
            drivers.len(),
            sandboxes.len()
        );

        let attempted = drivers.len() + sandboxes.len();
        let quits: Vec<_> = drivers
            .into_iter()
            .map(|(unit_id, driver)| quit_on_thread(unit_id, driver))
            .collect();
        let kills = sandboxes
            .into_iter()
            .map(|(unit_id, sandbox)| kill_sandbox(unit_id, sandbox));

        let (killed, quit) = tokio::join!(
            join_all(kills),
            join_all(quits.into_iter().map(|done| async move { done.await.unwrap_or(false) }))
        );
        let failed = killed.iter().chain(quit.iter()).filter(|ok| !**ok).count();

        TeardownReport { attempted, failed }
    }

    /// Teardown without a usable async runtime. Sandboxes are killed on a
    /// private runtime in a helper thread while the drivers quit here;
    /// individual failures are ignored.
    pub fn cleanup_all_blocking(&self) -> TeardownReport {
        let drained = self.state.lock().drain();
        let Some((drivers, sandboxes)) = drained else {
            return TeardownReport::default();
        };
        let attempted = drivers.len() + sandboxes.len();
        let mut failed = 0;

        let count = sandboxes.len();
        let killer = (count > 0).then(|| {
            std::thread::spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        debug!("Cannot build cleanup runtime: {}", e);
                        return count;
                    }
                };
                runtime.block_on(async {
                    let kills = sandboxes
                        .into_iter()
                        .map(|(unit_id, sandbox)| kill_sandbox(unit_id, sandbox));
                    join_all(kills).await.into_iter().filter(|ok| !ok).count()
                })
            })
        });

        for (unit_id, driver) in drivers {
            if let Err(e) = driver.quit() {
                debug!("[unit {:>2}] Driver quit failed: {}", unit_id, e);
                failed += 1;
            }
        }

        if let Some(killer) = killer {
            failed += killer.join().unwrap_or(count);
        }

        TeardownReport { attempted, failed }
    }
}

/// Quit a driver on a thread of its own; the receiver yields whether it succeeded
fn quit_on_thread(unit_id: usize, driver: Arc<dyn DeviceDriver>) -> oneshot::Receiver<bool> {
    let (done, receiver) = oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name(format!("sandstorm-quit-{}", unit_id))
        .spawn(move || {
            let ok = match driver.quit() {
                Ok(()) => true,
                Err(e) => {
                    warn!("[unit {:>2}] Driver quit failed: {}", unit_id, e.describe());
                    false
                }
            };
            let _ = done.send(ok);
        });
    if let Err(e) = spawned {
        warn!("[unit {:>2}] Cannot start driver quit thread: {}", unit_id, e);
    }
    receiver
}

async fn kill_sandbox(unit_id: usize, sandbox: Arc<dyn SandboxHandle>) -> bool {
    match sandbox.kill().await {
        Ok(()) => {
            debug!("[unit {:>2}] Sandbox {} killed", unit_id, sandbox.id());
            true
        }
        Err(e) => {
            warn!(
                "[unit {:>2}] Failed to kill sandbox {}: {}",
                unit_id,
                sandbox.id(),
                e.describe()
            );
            false
        }
    }
}

#[async_trait]
impl ResourceTeardown for ResourceRegistry {
    async fn teardown_all(&self) -> TeardownReport {
        self.cleanup_all().await
    }

    fn teardown_all_blocking(&self) -> TeardownReport {
        self.cleanup_all_blocking()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{FaultPlan, SimulatedDriverFactory, SimulatedProvider};
    use crate::pool::{build_worker_runtime, BlockingPool};
    use sandstorm_core::{DriverEndpoint, DriverFactory, SandboxProvider};
    use std::time::{Duration, Instant};

    async fn live_unit(
        registry: &ResourceRegistry,
        provider: &SimulatedProvider,
        drivers: &SimulatedDriverFactory,
        unit_id: usize,
    ) {
        let sandbox = provider.create("mobile-v1", Duration::from_secs(300)).await.unwrap();
        let driver = drivers
            .connect(&DriverEndpoint {
                url: sandbox.endpoint(4723),
                access_token: sandbox.access_token(),
            })
            .unwrap();
        registry.register_sandbox(unit_id, sandbox);
        registry.register_driver(unit_id, driver);
    }

    #[tokio::test]
    async fn test_unregister_removes_both_resources() {
        let registry = ResourceRegistry::new();
        let provider = SimulatedProvider::new(Duration::ZERO, FaultPlan::default());
        let drivers = SimulatedDriverFactory::new(Duration::ZERO, FaultPlan::default());

        live_unit(&registry, &provider, &drivers, 0).await;
        live_unit(&registry, &provider, &drivers, 1).await;
        assert_eq!(registry.live_counts(), (2, 2));

        registry.unregister(0);
        assert_eq!(registry.live_counts(), (1, 1));
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let registry = ResourceRegistry::new();
        let provider = SimulatedProvider::new(Duration::ZERO, FaultPlan::default());
        let drivers = SimulatedDriverFactory::new(Duration::ZERO, FaultPlan::default());
        live_unit(&registry, &provider, &drivers, 3).await;

        let first = registry.cleanup_all().await;
        assert_eq!(first, TeardownReport { attempted: 2, failed: 0 });
        assert_eq!(provider.kills(), 1);
        assert_eq!(drivers.quits(), 1);

        let second = registry.cleanup_all().await;
        assert_eq!(second, TeardownReport::default());
        assert_eq!(provider.kills(), 1);
        assert!(registry.cleanup_done());
    }

    #[test]
    fn test_blocking_cleanup_kills_sandboxes() {
        let registry = ResourceRegistry::new();
        let provider = SimulatedProvider::new(Duration::ZERO, FaultPlan::default());
        let drivers = SimulatedDriverFactory::new(Duration::ZERO, FaultPlan::default());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(live_unit(&registry, &provider, &drivers, 0));
        drop(runtime);

        let report = registry.cleanup_all_blocking();
        assert_eq!(report.attempted, 2);
        assert_eq!(provider.kills(), 1);
        assert_eq!(provider.live_sandboxes(), 0);
        assert_eq!(registry.cleanup_all_blocking(), TeardownReport::default());
    }

    #[test]
    fn test_cleanup_does_not_wait_for_busy_pool() {
        let runtime = build_worker_runtime(1).unwrap();
        let registry = ResourceRegistry::new();
        let provider = SimulatedProvider::new(Duration::ZERO, FaultPlan::default());
        let drivers = SimulatedDriverFactory::new(Duration::ZERO, FaultPlan::default());
        let pool = BlockingPool::new(1);

        let (report, elapsed) = runtime.block_on(async {
            live_unit(&registry, &provider, &drivers, 0).await;

            // An in-flight unit holds the only blocking thread
            let (started_tx, started_rx) = oneshot::channel();
            let busy = pool.clone();
            let _busy = tokio::spawn(async move {
                busy.run(move || {
                    let _ = started_tx.send(());
                    std::thread::sleep(Duration::from_secs(3));
                })
                .await
            });
            started_rx.await.unwrap();

            let started = Instant::now();
            let report = registry.cleanup_all().await;
            (report, started.elapsed())
        });
        runtime.shutdown_background();

        assert!(elapsed < Duration::from_secs(1), "cleanup took {:?}", elapsed);
        assert_eq!(report, TeardownReport { attempted: 2, failed: 0 });
        assert_eq!(provider.kills(), 1);
        assert_eq!(drivers.quits(), 1);
    }

    #[tokio::test]
    async fn test_failed_kills_are_counted_and_drivers_still_quit() {
        let registry = ResourceRegistry::new();
        let provider = SimulatedProvider::new(
            Duration::ZERO,
            FaultPlan {
                failing_kills: true,
                ..Default::default()
            },
        );
        let drivers = SimulatedDriverFactory::new(Duration::ZERO, FaultPlan::default());
        live_unit(&registry, &provider, &drivers, 0).await;
        live_unit(&registry, &provider, &drivers, 1).await;

        let report = registry.cleanup_all().await;

        assert_eq!(report, TeardownReport { attempted: 4, failed: 2 });
        assert_eq!(provider.kills(), 2);
        assert_eq!(drivers.quits(), 2);
    }
}
