//! Single-unit worker: create, connect, operate, destroy
//!
//! A unit owns one sandbox for its whole life. Creation is retried under the
//! configured policy; connecting is attempted once. Any failure skips ahead
//! to teardown, which always runs when a sandbox exists. The unit never
//! returns an error: everything that happens ends up in its [`ResultRecord`].

use chrono::Utc;
use sandstorm_config::{AppConfig, SandstormConfig};
use sandstorm_core::{
    DeviceDriver, DriverEndpoint, DriverFactory, ExternalFailure, ResultRecord, SandboxHandle,
    SandboxProvider, ScreenSize,
};
use sandstorm_resilience::{RetryExecutor, RetryPolicy};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::operations::{run_operations, OperationContext};
use crate::pool::BlockingPool;
use crate::registry::ResourceRegistry;

/// Settings every unit of a process shares
#[derive(Debug, Clone)]
pub struct UnitSettings {
    pub template: String,
    pub sandbox_timeout: Duration,
    pub driver_port: u16,
    pub retry: RetryPolicy,
    pub app: AppConfig,
    pub use_pre_mounted_assets: bool,
    pub browser_url: String,
    pub settle_delay: Duration,
    /// Used when the device does not report its window size
    pub default_screen: ScreenSize,
}

impl UnitSettings {
    pub fn from_config(config: &SandstormConfig) -> Self {
        Self {
            template: config.provider.template.clone(),
            sandbox_timeout: config.provider.sandbox_timeout,
            driver_port: config.provider.driver_port,
            retry: RetryPolicy::fixed(config.retry.max_retries, config.retry.retry_delay()),
            app: config.app.clone(),
            use_pre_mounted_assets: config.batch.use_pre_mounted_assets,
            browser_url: config.batch.browser_url.clone(),
            settle_delay: config.batch.settle_delay(),
            default_screen: ScreenSize {
                width: config.batch.default_screen.width,
                height: config.batch.default_screen.height,
            },
        }
    }
}

/// Collaborators shared by every unit in a process
#[derive(Clone)]
pub struct UnitEnvironment {
    pub provider: Arc<dyn SandboxProvider>,
    pub drivers: Arc<dyn DriverFactory>,
    pub registry: Arc<ResourceRegistry>,
    pub pool: BlockingPool,
    pub settings: Arc<UnitSettings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitPhase {
    Created,
    Creating,
    Connecting,
    Operating,
    Destroying,
    Done,
}

pub struct UnitWorker {
    unit_id: usize,
    env: UnitEnvironment,
    output_dir: PathBuf,
    phase: UnitPhase,
    record: ResultRecord,
    sandbox: Option<Arc<dyn SandboxHandle>>,
    driver: Option<Arc<dyn DeviceDriver>>,
    screen: ScreenSize,
}

impl UnitWorker {
    pub fn new(unit_id: usize, worker_id: usize, env: UnitEnvironment, process_dir: &Path) -> Self {
        let screen = env.settings.default_screen;
        Self {
            unit_id,
            output_dir: process_dir.join(format!("unit_{}", unit_id)),
            env,
            phase: UnitPhase::Created,
            record: ResultRecord::new(unit_id, worker_id),
            sandbox: None,
            driver: None,
            screen,
        }
    }

    pub fn phase(&self) -> UnitPhase {
        self.phase
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Drive the unit to completion
    pub async fn run(mut self) -> ResultRecord {
        let started = Instant::now();
        self.record.start_time = Some(Utc::now());

        if let Err(e) = tokio::fs::create_dir_all(&self.output_dir).await {
            warn!(
                "[unit {:>2}] Cannot create {}: {}",
                self.unit_id,
                self.output_dir.display(),
                e
            );
        }

        if self.create().await {
            if self.connect().await {
                self.operate().await;
            }
            self.destroy().await;
        }

        self.record.total_latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.record.end_time = Some(Utc::now());
        self.record.finalize();
        self.phase = UnitPhase::Done;

        if self.record.success {
            info!(
                "[unit {:>2}] Completed ({:.0}ms)",
                self.unit_id, self.record.total_latency_ms
            );
        } else {
            warn!(
                "[unit {:>2}] Failed ({:.0}ms): {}",
                self.unit_id, self.record.total_latency_ms, self.record.error
            );
        }
        self.record
    }

    async fn create(&mut self) -> bool {
        self.phase = UnitPhase::Creating;
        self.record.create_start_time = Some(Utc::now());

        let executor = RetryExecutor::new(self.env.settings.retry.clone());
        let provider = self.env.provider.clone();
        let settings = self.env.settings.clone();
        let unit_id = self.unit_id;
        let label = format!("[unit {:>2}] create", unit_id);

        let outcome = executor
            .execute_with_context(&label, |attempt| {
                let provider = provider.clone();
                let settings = settings.clone();
                async move {
                    if attempt > 1 {
                        info!("[unit {:>2}] Retrying sandbox creation (attempt {})", unit_id, attempt);
                    }
                    provider
                        .create(&settings.template, settings.sandbox_timeout)
                        .await
                        .map_err(|e| e.describe())
                }
            })
            .await;

        self.record.create_latency_ms = outcome.elapsed_ms();
        self.record.create_retry_count = outcome.retry_count();
        self.record.create_retried = outcome.retried();
        self.record.create_end_time = Some(Utc::now());

        match outcome.result {
            Ok(sandbox) => {
                self.record.create_ok = true;
                self.record.external_id = sandbox.id().to_string();
                self.env.registry.register_sandbox(self.unit_id, sandbox.clone());
                info!(
                    "[unit {:>2}] Sandbox created ({:.0}ms) sandbox_id={}",
                    self.unit_id,
                    self.record.create_latency_ms,
                    sandbox.id()
                );
                self.sandbox = Some(sandbox);
                true
            }
            Err(error) => {
                self.record.set_error(&format!(
                    "Sandbox creation failed (retried {} times): {}",
                    self.record.create_retry_count, error
                ));
                warn!(
                    "[unit {:>2}] Sandbox creation failed ({:.0}ms): {}",
                    self.unit_id, self.record.create_latency_ms, error
                );
                false
            }
        }
    }

    async fn connect(&mut self) -> bool {
        self.phase = UnitPhase::Connecting;
        let Some(sandbox) = self.sandbox.clone() else {
            return false;
        };

        let endpoint = DriverEndpoint {
            url: sandbox.endpoint(self.env.settings.driver_port),
            access_token: sandbox.access_token(),
        };
        let factory = self.env.drivers.clone();
        let started = Instant::now();
        let result = self.env.pool.run(move || factory.connect(&endpoint)).await;
        self.record.connect_latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let failure = match result {
            Ok(Ok(driver)) => {
                self.record.connect_ok = true;
                self.env.registry.register_driver(self.unit_id, driver.clone());
                self.driver = Some(driver.clone());
                info!(
                    "[unit {:>2}] Driver connected ({:.0}ms)",
                    self.unit_id, self.record.connect_latency_ms
                );
                self.screen = self.probe_screen(driver).await;
                return true;
            }
            Ok(Err(e)) => e.describe(),
            Err(e) => e.to_string(),
        };

        self.record.set_error(&format!("Driver connection failed: {}", failure));
        warn!(
            "[unit {:>2}] Driver connection failed ({:.0}ms): {}",
            self.unit_id, self.record.connect_latency_ms, failure
        );
        false
    }

    async fn probe_screen(&self, driver: Arc<dyn DeviceDriver>) -> ScreenSize {
        match self.env.pool.run(move || driver.window_size()).await {
            Ok(Ok(size)) if size.width > 0 && size.height > 0 => {
                debug!("[unit {:>2}] Screen size {}", self.unit_id, size);
                size
            }
            Ok(Ok(size)) => {
                debug!("[unit {:>2}] Ignoring screen size {}", self.unit_id, size);
                self.env.settings.default_screen
            }
            Ok(Err(e)) => {
                debug!("[unit {:>2}] Window size unavailable: {}", self.unit_id, e);
                self.env.settings.default_screen
            }
            Err(e) => {
                debug!("[unit {:>2}] Window size unavailable: {}", self.unit_id, e);
                self.env.settings.default_screen
            }
        }
    }

    async fn operate(&mut self) {
        self.phase = UnitPhase::Operating;
        let Some(driver) = self.driver.clone() else {
            return;
        };

        let ctx = OperationContext {
            unit_id: self.unit_id,
            driver,
            settings: self.env.settings.clone(),
            output_dir: self.output_dir.clone(),
            screen: self.screen,
        };
        let executor = RetryExecutor::new(self.env.settings.retry.clone());

        match self.env.pool.run(move || run_operations(&ctx, &executor)).await {
            Ok(outcome) => {
                self.record.operations_ok = outcome.all_ok;
                self.record.operations = outcome.metrics;
            }
            Err(e) => {
                self.record.operations_ok = false;
                self.record
                    .set_error(&format!("Operation sequence aborted: {}", e));
            }
        }
    }

    async fn destroy(&mut self) {
        self.phase = UnitPhase::Destroying;
        self.record.destroy_start_time = Some(Utc::now());
        let mut ok = true;

        if let Some(driver) = self.driver.take() {
            match self.env.pool.run(move || driver.quit()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    ok = false;
                    debug!("[unit {:>2}] Driver quit failed: {}", self.unit_id, e.describe());
                }
                Err(e) => {
                    ok = false;
                    debug!("[unit {:>2}] Driver quit failed: {}", self.unit_id, e);
                }
            }
        }

        if let Some(sandbox) = self.sandbox.take() {
            if let Err(e) = sandbox.kill().await {
                ok = false;
                warn!(
                    "[unit {:>2}] Failed to kill sandbox {}: {}",
                    self.unit_id,
                    sandbox.id(),
                    e.describe()
                );
            }
        }

        self.env.registry.unregister(self.unit_id);
        self.record.destroy_ok = ok;
        self.record.destroy_end_time = Some(Utc::now());
    }
}
