//! Intra-process scheduler
//!
//! Starts every unit of this process at once, in id order, as tasks on the
//! current runtime. Blocking driver calls go through the shared pool, so the
//! runtime thread only ever waits. A unit task that dies is replaced by a
//! synthetic failed record; siblings are unaffected.

use chrono::Utc;
use futures::future::join_all;
use sandstorm_config::{RecordEncodingSetting, SandstormConfig};
use sandstorm_core::{BatchReport, ConfigEcho, DetailsDocument, RecordEncoding, ResultRecord};
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::error::ExecutionResult;
use crate::pool::panic_message;
use crate::store::ResultStore;
use crate::unit::{UnitEnvironment, UnitWorker};

/// The unit range one process is responsible for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerPlan {
    /// `None` when the process runs the whole batch alone
    pub worker_id: Option<usize>,
    pub unit_offset: usize,
    pub unit_count: usize,
    /// Where this process writes its result files
    pub directory: PathBuf,
}

/// What one process produced
#[derive(Debug)]
pub struct ProcessRun {
    pub records: Vec<ResultRecord>,
    pub report: BatchReport,
}

pub fn config_echo(config: &SandstormConfig) -> ConfigEcho {
    let process_count = match &config.worker {
        Some(assignment) => assignment.process_count,
        None => config.batch.effective_process_count(),
    };
    ConfigEcho {
        unit_count: config.batch.unit_count,
        process_count,
        thread_pool_size: config.batch.effective_thread_pool_size(),
        use_pre_mounted_assets: config.batch.use_pre_mounted_assets,
        template: config.provider.template.clone(),
        max_retries: config.retry.max_retries,
        retry_delay_ms: config.retry.retry_delay_ms,
        record_encoding: record_encoding(config.output.record_encoding),
    }
}

pub fn record_encoding(setting: RecordEncodingSetting) -> RecordEncoding {
    match setting {
        RecordEncodingSetting::Detailed => RecordEncoding::Detailed,
        RecordEncodingSetting::Summary => RecordEncoding::Summary,
    }
}

pub struct BatchScheduler {
    env: UnitEnvironment,
    plan: SchedulerPlan,
    echo: ConfigEcho,
    print_report: bool,
}

impl BatchScheduler {
    pub fn new(env: UnitEnvironment, plan: SchedulerPlan, config: &SandstormConfig) -> Self {
        Self {
            env,
            plan,
            echo: config_echo(config),
            print_report: config.is_sole_process(),
        }
    }

    /// Override whether the finished report is printed to stdout
    pub fn with_report_printing(mut self, print_report: bool) -> Self {
        self.print_report = print_report;
        self
    }

    pub fn plan(&self) -> &SchedulerPlan {
        &self.plan
    }

    /// Run every unit, persist this process's summary and details, and
    /// print the report when this is the only process in the batch.
    pub async fn run(&self) -> ExecutionResult<ProcessRun> {
        let worker_id = self.plan.worker_id.unwrap_or(0);
        let first = self.plan.unit_offset;
        let last = first + self.plan.unit_count;
        info!(
            "Worker {} starting units {}..{} with a pool of {}",
            worker_id,
            first,
            last,
            self.env.pool.size()
        );

        if let Err(e) = self.env.provider.warm_up().await {
            warn!("Provider warm-up failed: {}", e);
        }

        let start_time = Utc::now();
        let tasks: Vec<_> = (first..last)
            .map(|unit_id| {
                let worker = UnitWorker::new(unit_id, worker_id, self.env.clone(), &self.plan.directory);
                (unit_id, tokio::spawn(worker.run()))
            })
            .collect();

        let joined = join_all(
            tasks
                .into_iter()
                .map(|(unit_id, task)| async move { (unit_id, task.await) }),
        )
        .await;
        let end_time = Utc::now();

        let records: Vec<ResultRecord> = joined
            .into_iter()
            .map(|(unit_id, result)| match result {
                Ok(record) => record,
                Err(e) => {
                    let reason = if e.is_panic() {
                        panic_message(e.into_panic())
                    } else {
                        e.to_string()
                    };
                    error!("[unit {:>2}] Unit task died: {}", unit_id, reason);
                    ResultRecord::unexpected_failure(unit_id, worker_id, &format!("Unit task died: {}", reason))
                }
            })
            .collect();

        let report = BatchReport::aggregate(self.echo.clone(), &records, Some((start_time, end_time)), 0);
        let store = ResultStore::new(&self.plan.directory);
        store.save_summary(&report)?;
        store.save_details(&DetailsDocument::new(
            self.plan.worker_id,
            &records,
            self.echo.record_encoding,
        ))?;

        info!(
            "Worker {} finished: {}/{} units successful in {:.2}s",
            worker_id,
            report.summary.successful_sandboxes,
            report.summary.total_sandboxes,
            report.summary.duration_seconds
        );
        if self.print_report {
            println!("{}", report.render());
            info!("Results saved to {}", self.plan.directory.display());
        } else {
            info!("Final report is left to the coordinator");
        }

        Ok(ProcessRun { records, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BlockingPool;
    use crate::registry::ResourceRegistry;
    use crate::simulated::{FaultPlan, SimulatedDriverFactory, SimulatedProvider};
    use crate::store::DETAILS_FILE;
    use crate::unit::UnitSettings;
    use sandstorm_config::ProviderKind;
    use std::sync::Arc;
    use std::time::Duration;

    fn config(units: usize) -> SandstormConfig {
        let mut config = SandstormConfig::default();
        config.provider.kind = ProviderKind::Simulated;
        config.provider.template = "mobile-v1".to_string();
        config.batch.unit_count = units;
        config.batch.process_count = 1;
        config.batch.use_pre_mounted_assets = true;
        config.batch.settle_delay_ms = 0;
        config.retry.retry_delay_ms = 1;
        config
    }

    #[tokio::test]
    async fn test_runs_all_units_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(4);
        let provider = Arc::new(SimulatedProvider::new(
            Duration::from_millis(1),
            FaultPlan {
                failing_creates: 1,
                ..Default::default()
            },
        ));
        let env = UnitEnvironment {
            provider: provider.clone(),
            drivers: Arc::new(SimulatedDriverFactory::new(Duration::ZERO, FaultPlan::default())),
            registry: Arc::new(ResourceRegistry::new()),
            pool: BlockingPool::new(2),
            settings: Arc::new(UnitSettings::from_config(&config)),
        };
        let plan = SchedulerPlan {
            worker_id: None,
            unit_offset: 10,
            unit_count: 4,
            directory: dir.path().to_path_buf(),
        };

        let run = BatchScheduler::new(env, plan, &config)
            .with_report_printing(false)
            .run()
            .await
            .unwrap();

        let ids: Vec<usize> = run.records.iter().map(|r| r.unit_id).collect();
        assert_eq!(ids, vec![10, 11, 12, 13]);
        assert_eq!(run.report.summary.total_sandboxes, 4);
        assert_eq!(run.report.summary.successful_sandboxes, 4);
        assert_eq!(run.report.retry.sandbox_create.triggered, 1);
        assert_eq!(run.report.retry.sandbox_create.success, 1);
        assert_eq!(provider.warm_ups(), 1);
        assert_eq!(provider.live_sandboxes(), 0);

        let details = ResultStore::new(dir.path()).load_details().unwrap();
        assert_eq!(details.records.len(), 4);
        assert!(dir.path().join(DETAILS_FILE).exists());
        assert!(dir.path().join("unit_10").is_dir());
    }

    #[test]
    fn test_config_echo_uses_worker_assignment() {
        let mut config = config(10);
        config.batch.process_count = 3;
        assert_eq!(config_echo(&config).process_count, 3);

        config.worker = Some(sandstorm_config::WorkerAssignment {
            worker_id: 1,
            process_count: 2,
        });
        let echo = config_echo(&config);
        assert_eq!(echo.process_count, 2);
        assert_eq!(echo.unit_count, 10);
    }
}
