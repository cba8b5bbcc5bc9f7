//! Process fan-out coordinator
//!
//! Splits the batch into contiguous unit ranges, starts one worker process
//! per range and waits for all of them. Workers talk back only through their
//! result files; the coordinator merges whatever it finds and treats a
//! missing or unreadable worker directory as a gap, not a failure.

use chrono::{DateTime, Utc};
use sandstorm_config::{SandstormConfig, WorkerAssignment};
use sandstorm_core::{
    BatchReport, DetailsDocument, HarnessError, ResultRecord, StoredRecord, FORMAT_VERSION,
};
use sandstorm_resilience::ShutdownSupervisor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::ExecutionResult;
use crate::scheduler::config_echo;
use crate::store::{worker_dir_name, ResultStore, CONFIG_SNAPSHOT_FILE, PLAN_FILE};

/// Units per process: as equal as integer division allows, remainder to the
/// first processes. The process count is clamped to `[1, total]`.
pub fn split_units(total: usize, process_count: usize) -> Vec<usize> {
    if total == 0 {
        return Vec::new();
    }
    let processes = process_count.clamp(1, total);
    let base = total / processes;
    let remainder = total % processes;
    (0..processes)
        .map(|i| base + usize::from(i < remainder))
        .collect()
}

/// One worker process's share of the batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPlan {
    pub worker_id: usize,
    pub unit_offset: usize,
    pub unit_count: usize,
    pub directory: PathBuf,
}

pub fn plan_workers(total: usize, process_count: usize, task_dir: &Path) -> Vec<WorkerPlan> {
    let mut offset = 0;
    split_units(total, process_count)
        .into_iter()
        .enumerate()
        .map(|(worker_id, unit_count)| {
            let plan = WorkerPlan {
                worker_id,
                unit_offset: offset,
                unit_count,
                directory: task_dir.join(worker_dir_name(worker_id)),
            };
            offset += unit_count;
            plan
        })
        .collect()
}

/// Starts a worker process for a plan
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, plan: &WorkerPlan, snapshot: &Path) -> std::io::Result<Child>;
}

/// Re-invokes the running executable with the hidden `worker` subcommand
#[derive(Debug, Clone)]
pub struct CurrentExeLauncher {
    executable: PathBuf,
    log_level: Option<String>,
}

impl CurrentExeLauncher {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            log_level: None,
        }
    }

    pub fn current() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    /// Forward an explicit `--log-level` to children
    pub fn with_log_level(mut self, level: Option<String>) -> Self {
        self.log_level = level;
        self
    }
}

impl WorkerLauncher for CurrentExeLauncher {
    fn launch(&self, plan: &WorkerPlan, snapshot: &Path) -> std::io::Result<Child> {
        let mut command = Command::new(&self.executable);
        if let Some(level) = &self.log_level {
            command.arg("--log-level").arg(level);
        }
        command
            .arg("worker")
            .arg("--config-snapshot")
            .arg(snapshot)
            .arg("--unit-offset")
            .arg(plan.unit_offset.to_string())
            .arg("--unit-count")
            .arg(plan.unit_count.to_string())
            .arg("--output-dir")
            .arg(&plan.directory)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
    }
}

/// Everything recovered from the worker directories
#[derive(Debug, Default)]
pub struct CollectedResults {
    pub records: Vec<ResultRecord>,
    /// The same records as the workers stored them
    pub stored: Vec<StoredRecord>,
    /// Earliest worker start and latest worker end
    pub window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Records that arrived summary-encoded
    pub unsampled: usize,
    pub gaps: Vec<HarnessError>,
}

/// Read every worker's summary and details. Unusable directories become gaps.
pub fn collect_worker_results(plans: &[WorkerPlan]) -> CollectedResults {
    let mut collected = CollectedResults::default();
    let mut bounds: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::new();

    for plan in plans {
        let store = ResultStore::new(&plan.directory);
        let loaded = store
            .load_summary()
            .and_then(|summary| store.load_details().map(|details| (summary, details)));

        match loaded {
            Ok((summary, details)) => {
                bounds.push((summary.summary.start_time, summary.summary.end_time));
                collected.unsampled += details.summary_encoded();
                collected.stored.extend(details.records.iter().cloned());
                collected.records.extend(details.into_records());
            }
            Err(e) => {
                let gap = HarnessError::AggregationGap {
                    worker_id: plan.worker_id,
                    reason: e.to_string(),
                };
                warn!("{}", gap);
                collected.gaps.push(gap);
            }
        }
    }

    let start = bounds.iter().map(|(start, _)| *start).min();
    let end = bounds.iter().map(|(_, end)| *end).max();
    collected.window = start.zip(end);
    collected
}

pub struct FanOutCoordinator {
    config: SandstormConfig,
    task_dir: PathBuf,
    launcher: Arc<dyn WorkerLauncher>,
    supervisor: Arc<ShutdownSupervisor>,
    print_report: bool,
}

impl FanOutCoordinator {
    pub fn new(
        config: SandstormConfig,
        task_dir: PathBuf,
        launcher: Arc<dyn WorkerLauncher>,
        supervisor: Arc<ShutdownSupervisor>,
    ) -> Self {
        Self {
            config,
            task_dir,
            launcher,
            supervisor,
            print_report: true,
        }
    }

    pub fn with_report_printing(mut self, print_report: bool) -> Self {
        self.print_report = print_report;
        self
    }

    pub fn task_dir(&self) -> &Path {
        &self.task_dir
    }

    /// Fan out, wait for every worker, merge and persist the final report
    pub async fn run(&self) -> ExecutionResult<BatchReport> {
        let plans = plan_workers(
            self.config.batch.unit_count,
            self.config.batch.effective_process_count(),
            &self.task_dir,
        );
        let store = ResultStore::new(&self.task_dir);
        store.write_json(PLAN_FILE, &plans)?;
        info!(
            "Splitting {} units across {} worker process(es): {:?}",
            self.config.batch.unit_count,
            plans.len(),
            plans.iter().map(|p| p.unit_count).collect::<Vec<_>>()
        );

        for plan in &plans {
            self.start_worker(plan, plans.len())?;
        }

        for exit in self.supervisor.children().wait_all().await {
            match exit.status {
                Some(status) if status.success() => {
                    info!("Worker {} finished", exit.worker_id);
                }
                Some(status) => warn!("Worker {} exited abnormally: {}", exit.worker_id, status),
                None => warn!("Worker {} could not be waited for", exit.worker_id),
            }
        }

        let collected = collect_worker_results(&plans);
        if !collected.gaps.is_empty() {
            warn!(
                "{} of {} worker(s) left no usable results",
                collected.gaps.len(),
                plans.len()
            );
        }

        let mut echo = config_echo(&self.config);
        echo.process_count = plans.len();
        let report = BatchReport::aggregate(echo, &collected.records, collected.window, collected.unsampled);

        store.save_summary(&report)?;
        store.save_details(&DetailsDocument {
            format_version: FORMAT_VERSION,
            worker_id: None,
            records: collected.stored,
        })?;

        if self.print_report {
            println!("{}", report.render());
        }
        info!("Results saved to {}", self.task_dir.display());
        Ok(report)
    }

    fn start_worker(&self, plan: &WorkerPlan, process_count: usize) -> ExecutionResult<()> {
        let mut snapshot = self.config.clone();
        snapshot.worker = Some(WorkerAssignment {
            worker_id: plan.worker_id,
            process_count,
        });
        let snapshot_path =
            ResultStore::new(&plan.directory).write_json(CONFIG_SNAPSHOT_FILE, &snapshot)?;

        match self.launcher.launch(plan, &snapshot_path) {
            Ok(child) => {
                info!(
                    "Worker {} started (pid {}) for units {}..{}",
                    plan.worker_id,
                    child.id(),
                    plan.unit_offset,
                    plan.unit_offset + plan.unit_count
                );
                self.supervisor.children().push(plan.worker_id, child);
            }
            Err(e) => warn!("Failed to start worker {}: {}", plan.worker_id, e),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandstorm_core::{ConfigEcho, RecordEncoding};

    #[test]
    fn test_split_units() {
        assert_eq!(split_units(10, 3), vec![4, 3, 3]);
        assert_eq!(split_units(5, 10), vec![1, 1, 1, 1, 1]);
        assert_eq!(split_units(0, 3), Vec::<usize>::new());
        assert_eq!(split_units(5, 0), vec![5]);
        assert_eq!(split_units(5, 2), vec![3, 2]);
    }

    #[test]
    fn test_plans_cover_every_unit_once() {
        let plans = plan_workers(7, 3, Path::new("/tmp/task"));
        let ids: Vec<usize> = plans
            .iter()
            .flat_map(|p| p.unit_offset..p.unit_offset + p.unit_count)
            .collect();
        assert_eq!(ids, (0..7).collect::<Vec<_>>());
        assert_eq!(plans[2].directory, Path::new("/tmp/task/worker_02"));
    }

    fn write_worker(plan: &WorkerPlan, encoding: RecordEncoding) {
        let records: Vec<ResultRecord> = (plan.unit_offset..plan.unit_offset + plan.unit_count)
            .map(|id| {
                let mut record = ResultRecord::new(id, plan.worker_id);
                record.create_ok = true;
                record.connect_ok = true;
                record.operations_ok = true;
                record.start_time = Some(Utc::now());
                record.end_time = record.start_time;
                record.finalize();
                record
            })
            .collect();
        let store = ResultStore::new(&plan.directory);
        let report = BatchReport::aggregate(ConfigEcho::default(), &records, None, 0);
        store.save_summary(&report).unwrap();
        store
            .save_details(&DetailsDocument::new(Some(plan.worker_id), &records, encoding))
            .unwrap();
    }

    #[test]
    fn test_collect_tolerates_missing_worker() {
        let dir = tempfile::tempdir().unwrap();
        let plans = plan_workers(5, 2, dir.path());
        write_worker(&plans[0], RecordEncoding::Detailed);

        let collected = collect_worker_results(&plans);
        assert_eq!(collected.records.len(), 3);
        assert_eq!(collected.gaps.len(), 1);
        assert!(matches!(
            collected.gaps[0],
            HarnessError::AggregationGap { worker_id: 1, .. }
        ));
        assert!(collected.window.is_some());
    }

    #[test]
    fn test_collect_counts_summary_encoded_records() {
        let dir = tempfile::tempdir().unwrap();
        let plans = plan_workers(5, 2, dir.path());
        write_worker(&plans[0], RecordEncoding::Detailed);
        write_worker(&plans[1], RecordEncoding::Summary);

        let collected = collect_worker_results(&plans);
        assert_eq!(collected.records.len(), 5);
        assert_eq!(collected.unsampled, 2);
        assert_eq!(collected.stored.iter().filter(|r| r.is_summary()).count(), 2);
        assert!(collected.gaps.is_empty());
    }
}
