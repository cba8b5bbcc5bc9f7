//! Fan-out coordinator tests
//!
//! A scripted launcher stands in for the worker processes: it writes the
//! worker's result files itself and spawns a trivial child, so the
//! coordinator's wait, merge and persist path runs unchanged.

#![cfg(unix)]

use chrono::Utc;
use sandstorm_config::{ProviderKind, RecordEncodingSetting, SandstormConfig};
use sandstorm_core::{
    BatchReport, ConfigEcho, DetailsDocument, OperationKind, OperationMetrics, RecordEncoding,
    ResultRecord,
};
use sandstorm_execution::store::{CONFIG_SNAPSHOT_FILE, DETAILS_FILE, PLAN_FILE, SUMMARY_FILE};
use sandstorm_execution::{
    plan_workers, split_units, FanOutCoordinator, ResultStore, WorkerLauncher, WorkerPlan,
};
use sandstorm_resilience::{ShutdownError, ShutdownSupervisor};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};

/// Writes canned results for each worker instead of running a real one
struct ScriptedLauncher {
    encoding: RecordEncoding,
    unavailable: HashSet<usize>,
    snapshots: Mutex<Vec<PathBuf>>,
}

impl ScriptedLauncher {
    fn new(encoding: RecordEncoding) -> Self {
        Self {
            encoding,
            unavailable: HashSet::new(),
            snapshots: Mutex::new(Vec::new()),
        }
    }

    fn without_worker(mut self, worker_id: usize) -> Self {
        self.unavailable.insert(worker_id);
        self
    }
}

fn finished_record(unit_id: usize, worker_id: usize) -> ResultRecord {
    let mut record = ResultRecord::new(unit_id, worker_id);
    record.external_id = format!("sim-{:05}", unit_id);
    record.create_ok = true;
    record.connect_ok = true;
    record.operations_ok = true;
    record.destroy_ok = true;
    record.create_latency_ms = 800.0;
    record.connect_latency_ms = 300.0;
    record.start_time = Some(Utc::now());
    record.end_time = record.start_time;

    let mut screenshot = OperationMetrics::new(OperationKind::FirstScreenshot.metric_name());
    screenshot.record_success(120.0 + unit_id as f64, false);
    record.operations.insert(OperationKind::FirstScreenshot, screenshot);

    record.finalize();
    record
}

impl WorkerLauncher for ScriptedLauncher {
    fn launch(&self, plan: &WorkerPlan, snapshot: &Path) -> io::Result<Child> {
        self.snapshots.lock().unwrap().push(snapshot.to_path_buf());
        if self.unavailable.contains(&plan.worker_id) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "worker binary missing"));
        }

        let records: Vec<ResultRecord> = (plan.unit_offset..plan.unit_offset + plan.unit_count)
            .map(|unit_id| finished_record(unit_id, plan.worker_id))
            .collect();
        let store = ResultStore::new(&plan.directory);
        let report = BatchReport::aggregate(ConfigEcho::default(), &records, None, 0);
        store
            .save_summary(&report)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        store
            .save_details(&DetailsDocument::new(Some(plan.worker_id), &records, self.encoding))
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        Command::new("true")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
    }
}

fn batch_config(units: usize, processes: usize) -> SandstormConfig {
    let mut config = SandstormConfig::default();
    config.provider.kind = ProviderKind::Simulated;
    config.provider.template = "mobile-v1".to_string();
    config.batch.unit_count = units;
    config.batch.process_count = processes;
    config
}

async fn run_coordinator(
    config: SandstormConfig,
    task_dir: &Path,
    launcher: Arc<ScriptedLauncher>,
) -> BatchReport {
    let supervisor = Arc::new(ShutdownSupervisor::new());
    FanOutCoordinator::new(config, task_dir.to_path_buf(), launcher, supervisor)
        .with_report_printing(false)
        .run()
        .await
        .unwrap()
}

#[test]
fn test_five_units_over_two_processes() {
    assert_eq!(split_units(5, 2), vec![3, 2]);

    let plans = plan_workers(5, 2, Path::new("/tmp/task"));
    let shares: Vec<(usize, usize)> = plans.iter().map(|p| (p.unit_offset, p.unit_count)).collect();
    assert_eq!(shares, vec![(0, 3), (3, 2)]);
    assert_eq!(plans[1].directory, Path::new("/tmp/task/worker_01"));
}

#[tokio::test]
async fn test_coordinator_merges_every_worker() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(ScriptedLauncher::new(RecordEncoding::Detailed));

    let report = run_coordinator(batch_config(5, 2), dir.path(), launcher.clone()).await;

    assert_eq!(report.summary.total_sandboxes, 5);
    assert_eq!(report.summary.successful_sandboxes, 5);
    assert_eq!(report.config.process_count, 2);
    assert_eq!(report.unsampled_records, 0);
    assert_eq!(report.operations[&OperationKind::FirstScreenshot].total_runs, 5);

    for file in [SUMMARY_FILE, DETAILS_FILE, PLAN_FILE] {
        assert!(dir.path().join(file).exists(), "missing {}", file);
    }
    let details = ResultStore::new(dir.path()).load_details().unwrap();
    let mut ids: Vec<usize> = details.into_records().iter().map(|r| r.unit_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);

    let snapshots = launcher.snapshots.lock().unwrap().clone();
    assert_eq!(snapshots.len(), 2);
    for (worker_id, path) in snapshots.iter().enumerate() {
        assert!(path.ends_with(CONFIG_SNAPSHOT_FILE));
        let snapshot: SandstormConfig =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        let assignment = snapshot.worker.unwrap();
        assert_eq!(assignment.worker_id, worker_id);
        assert_eq!(assignment.process_count, 2);
    }
}

#[tokio::test]
async fn test_missing_worker_is_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(ScriptedLauncher::new(RecordEncoding::Detailed).without_worker(1));

    let report = run_coordinator(batch_config(5, 2), dir.path(), launcher).await;

    assert_eq!(report.summary.total_sandboxes, 3);
    assert_eq!(report.summary.successful_sandboxes, 3);
    assert!(dir.path().join(SUMMARY_FILE).exists());

    let plans: Vec<WorkerPlan> =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join(PLAN_FILE)).unwrap()).unwrap();
    assert_eq!(plans.len(), 2);
}

#[tokio::test]
async fn test_summary_encoded_records_are_flagged() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = batch_config(4, 2);
    config.output.record_encoding = RecordEncodingSetting::Summary;
    let launcher = Arc::new(ScriptedLauncher::new(RecordEncoding::Summary));

    let report = run_coordinator(config, dir.path(), launcher).await;

    assert_eq!(report.summary.total_sandboxes, 4);
    assert_eq!(report.unsampled_records, 4);
    let screenshot = &report.operations[&OperationKind::FirstScreenshot];
    assert_eq!(screenshot.success_count, 4);
    assert_eq!(screenshot.unsampled_runs, 4);
    assert_eq!(screenshot.sampled_runs, 0);

    let details = ResultStore::new(dir.path()).load_details().unwrap();
    assert_eq!(details.summary_encoded(), 4);
}

#[tokio::test]
async fn test_supervisor_cleanup_after_coordinator_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = Arc::new(ShutdownSupervisor::new());
    let launcher = Arc::new(ScriptedLauncher::new(RecordEncoding::Detailed));

    FanOutCoordinator::new(batch_config(2, 2), dir.path().to_path_buf(), launcher, supervisor.clone())
        .with_report_printing(false)
        .run()
        .await
        .unwrap();

    assert!(supervisor.children().is_empty());
    supervisor.cleanup().await.unwrap();
    assert!(matches!(
        supervisor.cleanup().await,
        Err(ShutdownError::AlreadyShuttingDown)
    ));
}
