//! Batch report: cross-unit aggregation and text rendering

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::metrics::{MetricsSummary, OperationMetrics};
use crate::operation::OperationKind;
use crate::record::{RecordEncoding, ResultRecord};
use crate::FORMAT_VERSION;

pub const SANDBOX_CREATE_METRIC: &str = "Sandbox Create";
pub const DRIVER_CONNECT_METRIC: &str = "Driver Connect";

/// Settings echoed into every summary document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigEcho {
    pub unit_count: usize,
    pub process_count: usize,
    pub thread_pool_size: usize,
    pub use_pre_mounted_assets: bool,
    pub template: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub record_encoding: RecordEncoding,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStats {
    pub triggered: u64,
    pub success: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrySection {
    pub sandbox_create: RetryStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub total_sandboxes: usize,
    pub successful_sandboxes: usize,
    /// Ratio in `[0, 1]`
    pub success_rate: f64,
}

/// The summary document written by every process and by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub format_version: u32,
    pub config: ConfigEcho,
    pub summary: RunSummary,
    pub retry: RetrySection,
    pub sandbox_create: MetricsSummary,
    pub driver_connect: MetricsSummary,
    pub operations: BTreeMap<OperationKind, MetricsSummary>,
    /// Records that arrived summary-encoded and carry no latency samples
    #[serde(default)]
    pub unsampled_records: usize,
}

impl BatchReport {
    /// Merge every record into one report.
    ///
    /// `window` overrides the batch start/end; without it the earliest unit
    /// start and latest unit end are used.
    pub fn aggregate(
        config: ConfigEcho,
        records: &[ResultRecord],
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
        unsampled_records: usize,
    ) -> Self {
        let mut create = OperationMetrics::new(SANDBOX_CREATE_METRIC);
        let mut connect = OperationMetrics::new(DRIVER_CONNECT_METRIC);
        let mut create_retry = RetryStats::default();
        let mut operations: BTreeMap<OperationKind, OperationMetrics> = BTreeMap::new();

        for record in records {
            if record.create_ok {
                create.record_success(record.create_latency_ms, record.create_retried);
            } else {
                create.record_failure(&record.error, record.create_latency_ms, record.create_retried);
            }

            if record.create_retried {
                create_retry.triggered += 1;
                if record.create_ok {
                    create_retry.success += 1;
                } else {
                    create_retry.failed += 1;
                }
            }

            if record.create_ok {
                if record.connect_ok {
                    connect.record_success(record.connect_latency_ms, false);
                } else {
                    connect.record_failure(&record.error, record.connect_latency_ms, false);
                }
            }

            for (kind, metrics) in &record.operations {
                operations
                    .entry(*kind)
                    .or_insert_with(|| OperationMetrics::new(kind.metric_name()))
                    .merge(metrics);
            }
        }

        let (start_time, end_time) = window.unwrap_or_else(|| record_window(records));
        let duration_seconds = (end_time - start_time).num_milliseconds().max(0) as f64 / 1000.0;
        let successful_sandboxes = records.iter().filter(|r| r.success).count();
        let total_sandboxes = records.len();

        Self {
            format_version: FORMAT_VERSION,
            config,
            summary: RunSummary {
                start_time,
                end_time,
                duration_seconds,
                total_sandboxes,
                successful_sandboxes,
                success_rate: if total_sandboxes == 0 {
                    0.0
                } else {
                    successful_sandboxes as f64 / total_sandboxes as f64
                },
            },
            retry: RetrySection {
                sandbox_create: create_retry,
            },
            sandbox_create: create.summarize(),
            driver_connect: connect.summarize(),
            operations: operations
                .iter()
                .map(|(kind, metrics)| (*kind, metrics.summarize()))
                .collect(),
            unsampled_records,
        }
    }

    /// Human-readable report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let rule = "=".repeat(72);
        let thin = "-".repeat(72);

        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Batch Summary");
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(
            out,
            "Units: {}  Processes: {}  Thread pool: {}  Template: {}",
            self.config.unit_count, self.config.process_count, self.config.thread_pool_size, self.config.template
        );
        let _ = writeln!(
            out,
            "Start: {}  End: {}  Duration: {:.2}s",
            self.summary.start_time.format("%Y-%m-%d %H:%M:%S"),
            self.summary.end_time.format("%Y-%m-%d %H:%M:%S"),
            self.summary.duration_seconds
        );
        let _ = writeln!(
            out,
            "Sandboxes: {}/{} successful ({:.1}%)",
            self.summary.successful_sandboxes,
            self.summary.total_sandboxes,
            self.summary.success_rate * 100.0
        );
        if self.unsampled_records > 0 {
            let _ = writeln!(
                out,
                "Note: {} record(s) had no latency samples and count towards success rates only",
                self.unsampled_records
            );
        }

        let _ = writeln!(out, "{thin}");
        let _ = writeln!(
            out,
            "{:<26} {:>9} {:>10} {:>10} {:>10}",
            "Operation", "Success%", "Avg(ms)", "P95(ms)", "Max(ms)"
        );
        let _ = writeln!(out, "{thin}");
        for summary in self.table_rows() {
            let _ = writeln!(
                out,
                "{:<26} {:>8.1}% {:>10.1} {:>10.1} {:>10.1}",
                summary.name,
                summary.success_rate * 100.0,
                summary.avg_latency_ms,
                summary.p95_latency_ms,
                summary.max_latency_ms
            );
        }

        let retried: Vec<&MetricsSummary> = self
            .table_rows()
            .into_iter()
            .filter(|s| s.retry_triggered > 0)
            .collect();
        if !retried.is_empty() {
            let _ = writeln!(out, "{thin}");
            let _ = writeln!(out, "Retry statistics");
            let _ = writeln!(
                out,
                "{:<26} {:>10} {:>10} {:>10}",
                "Operation", "Triggered", "Success", "Failed"
            );
            for summary in retried {
                let _ = writeln!(
                    out,
                    "{:<26} {:>10} {:>10} {:>10}",
                    summary.name, summary.retry_triggered, summary.retry_success, summary.retry_failed
                );
            }
        }
        let _ = writeln!(out, "{rule}");
        out
    }

    fn table_rows(&self) -> Vec<&MetricsSummary> {
        let mut rows = vec![&self.sandbox_create, &self.driver_connect];
        rows.extend(self.operations.iter().filter_map(|(kind, summary)| {
            let hidden = *kind == OperationKind::UploadApk && self.config.use_pre_mounted_assets;
            (!hidden).then_some(summary)
        }));
        rows
    }
}

fn record_window(records: &[ResultRecord]) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = records.iter().filter_map(|r| r.start_time).min();
    let end = records.iter().filter_map(|r| r.end_time).max();
    match (start, end) {
        (Some(start), Some(end)) => (start, end.max(start)),
        (Some(start), None) => (start, start),
        (None, Some(end)) => (end, end),
        (None, None) => {
            let now = Utc::now();
            (now, now)
        }
    }
}
