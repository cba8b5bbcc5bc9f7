//! Per-operation metrics accumulator

use serde::{Deserialize, Serialize};

use crate::error::{truncate_message, MAX_ERROR_MESSAGE_LEN};

/// Error samples carried by a [`MetricsSummary`].
pub const MAX_ERROR_SAMPLES: usize = 5;

/// Counters and latency samples for one named operation kind.
///
/// `total_runs == success_count + failure_count` holds after every mutation.
/// Latencies are kept in recording order; statistics sort a copy so that the
/// order in which instances were merged never changes the derived values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub name: String,
    pub total_runs: u64,
    pub success_count: u64,
    pub failure_count: u64,
    #[serde(default)]
    pub latencies_ms: Vec<f64>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub retry_triggered: u64,
    #[serde(default)]
    pub retry_success: u64,
    #[serde(default)]
    pub retry_failed: u64,
    /// Runs restored from summary-only records. They count towards
    /// success rates but have no latency samples.
    #[serde(default)]
    pub unsampled_runs: u64,
}

/// Derived statistics of an [`OperationMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub name: String,
    pub total_runs: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Ratio in `[0, 1]`
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub max_latency_ms: f64,
    pub min_latency_ms: f64,
    pub retry_triggered: u64,
    pub retry_success: u64,
    pub retry_failed: u64,
    pub sampled_runs: u64,
    #[serde(default)]
    pub unsampled_runs: u64,
    #[serde(default)]
    pub error_samples: Vec<String>,
}

fn sanitize_latency(latency_ms: f64) -> f64 {
    if latency_ms > 0.0 && latency_ms.is_finite() {
        latency_ms
    } else {
        0.0
    }
}

/// Value at index `ceil(0.95 * n) - 1` of an ascending slice.
fn p95_of_sorted(sorted: &[f64]) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (95 * n).div_ceil(100);
            sorted[rank.saturating_sub(1).min(n - 1)]
        }
    }
}

impl OperationMetrics {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Rebuild counters from a summary. Samples are gone, so every run is
    /// marked unsampled.
    pub fn from_summary(summary: &MetricsSummary) -> Self {
        Self {
            name: summary.name.clone(),
            total_runs: summary.success_count + summary.failure_count,
            success_count: summary.success_count,
            failure_count: summary.failure_count,
            latencies_ms: Vec::new(),
            errors: summary.error_samples.clone(),
            retry_triggered: summary.retry_triggered,
            retry_success: summary.retry_success,
            retry_failed: summary.retry_failed,
            unsampled_runs: summary.success_count + summary.failure_count,
        }
    }

    pub fn record_success(&mut self, latency_ms: f64, retried: bool) {
        self.total_runs += 1;
        self.success_count += 1;
        self.latencies_ms.push(sanitize_latency(latency_ms));
        if retried {
            self.retry_triggered += 1;
            self.retry_success += 1;
        }
    }

    /// A latency of zero means nothing was timed; it counts but adds no sample.
    pub fn record_failure(&mut self, error: &str, latency_ms: f64, retried: bool) {
        self.total_runs += 1;
        self.failure_count += 1;
        self.errors.push(truncate_message(error, MAX_ERROR_MESSAGE_LEN));

        let latency_ms = sanitize_latency(latency_ms);
        if latency_ms > 0.0 {
            self.latencies_ms.push(latency_ms);
        }
        if retried {
            self.retry_triggered += 1;
            self.retry_failed += 1;
        }
    }

    pub fn merge(&mut self, other: &OperationMetrics) {
        if self.name.is_empty() {
            self.name = other.name.clone();
        }
        self.total_runs += other.total_runs;
        self.success_count += other.success_count;
        self.failure_count += other.failure_count;
        self.latencies_ms.extend_from_slice(&other.latencies_ms);
        self.errors.extend(other.errors.iter().cloned());
        self.retry_triggered += other.retry_triggered;
        self.retry_success += other.retry_success;
        self.retry_failed += other.retry_failed;
        self.unsampled_runs += other.unsampled_runs;
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            0.0
        } else {
            self.success_count as f64 / self.total_runs as f64
        }
    }

    fn sorted_latencies(&self) -> Vec<f64> {
        let mut sorted = self.latencies_ms.clone();
        sorted.sort_by(f64::total_cmp);
        sorted
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let sorted = self.sorted_latencies();
        if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<f64>() / sorted.len() as f64
        }
    }

    pub fn p95_latency_ms(&self) -> f64 {
        p95_of_sorted(&self.sorted_latencies())
    }

    pub fn max_latency_ms(&self) -> f64 {
        self.latencies_ms.iter().copied().fold(0.0, f64::max)
    }

    pub fn min_latency_ms(&self) -> f64 {
        self.latencies_ms
            .iter()
            .copied()
            .reduce(f64::min)
            .unwrap_or(0.0)
    }

    pub fn summarize(&self) -> MetricsSummary {
        let sorted = self.sorted_latencies();
        let avg = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<f64>() / sorted.len() as f64
        };

        MetricsSummary {
            name: self.name.clone(),
            total_runs: self.total_runs,
            success_count: self.success_count,
            failure_count: self.failure_count,
            success_rate: self.success_rate(),
            avg_latency_ms: avg,
            p95_latency_ms: p95_of_sorted(&sorted),
            max_latency_ms: sorted.last().copied().unwrap_or(0.0),
            min_latency_ms: sorted.first().copied().unwrap_or(0.0),
            retry_triggered: self.retry_triggered,
            retry_success: self.retry_success,
            retry_failed: self.retry_failed,
            sampled_runs: sorted.len() as u64,
            unsampled_runs: self.unsampled_runs,
            error_samples: self.errors.iter().take(MAX_ERROR_SAMPLES).cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ten_samples() -> OperationMetrics {
        let mut metrics = OperationMetrics::new("screenshot");
        for i in 1..=10 {
            metrics.record_success(i as f64 * 10.0, false);
        }
        metrics
    }

    #[test]
    fn test_counts_stay_consistent() {
        let mut metrics = OperationMetrics::new("install");
        metrics.record_success(12.0, false);
        metrics.record_failure("boom", 3.0, true);
        metrics.record_failure("early", 0.0, false);

        assert_eq!(metrics.total_runs, 3);
        assert_eq!(metrics.total_runs, metrics.success_count + metrics.failure_count);
        assert!((metrics.success_rate() - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(metrics.latencies_ms, vec![12.0, 3.0]);
        assert_eq!(metrics.errors.len(), 2);
        assert_eq!(metrics.retry_triggered, 1);
        assert_eq!(metrics.retry_failed, 1);
    }

    #[test]
    fn test_empty_metrics_summary_is_zeroed() {
        let summary = OperationMetrics::new("empty").summarize();
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.avg_latency_ms, 0.0);
        assert_eq!(summary.p95_latency_ms, 0.0);
        assert_eq!(summary.max_latency_ms, 0.0);
        assert_eq!(summary.min_latency_ms, 0.0);
    }

    #[test]
    fn test_p95_uses_ceiling_rank() {
        assert_eq!(ten_samples().p95_latency_ms(), 100.0);

        let mut single = OperationMetrics::new("single");
        single.record_success(5.0, false);
        assert_eq!(single.p95_latency_ms(), 5.0);

        let mut twenty = OperationMetrics::new("twenty");
        for i in 1..=20 {
            twenty.record_success(i as f64, false);
        }
        // ceil(0.95 * 20) - 1 = 18
        assert_eq!(twenty.p95_latency_ms(), 19.0);
    }

    #[test]
    fn test_negative_latency_is_clamped() {
        let mut metrics = OperationMetrics::new("tap");
        metrics.record_success(-4.0, false);
        metrics.record_failure("bad clock", -1.0, false);
        metrics.record_failure("nan", f64::NAN, false);

        assert_eq!(metrics.latencies_ms, vec![0.0]);
        assert_eq!(metrics.total_runs, 3);
    }

    #[test]
    fn test_errors_are_truncated() {
        let mut metrics = OperationMetrics::new("logs");
        metrics.record_failure(&"e".repeat(1000), 1.0, false);
        assert_eq!(metrics.errors[0].len(), MAX_ERROR_MESSAGE_LEN);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let mut a = OperationMetrics::new("op");
        a.record_success(30.0, false);
        a.record_failure("x", 7.5, true);
        let mut b = OperationMetrics::new("op");
        b.record_success(0.1, true);
        b.record_success(0.2, false);
        let mut c = OperationMetrics::new("op");
        c.record_success(1e6, false);
        c.record_failure("y", 0.0, false);

        let mut left = a.clone();
        left.merge(&b);
        left.merge(&c);

        let mut right = c.clone();
        let mut bc = b.clone();
        bc.merge(&a);
        right.merge(&bc);

        let (ls, rs) = (left.summarize(), right.summarize());
        assert_eq!(ls.total_runs, rs.total_runs);
        assert_eq!(ls.success_count, rs.success_count);
        assert_eq!(ls.avg_latency_ms, rs.avg_latency_ms);
        assert_eq!(ls.p95_latency_ms, rs.p95_latency_ms);
        assert_eq!(ls.retry_triggered, rs.retry_triggered);

        let mut lset = left.latencies_ms.clone();
        let mut rset = right.latencies_ms.clone();
        lset.sort_by(f64::total_cmp);
        rset.sort_by(f64::total_cmp);
        assert_eq!(lset, rset);
    }

    #[test]
    fn test_summary_restore_excludes_samples() {
        let summary = ten_samples().summarize();
        let restored = OperationMetrics::from_summary(&summary);

        assert_eq!(restored.total_runs, 10);
        assert_eq!(restored.unsampled_runs, 10);
        assert!(restored.latencies_ms.is_empty());

        let mut merged = OperationMetrics::new("screenshot");
        merged.record_success(7.0, false);
        merged.merge(&restored);
        let merged = merged.summarize();
        assert_eq!(merged.total_runs, 11);
        assert_eq!(merged.sampled_runs, 1);
        assert_eq!(merged.p95_latency_ms, 7.0);
    }
}
