//! Per-unit result records and their durable encodings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{truncate_message, HarnessError, HarnessResult, MAX_ERROR_MESSAGE_LEN};
use crate::metrics::{MetricsSummary, OperationMetrics};
use crate::operation::OperationKind;
use crate::FORMAT_VERSION;

/// Outcome of driving one sandbox through create, connect, operate, destroy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub unit_id: usize,
    pub worker_id: usize,
    /// Id assigned by the provisioning service; empty until creation succeeds
    #[serde(default)]
    pub external_id: String,
    pub success: bool,
    #[serde(default)]
    pub error: String,

    pub create_ok: bool,
    pub connect_ok: bool,
    pub operations_ok: bool,
    pub destroy_ok: bool,

    pub create_latency_ms: f64,
    pub connect_latency_ms: f64,
    pub total_latency_ms: f64,

    #[serde(default)]
    pub create_retry_count: u32,
    #[serde(default)]
    pub create_retried: bool,

    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub create_start_time: Option<DateTime<Utc>>,
    pub create_end_time: Option<DateTime<Utc>>,
    pub destroy_start_time: Option<DateTime<Utc>>,
    pub destroy_end_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub operations: BTreeMap<OperationKind, OperationMetrics>,
}

impl ResultRecord {
    pub fn new(unit_id: usize, worker_id: usize) -> Self {
        Self {
            unit_id,
            worker_id,
            ..Default::default()
        }
    }

    /// Stand-in for a unit whose workflow died without producing a record.
    pub fn unexpected_failure(unit_id: usize, worker_id: usize, error: &str) -> Self {
        let now = Utc::now();
        let mut record = Self::new(unit_id, worker_id);
        record.set_error(error);
        record.start_time = Some(now);
        record.end_time = Some(now);
        record
    }

    /// Keep the first error; later phases only add context to the log.
    pub fn set_error(&mut self, error: &str) {
        if self.error.is_empty() {
            self.error = truncate_message(error, MAX_ERROR_MESSAGE_LEN);
        }
    }

    /// Recompute `success` from the phase flags.
    pub fn finalize(&mut self) {
        self.success = self.create_ok && self.connect_ok && self.operations_ok;
        if self.end_time.is_none() {
            self.end_time = Some(Utc::now());
        }
    }

    pub fn to_summary(&self) -> RecordSummary {
        RecordSummary {
            unit_id: self.unit_id,
            worker_id: self.worker_id,
            external_id: self.external_id.clone(),
            success: self.success,
            error: self.error.clone(),
            create_ok: self.create_ok,
            connect_ok: self.connect_ok,
            operations_ok: self.operations_ok,
            destroy_ok: self.destroy_ok,
            create_latency_ms: self.create_latency_ms,
            connect_latency_ms: self.connect_latency_ms,
            total_latency_ms: self.total_latency_ms,
            create_retry_count: self.create_retry_count,
            create_retried: self.create_retried,
            start_time: self.start_time,
            end_time: self.end_time,
            operations: self
                .operations
                .iter()
                .map(|(kind, metrics)| (*kind, metrics.summarize()))
                .collect(),
        }
    }
}

/// Count-only view of a [`ResultRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub unit_id: usize,
    pub worker_id: usize,
    #[serde(default)]
    pub external_id: String,
    pub success: bool,
    #[serde(default)]
    pub error: String,
    pub create_ok: bool,
    pub connect_ok: bool,
    pub operations_ok: bool,
    pub destroy_ok: bool,
    pub create_latency_ms: f64,
    pub connect_latency_ms: f64,
    pub total_latency_ms: f64,
    #[serde(default)]
    pub create_retry_count: u32,
    #[serde(default)]
    pub create_retried: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub operations: BTreeMap<OperationKind, MetricsSummary>,
}

impl RecordSummary {
    /// Restore a record. Operation metrics come back without samples and
    /// are flagged as unsampled.
    pub fn into_record(self) -> ResultRecord {
        ResultRecord {
            unit_id: self.unit_id,
            worker_id: self.worker_id,
            external_id: self.external_id,
            success: self.success,
            error: self.error,
            create_ok: self.create_ok,
            connect_ok: self.connect_ok,
            operations_ok: self.operations_ok,
            destroy_ok: self.destroy_ok,
            create_latency_ms: self.create_latency_ms,
            connect_latency_ms: self.connect_latency_ms,
            total_latency_ms: self.total_latency_ms,
            create_retry_count: self.create_retry_count,
            create_retried: self.create_retried,
            start_time: self.start_time,
            end_time: self.end_time,
            create_start_time: None,
            create_end_time: None,
            destroy_start_time: None,
            destroy_end_time: None,
            operations: self
                .operations
                .iter()
                .map(|(kind, summary)| (*kind, OperationMetrics::from_summary(summary)))
                .collect(),
        }
    }
}

/// Which encoding a process uses for its details document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordEncoding {
    #[default]
    Detailed,
    Summary,
}

/// A record as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "lowercase")]
pub enum StoredRecord {
    Detailed(ResultRecord),
    Summary(RecordSummary),
}

impl StoredRecord {
    pub fn encode(record: &ResultRecord, encoding: RecordEncoding) -> Self {
        match encoding {
            RecordEncoding::Detailed => StoredRecord::Detailed(record.clone()),
            RecordEncoding::Summary => StoredRecord::Summary(record.to_summary()),
        }
    }

    pub fn is_summary(&self) -> bool {
        matches!(self, StoredRecord::Summary(_))
    }

    pub fn into_record(self) -> ResultRecord {
        match self {
            StoredRecord::Detailed(record) => record,
            StoredRecord::Summary(summary) => summary.into_record(),
        }
    }
}

/// The details document: one stored record per unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailsDocument {
    pub format_version: u32,
    /// Producing worker, absent for coordinator and single-process output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<usize>,
    pub records: Vec<StoredRecord>,
}

impl DetailsDocument {
    pub fn new(worker_id: Option<usize>, records: &[ResultRecord], encoding: RecordEncoding) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            worker_id,
            records: records
                .iter()
                .map(|record| StoredRecord::encode(record, encoding))
                .collect(),
        }
    }

    pub fn from_json(json: &str) -> HarnessResult<Self> {
        let document: DetailsDocument = serde_json::from_str(json)?;
        if document.format_version > FORMAT_VERSION {
            return Err(HarnessError::Unexpected(format!(
                "details format version {} is newer than supported version {}",
                document.format_version, FORMAT_VERSION
            )));
        }
        Ok(document)
    }

    pub fn summary_encoded(&self) -> usize {
        self.records.iter().filter(|r| r.is_summary()).count()
    }

    pub fn into_records(self) -> Vec<ResultRecord> {
        self.records.into_iter().map(StoredRecord::into_record).collect()
    }
}
