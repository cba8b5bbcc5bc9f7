//! Result files on disk

use chrono::{DateTime, Local};
use sandstorm_core::{BatchReport, DetailsDocument, HarnessError, HarnessResult};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const SUMMARY_FILE: &str = "summary.json";
pub const DETAILS_FILE: &str = "details.json";
/// Coordinator's record of how units were split
pub const PLAN_FILE: &str = "workers.json";
/// Config handed to a worker process
pub const CONFIG_SNAPSHOT_FILE: &str = "config.json";

/// `<units>_p<processes>_<YYYYmmdd_HHMMSS>`
pub fn task_dir_name(unit_count: usize, process_count: usize, now: DateTime<Local>) -> String {
    format!(
        "{}_p{}_{}",
        unit_count,
        process_count,
        now.format("%Y%m%d_%H%M%S")
    )
}

pub fn worker_dir_name(worker_id: usize) -> String {
    format!("worker_{:02}", worker_id)
}

/// Reads and writes the JSON documents of one task or worker directory
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Write pretty JSON through a temp file in the same directory, then rename
    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_vec_pretty(value)?;

        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(&json)?;
        file.flush()?;

        let target = self.path(name);
        file.persist(&target).map_err(|e| HarnessError::Io(e.error))?;
        Ok(target)
    }

    pub fn save_summary(&self, report: &BatchReport) -> HarnessResult<PathBuf> {
        self.write_json(SUMMARY_FILE, report)
    }

    pub fn save_details(&self, details: &DetailsDocument) -> HarnessResult<PathBuf> {
        self.write_json(DETAILS_FILE, details)
    }

    pub fn load_summary(&self) -> HarnessResult<BatchReport> {
        let content = std::fs::read_to_string(self.path(SUMMARY_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn load_details(&self) -> HarnessResult<DetailsDocument> {
        let content = std::fs::read_to_string(self.path(DETAILS_FILE))?;
        DetailsDocument::from_json(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sandstorm_core::{RecordEncoding, ResultRecord};

    #[test]
    fn test_directory_names() {
        let now = Local.with_ymd_and_hms(2026, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(task_dir_name(10, 3, now), "10_p3_20260309_140507");
        assert_eq!(worker_dir_name(4), "worker_04");
    }

    #[test]
    fn test_details_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("worker_00"));
        let records = vec![ResultRecord::new(0, 0), ResultRecord::new(1, 0)];

        let path = store
            .save_details(&DetailsDocument::new(Some(0), &records, RecordEncoding::Summary))
            .unwrap();
        assert!(path.ends_with(DETAILS_FILE));

        let loaded = store.load_details().unwrap();
        assert_eq!(loaded.summary_encoded(), 2);
        assert_eq!(loaded.into_records().len(), 2);
        // Only the final file remains
        assert_eq!(std::fs::read_dir(store.dir()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_summary_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ResultStore::new(dir.path()).load_summary().is_err());
    }
}
