//! Result output configuration

use crate::error::ConfigResult;
use crate::validation::{validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// How per-unit records are written to the details document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordEncodingSetting {
    /// Raw latency samples and errors
    #[default]
    Detailed,
    /// Per-operation counts only
    Summary,
}

impl FromStr for RecordEncodingSetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "detailed" => Ok(RecordEncodingSetting::Detailed),
            "summary" => Ok(RecordEncodingSetting::Summary),
            _ => Err(format!("Invalid record encoding: {}", s)),
        }
    }
}

impl fmt::Display for RecordEncodingSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordEncodingSetting::Detailed => f.write_str("detailed"),
            RecordEncodingSetting::Summary => f.write_str("summary"),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root under which each batch creates its task directory
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    #[serde(default)]
    pub record_encoding: RecordEncodingSetting,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            record_encoding: RecordEncodingSetting::default(),
        }
    }
}

impl Validatable for OutputConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(
            &self.directory.to_string_lossy(),
            "directory",
            self.domain_name(),
        )
    }

    fn domain_name(&self) -> &'static str {
        "output"
    }
}

fn default_directory() -> PathBuf {
    PathBuf::from("output/batch_output")
}
