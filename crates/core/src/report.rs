//! Report model - per-file reports and the run-level verdict.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::finding::Finding;
use crate::id::RunId;
use crate::Time;

/// Red/Amber/Green verdict. Ordered so that `max` yields the worst status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// No findings
    Green,
    /// Warnings only
    Amber,
    /// Blocking findings or operational failures
    Red,
}

impl Status {
    /// Process exit code consumed by CI wrappers. Stable across versions.
    pub fn exit_code(self) -> u8 {
        match self {
            Status::Green => 0,
            Status::Amber => 2,
            Status::Red => 3,
        }
    }

    /// The worse of two statuses.
    pub fn worst(self, other: Status) -> Status {
        self.max(other)
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Green => "green",
            Status::Amber => "amber",
            Status::Red => "red",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a file passed the blocking checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BlockingStatus {
    /// No blocking finding
    Pass,
    /// At least one blocking finding
    Fail,
}

/// Everything the checks found about one input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReport {
    /// Input file name
    pub source_file: String,

    /// Records that passed schema validation
    pub record_count: usize,

    /// PASS unless a blocking finding exists
    pub blocking: BlockingStatus,

    /// File-level verdict
    pub status: Status,

    /// Records sharing a primary key with another record
    pub duplicate_count: usize,

    /// Records left after primary-key resolution
    #[serde(default)]
    pub deduped_count: usize,

    /// Fraction of deduplicated records loaded past the freshness lag
    pub pct_backfilled: f64,

    /// Whether any unit/price swap was suspected
    pub suspected_unit_price_mixup: bool,

    /// Distinct series flagged with a level shift
    pub level_shift_groups: usize,

    /// Autocorrelation of weekly unit totals, when the seasonality check ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seasonality: Option<SeasonalityProfile>,

    /// Findings in report order
    pub findings: Vec<Finding>,
}

/// Autocorrelation of a file's weekly unit totals.
///
/// A coefficient is `None` when there are too few weeks for the lag or one
/// side of the pairing is constant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeasonalityProfile {
    /// Distinct weeks in the file
    pub n_weeks: usize,

    /// False when the file is too short to judge; no coefficient is computed then
    pub enough_history: bool,

    /// Correlation of each week with the previous one
    pub acf_lag1: Option<f64>,

    /// Correlation of each week with the same week a year earlier
    pub acf_lag52: Option<f64>,
}

/// A failure of the engine itself rather than of the data.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationalFailure {
    /// File being processed, if the failure is file-scoped
    pub source_file: Option<String>,

    /// Stage that failed
    pub stage: String,

    /// Error text
    pub message: String,
}

/// Terminal artifact of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run identifier
    pub run_id: RunId,

    /// When the summary was produced
    pub generated_at: Time,

    /// Worst status over all file reports and operational failures
    pub status: Status,

    /// Reports keyed by source file
    pub file_reports: BTreeMap<String, FileReport>,

    /// Engine failures; any entry forces Red
    #[serde(default)]
    pub operational_failures: Vec<OperationalFailure>,
}

impl RunSummary {
    /// Exit code for this run.
    pub fn exit_code(&self) -> u8 {
        self.status.exit_code()
    }

    /// Iterate over every finding of the run with its source file.
    pub fn findings(&self) -> impl Iterator<Item = (&str, &Finding)> {
        self.file_reports
            .iter()
            .flat_map(|(file, report)| report.findings.iter().map(move |f| (file.as_str(), f)))
    }
}
