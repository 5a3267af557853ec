//! Threshold configuration shared by every detector of a run.

use serde::{Deserialize, Serialize};

use crate::error::{DqError, Result};

/// Largest accepted `annotation_window_weeks`.
pub const MAX_ANNOTATION_WINDOW_WEEKS: i64 = 52;

/// Static detector thresholds.
///
/// Passed by reference into every check; never mutated during a run.
/// Deserializing a partial document fills the missing fields from
/// [`SentinelConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    /// A record is backfilled when `load_ts - week_start` exceeds this many days
    pub freshness_lag_days: i64,

    /// Backfill finding raised when the backfilled fraction exceeds this
    pub backfill_significance: f64,

    /// Series shorter than this are skipped by the level-shift detector
    pub level_shift_min_points: usize,

    /// Smallest window allowed on either side of a split point
    pub level_shift_min_segment: usize,

    /// Normalized mean shift above which a series is flagged
    pub level_shift_z_threshold: f64,

    /// Weeks around a split point searched for promo or holiday context
    pub annotation_window_weeks: i64,

    /// Expected spacing between consecutive weeks of a series
    pub cadence_days: i64,

    /// Accepted deviation from `cadence_days`
    pub cadence_tolerance_days: i64,

    /// Relative tolerance when comparing values of a shifted neighbor
    pub tz_value_tolerance: f64,

    /// Records a SKU needs before its price range is trusted
    pub mixup_min_records: usize,

    /// How far outside the SKU range a value must fall to count as "far"
    pub mixup_range_factor: f64,

    /// Relative slack when testing whether a value sits inside a range
    pub mixup_inside_slack: f64,

    /// Also run the whole-file median heuristic
    pub mixup_file_medians: bool,

    /// Files with fewer distinct weeks get no autocorrelation
    pub seasonality_min_weeks: usize,

    /// Seasonality break raised when the lag-52 autocorrelation falls below this; off when unset
    pub seasonality_break_acf52: Option<f64>,

    /// Files processed concurrently
    pub max_workers: usize,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            freshness_lag_days: 14,
            backfill_significance: 0.05,
            level_shift_min_points: 8,
            level_shift_min_segment: 4,
            level_shift_z_threshold: 3.0,
            annotation_window_weeks: 1,
            cadence_days: 7,
            cadence_tolerance_days: 0,
            tz_value_tolerance: 0.05,
            mixup_min_records: 4,
            mixup_range_factor: 3.0,
            mixup_inside_slack: 0.25,
            mixup_file_medians: true,
            seasonality_min_weeks: 24,
            seasonality_break_acf52: None,
            max_workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl SentinelConfig {
    /// Parse a JSON document, falling back to defaults per missing field.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no detector can work with.
    pub fn validate(&self) -> Result<()> {
        if self.freshness_lag_days < 0 {
            return Err(DqError::InvalidConfig("freshness_lag_days must be >= 0".into()));
        }
        if !(0.0..=1.0).contains(&self.backfill_significance) {
            return Err(DqError::InvalidConfig(
                "backfill_significance must be within [0, 1]".into(),
            ));
        }
        if self.level_shift_min_segment < 2 {
            return Err(DqError::InvalidConfig("level_shift_min_segment must be >= 2".into()));
        }
        if self.level_shift_min_points < 2 * self.level_shift_min_segment {
            return Err(DqError::InvalidConfig(
                "level_shift_min_points must be at least twice level_shift_min_segment".into(),
            ));
        }
        if !(self.level_shift_z_threshold > 0.0) {
            return Err(DqError::InvalidConfig("level_shift_z_threshold must be > 0".into()));
        }
        if !(0..=MAX_ANNOTATION_WINDOW_WEEKS).contains(&self.annotation_window_weeks) {
            return Err(DqError::InvalidConfig(format!(
                "annotation_window_weeks must be within [0, {MAX_ANNOTATION_WINDOW_WEEKS}]"
            )));
        }
        if self.cadence_days <= 0 || self.cadence_tolerance_days < 0 {
            return Err(DqError::InvalidConfig(
                "cadence_days must be > 0 and cadence_tolerance_days >= 0".into(),
            ));
        }
        if self.cadence_tolerance_days >= self.cadence_days {
            return Err(DqError::InvalidConfig(
                "cadence_tolerance_days must be smaller than cadence_days".into(),
            ));
        }
        if self.tz_value_tolerance < 0.0 || self.mixup_inside_slack < 0.0 {
            return Err(DqError::InvalidConfig("tolerances must be >= 0".into()));
        }
        if !(self.mixup_range_factor > 1.0) {
            return Err(DqError::InvalidConfig("mixup_range_factor must be > 1".into()));
        }
        if self.seasonality_min_weeks < 3 {
            return Err(DqError::InvalidConfig("seasonality_min_weeks must be >= 3".into()));
        }
        if let Some(threshold) = self.seasonality_break_acf52 {
            if !(-1.0..=1.0).contains(&threshold) {
                return Err(DqError::InvalidConfig(
                    "seasonality_break_acf52 must be within [-1, 1]".into(),
                ));
            }
        }
        if self.max_workers == 0 {
            return Err(DqError::InvalidConfig("max_workers must be >= 1".into()));
        }
        Ok(())
    }
}
