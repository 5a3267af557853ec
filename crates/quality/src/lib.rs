//! Data-quality checks for weekly retail time series.
//!
//! Each file is validated, deduplicated on its primary key, and run through
//! the registered checks. The scoring stage folds the findings into a
//! Red/Amber/Green verdict per file and per run.

#![warn(missing_docs)]

pub mod backfill;
pub mod cadence;
pub mod engine;
pub mod index;
pub mod level_shift;
pub mod mixup;
pub mod pk;
pub mod registry;
pub mod schema;
pub mod scoring;
pub mod seasonality;

pub use backfill::BackfillCheck;
pub use cadence::CadenceCheck;
pub use engine::{analyze_file, FileAnalysis, SentinelEngine};
pub use index::{ContextIndex, DedupedView, RecordSet, Series};
pub use level_shift::{max_shift, LevelShiftCheck, ShiftPoint};
pub use mixup::UnitPriceMixupCheck;
pub use pk::{check_primary_keys, PkOutcome, TimezoneShiftCheck};
pub use registry::{Check, CheckInput, CheckOutput, CheckRegistry};
pub use schema::{validate, Validated};
pub use scoring::{
    file_report, file_status, merge_file_reports, merge_summaries, run_status, summarize,
    FileMeasures,
};
pub use seasonality::{autocorrelation, seasonality_profile, SeasonalityCheck};
