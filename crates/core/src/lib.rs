//! DQ sentinel core data models.
//!
//! This crate defines the records, findings and reports that flow through
//! the weekly retail data-quality checks, plus the threshold configuration
//! and error type shared by every stage.

#![warn(missing_docs)]

// Identities
mod id;

// Inputs
mod record;

// Outputs
mod finding;
mod report;

// Ambient
mod config;
mod error;

// Re-exports
pub use id::RunId;
pub use record::{
    CalendarEntry, FileInput, PrimaryKey, PromoEntry, RawRow, Record, RunContext, SeriesKey,
    REQUIRED_COLUMNS,
};
pub use finding::{normalize_findings, AffectedKey, Finding, FindingKind, Severity};
pub use report::{
    BlockingStatus, FileReport, OperationalFailure, RunSummary, SeasonalityProfile, Status,
};
pub use config::{SentinelConfig, MAX_ANNOTATION_WINDOW_WEEKS};
pub use error::{DqError, Result};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
