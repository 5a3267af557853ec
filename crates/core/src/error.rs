//! Error type for operational failures.
//!
//! Data-quality problems are reported as findings, never as errors. An error
//! means a stage could not run to completion and its silence cannot be trusted.

/// Result alias used across the sentinel crates.
pub type Result<T> = std::result::Result<T, DqError>;

/// Errors that can occur while running the checks.
#[derive(Debug, thiserror::Error)]
pub enum DqError {
    /// Threshold configuration is unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A series violated the ordering contract of a detector
    #[error("Series {series} is not comparable: {reason}")]
    NonComparableSeries {
        /// Offending series
        series: String,
        /// What went wrong
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}
