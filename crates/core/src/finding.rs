//! Finding model - one classified data-quality issue with its evidence.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::record::{PrimaryKey, SeriesKey};

/// What kind of issue a finding reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FindingKind {
    /// A required column is absent
    SchemaMissingColumn,
    /// Cell values do not coerce to the column type
    SchemaTypeMismatch,
    /// A column outside the required set
    SchemaExtraColumn,
    /// Several records share a primary key
    DuplicateKey,
    /// Weeks moved by a day around the Monday anchor
    TimezoneShift,
    /// Weeks missing from a series
    CadenceGap,
    /// Weeks closer together than the cadence allows
    CadenceOverlap,
    /// Too many records loaded past the freshness lag
    Backfill,
    /// Abrupt change in a series mean
    LevelShift,
    /// Units and price look swapped
    UnitPriceMixup,
    /// Weekly totals lost their year-over-year pattern
    SeasonalityBreak,
}

impl FindingKind {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::SchemaMissingColumn => "SchemaMissingColumn",
            FindingKind::SchemaTypeMismatch => "SchemaTypeMismatch",
            FindingKind::SchemaExtraColumn => "SchemaExtraColumn",
            FindingKind::DuplicateKey => "DuplicateKey",
            FindingKind::TimezoneShift => "TimezoneShift",
            FindingKind::CadenceGap => "CadenceGap",
            FindingKind::CadenceOverlap => "CadenceOverlap",
            FindingKind::Backfill => "Backfill",
            FindingKind::LevelShift => "LevelShift",
            FindingKind::UnitPriceMixup => "UnitPriceMixup",
            FindingKind::SeasonalityBreak => "SeasonalityBreak",
        }
    }
}

impl std::fmt::Display for FindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finding severity. `Blocking` sorts above `Warning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Reported, file still passes
    Warning,
    /// File fails the gate
    Blocking,
}

/// What a finding points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "key", rename_all = "snake_case")]
pub enum AffectedKey {
    /// A single observation
    Record(PrimaryKey),
    /// A whole `(sku_id, store_id)` series
    Series(SeriesKey),
    /// A column of the input file
    Column(String),
}

impl std::fmt::Display for AffectedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AffectedKey::Record(key) => write!(f, "{key}"),
            AffectedKey::Series(key) => write!(f, "{key}"),
            AffectedKey::Column(name) => write!(f, "column:{name}"),
        }
    }
}

impl From<PrimaryKey> for AffectedKey {
    fn from(key: PrimaryKey) -> Self {
        AffectedKey::Record(key)
    }
}

impl From<SeriesKey> for AffectedKey {
    fn from(key: SeriesKey) -> Self {
        AffectedKey::Series(key)
    }
}

/// A detected data-quality issue.
///
/// Built once by the detector that found it, through the consuming `with_*`
/// methods, and then only read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Issue kind
    pub kind: FindingKind,

    /// Severity
    pub severity: Severity,

    /// Keys, series or columns the issue concerns
    pub affected_keys: BTreeSet<AffectedKey>,

    /// Headline numeric evidence (count, fraction or statistic)
    pub metric: f64,

    /// Human-readable explanation
    pub message: String,

    /// Additional structured evidence
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub evidence: BTreeMap<String, serde_json::Value>,
}

impl Finding {
    /// Create a finding without keys or evidence.
    pub fn new(kind: FindingKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            affected_keys: BTreeSet::new(),
            metric: 0.0,
            message: message.into(),
            evidence: BTreeMap::new(),
        }
    }

    /// Attach affected keys.
    pub fn with_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<AffectedKey>,
    {
        self.affected_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Set the headline metric.
    pub fn with_metric(mut self, metric: f64) -> Self {
        self.metric = metric;
        self
    }

    /// Attach a piece of evidence.
    pub fn with_evidence(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.evidence.insert(name.into(), value.into());
        self
    }

    /// Whether this finding forces a Red verdict.
    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocking
    }

    /// Canonical report order: blocking first, then kind, keys, message, metric.
    pub fn report_order(&self, other: &Self) -> Ordering {
        other
            .severity
            .cmp(&self.severity)
            .then_with(|| self.kind.cmp(&other.kind))
            .then_with(|| self.affected_keys.cmp(&other.affected_keys))
            .then_with(|| self.message.cmp(&other.message))
            .then_with(|| self.metric.total_cmp(&other.metric))
    }
}

/// Sort findings into report order and drop exact duplicates.
pub fn normalize_findings(findings: &mut Vec<Finding>) {
    findings.sort_by(Finding::report_order);
    findings.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Blocking > Severity::Warning);
    }

    #[test]
    fn test_builder_collects_keys_and_evidence() {
        let finding = Finding::new(FindingKind::Backfill, Severity::Warning, "late loads")
            .with_keys([SeriesKey::new("S1", "C1"), SeriesKey::new("S1", "C1")])
            .with_metric(0.25)
            .with_evidence("median_lag_days", 3);

        assert_eq!(finding.affected_keys.len(), 1);
        assert_eq!(finding.metric, 0.25);
        assert_eq!(finding.evidence["median_lag_days"], 3);
        assert!(!finding.is_blocking());
    }

    #[test]
    fn test_normalize_puts_blocking_first_and_dedups() {
        let warning = Finding::new(FindingKind::CadenceGap, Severity::Warning, "gap");
        let blocking = Finding::new(FindingKind::DuplicateKey, Severity::Blocking, "tie");
        let mut findings = vec![warning.clone(), blocking.clone(), warning.clone()];

        normalize_findings(&mut findings);

        assert_eq!(findings, vec![blocking, warning]);
    }

    #[test]
    fn test_affected_key_display() {
        assert_eq!(AffectedKey::Column("currency".to_string()).to_string(), "column:currency");
        assert_eq!(AffectedKey::from(SeriesKey::new("S1", "C2")).to_string(), "S1/C2");
    }
}
