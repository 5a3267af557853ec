//! Primary-key integrity: duplicate resolution and timezone-shift detection.

use std::collections::BTreeSet;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use dqsentinel_core::{AffectedKey, Finding, FindingKind, PrimaryKey, Record, Result, Severity};

use crate::index::{RecordSet, Series};
use crate::registry::{Check, CheckInput, CheckOutput};

/// Result of primary-key resolution.
#[derive(Debug, Clone)]
pub struct PkOutcome {
    /// DuplicateKey findings (at most one warning and one blocking)
    pub findings: Vec<Finding>,

    /// Records that shared a primary key with another record
    pub duplicate_count: usize,

    /// One record per primary key, latest `load_ts` winning
    pub deduped: Vec<Record>,
}

/// Resolve duplicate primary keys.
///
/// A group resolves when exactly one record carries the latest `load_ts`. A
/// tie leaves the group unresolved and blocking; the first tied record in
/// input order is still kept so later checks see one record per key.
pub fn check_primary_keys(set: &RecordSet) -> PkOutcome {
    let mut deduped = Vec::with_capacity(set.by_key().len());
    let mut resolved: Vec<(&PrimaryKey, usize)> = Vec::new();
    let mut unresolved: Vec<(&PrimaryKey, usize)> = Vec::new();

    for (key, indices) in set.by_key() {
        let group: Vec<&Record> = indices.iter().map(|&i| &set.records()[i]).collect();
        let Some(latest) = group.iter().map(|r| r.load_ts).max() else {
            continue;
        };
        let winners: Vec<&&Record> = group.iter().filter(|r| r.load_ts == latest).collect();
        let keep = winners
            .iter()
            .min_by_key(|r| r.row)
            .map(|r| (**r).clone());

        if group.len() > 1 {
            if winners.len() == 1 {
                resolved.push((key, group.len()));
            } else {
                unresolved.push((key, group.len()));
            }
        }
        deduped.extend(keep);
    }

    deduped.sort_by_key(|r| r.row);

    let mut findings = Vec::new();
    let resolved_rows: usize = resolved.iter().map(|(_, n)| n).sum();
    let unresolved_rows: usize = unresolved.iter().map(|(_, n)| n).sum();

    if !resolved.is_empty() {
        findings.push(
            Finding::new(
                FindingKind::DuplicateKey,
                Severity::Warning,
                format!(
                    "{} primary key(s) duplicated across {} record(s); kept the latest load_ts",
                    resolved.len(),
                    resolved_rows
                ),
            )
            .with_keys(resolved.iter().map(|(k, _)| (*k).clone()))
            .with_metric(resolved_rows as f64)
            .with_evidence("duplicate_count", resolved_rows),
        );
    }
    if !unresolved.is_empty() {
        findings.push(
            Finding::new(
                FindingKind::DuplicateKey,
                Severity::Blocking,
                format!(
                    "{} primary key(s) duplicated across {} record(s) with tied load_ts; cannot resolve",
                    unresolved.len(),
                    unresolved_rows
                ),
            )
            .with_keys(unresolved.iter().map(|(k, _)| (*k).clone()))
            .with_metric(unresolved_rows as f64)
            .with_evidence("duplicate_count", unresolved_rows),
        );
    }

    if resolved_rows + unresolved_rows > 0 {
        tracing::debug!(
            resolved = resolved.len(),
            unresolved = unresolved.len(),
            "Duplicate primary keys found"
        );
    }

    PkOutcome {
        findings,
        duplicate_count: resolved_rows + unresolved_rows,
        deduped,
    }
}

/// Monday a Sunday or Tuesday `week_start` was most likely rounded away from.
fn shifted_anchor(week: NaiveDate) -> Option<NaiveDate> {
    match week.weekday() {
        Weekday::Sun => Some(week + Duration::days(1)),
        Weekday::Tue => Some(week - Duration::days(1)),
        _ => None,
    }
}

fn close(a: f64, b: f64, tolerance: f64) -> bool {
    let scale = a.abs().max(b.abs());
    scale == 0.0 || (a - b).abs() <= tolerance * scale
}

/// Keys in one series that carry the timezone-rounding signature.
fn shifted_keys(series: &Series, tolerance: f64) -> BTreeSet<PrimaryKey> {
    let mut keys = BTreeSet::new();

    for record in &series.records {
        let Some(anchor) = shifted_anchor(record.week_start) else {
            continue;
        };

        match series.at(anchor) {
            // Same week reported twice, once on the wrong side of midnight.
            Some(twin) => {
                if close(record.units, twin.units, tolerance)
                    && close(record.price, twin.price, tolerance)
                {
                    keys.insert(record.key());
                    keys.insert(twin.key());
                }
            }
            // The shifted record fills the anchor slot between regular weeks.
            None => {
                let neighbor = series
                    .at(anchor - Duration::weeks(1))
                    .or_else(|| series.at(anchor + Duration::weeks(1)));
                if neighbor.is_some_and(|n| close(record.price, n.price, tolerance)) {
                    keys.insert(record.key());
                }
            }
        }
    }

    keys
}

/// Timezone-induced date rounding and mixed `load_ts` offsets.
#[derive(Debug, Default)]
pub struct TimezoneShiftCheck;

impl Check for TimezoneShiftCheck {
    fn name(&self) -> &'static str {
        "timezone_shift"
    }

    fn run(&self, input: &CheckInput<'_>) -> Result<CheckOutput> {
        let mut output = CheckOutput::default();

        let shifted: BTreeSet<PrimaryKey> = input
            .view
            .series()
            .iter()
            .flat_map(|s| shifted_keys(s, input.config.tz_value_tolerance))
            .collect();
        if !shifted.is_empty() {
            output.findings.push(
                Finding::new(
                    FindingKind::TimezoneShift,
                    Severity::Warning,
                    format!(
                        "{} record(s) sit one day off a Monday next to consistent values; likely timezone rounding",
                        shifted.len()
                    ),
                )
                .with_metric(shifted.len() as f64)
                .with_keys(shifted),
            );
        }

        let offsets: BTreeSet<i32> = input.view.records().filter_map(|r| r.load_ts_offset).collect();
        if offsets.len() > 1 {
            let labels: Vec<String> = offsets.iter().map(|&secs| format_offset(secs)).collect();
            output.findings.push(
                Finding::new(
                    FindingKind::TimezoneShift,
                    Severity::Warning,
                    format!("load_ts mixes {} UTC offsets: {}", offsets.len(), labels.join(", ")),
                )
                .with_keys([AffectedKey::Column("load_ts".to_string())])
                .with_metric(offsets.len() as f64)
                .with_evidence("offsets", labels),
            );
        }

        Ok(output)
    }
}

fn format_offset(secs: i32) -> String {
    let sign = if secs < 0 { '-' } else { '+' };
    let abs = secs.abs();
    format!("{}{:02}:{:02}", sign, abs / 3600, (abs % 3600) / 60)
}
