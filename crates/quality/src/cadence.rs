//! Weekly cadence check.
//!
//! Gaps and overlaps are warnings only: series legitimately start late or
//! stop early when a SKU launches or a store closes.

use chrono::Duration;
use dqsentinel_core::{Finding, FindingKind, Result, SeriesKey, Severity};

use crate::registry::{Check, CheckInput, CheckOutput};

/// Verifies uniform spacing between consecutive weeks of each series.
#[derive(Debug, Default)]
pub struct CadenceCheck;

impl Check for CadenceCheck {
    fn name(&self) -> &'static str {
        "cadence"
    }

    fn run(&self, input: &CheckInput<'_>) -> Result<CheckOutput> {
        let config = input.config;
        let lo = config.cadence_days - config.cadence_tolerance_days;
        let hi = config.cadence_days + config.cadence_tolerance_days;
        let mut output = CheckOutput::default();

        for series in input.view.series() {
            for pair in series.records.windows(2) {
                let (prev, next) = (&pair[0], &pair[1]);
                let spacing = (next.week_start - prev.week_start).num_days();

                if spacing > hi {
                    let gap_from = prev.week_start + Duration::days(config.cadence_days);
                    // Off-cadence spacing can put the last expected week before the first.
                    let gap_to =
                        (next.week_start - Duration::days(config.cadence_days)).max(gap_from);
                    let missing = if input.context.has_calendar() {
                        // The official calendar decides which weeks should exist.
                        let expected = input
                            .context
                            .calendar_weeks_between(prev.week_start, next.week_start)
                            .len() as i64;
                        if expected == 0 {
                            continue;
                        }
                        expected
                    } else {
                        (spacing / config.cadence_days - 1).max(1)
                    };

                    output.findings.push(gap_finding(&series.key, gap_from, gap_to, spacing, missing));
                } else if spacing < lo {
                    output.findings.push(
                        Finding::new(
                            FindingKind::CadenceOverlap,
                            Severity::Warning,
                            format!(
                                "Series {} has weeks {} and {} only {} day(s) apart",
                                series.key, prev.week_start, next.week_start, spacing
                            ),
                        )
                        .with_keys([prev.key(), next.key()])
                        .with_metric(spacing as f64)
                        .with_evidence("spacing_days", spacing),
                    );
                }
            }
        }

        if !output.findings.is_empty() {
            tracing::debug!(
                file = input.source_file,
                findings = output.findings.len(),
                "Cadence irregularities found"
            );
        }
        Ok(output)
    }
}

fn gap_finding(
    series: &SeriesKey,
    gap_from: chrono::NaiveDate,
    gap_to: chrono::NaiveDate,
    spacing: i64,
    missing: i64,
) -> Finding {
    Finding::new(
        FindingKind::CadenceGap,
        Severity::Warning,
        format!(
            "Series {} is missing {} week(s) between {} and {}",
            series, missing, gap_from, gap_to
        ),
    )
    .with_keys([series.clone()])
    .with_metric(missing as f64)
    .with_evidence("gap_from", gap_from.to_string())
    .with_evidence("gap_to", gap_to.to_string())
    .with_evidence("spacing_days", spacing)
}
