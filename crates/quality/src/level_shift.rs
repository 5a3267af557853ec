//! Level-shift detection.
//!
//! For every interior split point of a series, the means of the two windows
//! are compared and normalized by the pooled standard deviation. The largest
//! normalized shift is the series statistic. This is a heuristic: promo spikes
//! can trip it and slow drift can slip under it, so flagged series carry the
//! split evidence and any promo or holiday context for a reviewer.

use dqsentinel_core::{Finding, FindingKind, Result, Severity};
use rayon::prelude::*;

use crate::index::Series;
use crate::registry::{Check, CheckInput, CheckOutput};

/// Relative floor for the pooled standard deviation of noise-free windows.
const STD_FLOOR: f64 = 1e-9;

/// Best split of one value sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShiftPoint {
    /// Index of the first value after the split
    pub split: usize,

    /// Normalized mean shift
    pub statistic: f64,

    /// Mean before the split
    pub mean_before: f64,

    /// Mean from the split on
    pub mean_after: f64,
}

/// Largest normalized mean shift over all splits leaving at least
/// `min_segment` values on each side. Earliest split wins ties.
pub fn max_shift(values: &[f64], min_segment: usize) -> Option<ShiftPoint> {
    let n = values.len();
    let min_segment = min_segment.max(2);
    if n < 2 * min_segment {
        return None;
    }

    // Centered prefix sums keep the variance terms well conditioned.
    let center = values.iter().sum::<f64>() / n as f64;
    let scale = values.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
    let floor = STD_FLOOR * scale;

    let mut sum = vec![0.0; n + 1];
    let mut sum_sq = vec![0.0; n + 1];
    for (i, v) in values.iter().enumerate() {
        let x = v - center;
        sum[i + 1] = sum[i] + x;
        sum_sq[i + 1] = sum_sq[i] + x * x;
    }

    let mut best: Option<ShiftPoint> = None;
    for k in min_segment..=(n - min_segment) {
        let (n1, n2) = (k as f64, (n - k) as f64);
        let m1 = sum[k] / n1;
        let m2 = (sum[n] - sum[k]) / n2;
        let ss1 = sum_sq[k] - n1 * m1 * m1;
        let ss2 = (sum_sq[n] - sum_sq[k]) - n2 * m2 * m2;
        let pooled = ((ss1 + ss2).max(0.0) / (n as f64 - 2.0)).sqrt();
        let diff = (m2 - m1).abs();

        let statistic = if pooled > floor {
            diff / pooled
        } else if diff > floor {
            diff / floor
        } else {
            0.0
        };

        if best.map_or(true, |b| statistic > b.statistic) {
            best = Some(ShiftPoint {
                split: k,
                statistic,
                mean_before: m1 + center,
                mean_after: m2 + center,
            });
        }
    }
    best
}

/// Flags series whose units or price mean shifts abruptly.
#[derive(Debug, Default)]
pub struct LevelShiftCheck;

impl Check for LevelShiftCheck {
    fn name(&self) -> &'static str {
        "level_shift"
    }

    fn run(&self, input: &CheckInput<'_>) -> Result<CheckOutput> {
        let findings: Vec<Finding> = input
            .view
            .series()
            .par_iter()
            .filter_map(|series| flag_series(series, input))
            .collect();

        if !findings.is_empty() {
            tracing::debug!(
                file = input.source_file,
                groups = findings.len(),
                "Level shifts found"
            );
        }
        Ok(CheckOutput {
            findings,
            ..Default::default()
        })
    }
}

fn flag_series(series: &Series, input: &CheckInput<'_>) -> Option<Finding> {
    let config = input.config;
    if series.len() < config.level_shift_min_points {
        return None;
    }

    let units = max_shift(&series.units(), config.level_shift_min_segment);
    let price = max_shift(&series.prices(), config.level_shift_min_segment);
    let units_stat = units.map_or(0.0, |p| p.statistic);
    let price_stat = price.map_or(0.0, |p| p.statistic);

    let (field, point) = match (units, price) {
        (Some(u), Some(p)) if p.statistic > u.statistic => ("price", p),
        (Some(u), _) => ("units", u),
        (None, Some(p)) => ("price", p),
        (None, None) => return None,
    };
    if point.statistic <= config.level_shift_z_threshold {
        return None;
    }

    let split_week = series.records[point.split].week_start;
    let window = config.annotation_window_weeks;
    let mut aligned_with = Vec::new();
    if input.context.holiday_near(split_week, window).is_some() {
        aligned_with.push("holiday");
    }
    if input.context.promo_near(&series.key, split_week, window) {
        aligned_with.push("promo");
    }

    let mut finding = Finding::new(
        FindingKind::LevelShift,
        Severity::Warning,
        format!(
            "Series {} {} mean shifted from {:.2} to {:.2} at {} (statistic {:.2})",
            series.key, field, point.mean_before, point.mean_after, split_week, point.statistic
        ),
    )
    .with_keys([series.key.clone()])
    .with_metric(point.statistic)
    .with_evidence("field", field)
    .with_evidence("split_week", split_week.to_string())
    .with_evidence("mean_before", point.mean_before)
    .with_evidence("mean_after", point.mean_after)
    .with_evidence("units_statistic", units_stat)
    .with_evidence("price_statistic", price_stat)
    .with_evidence("points", series.len());

    if !aligned_with.is_empty() {
        finding = finding.with_evidence("aligned_with", aligned_with);
    }
    if let Some(fiscal_week) = input
        .context
        .calendar_entry(split_week)
        .and_then(|entry| entry.fiscal_week)
    {
        finding = finding.with_evidence("fiscal_week", fiscal_week);
    }
    Some(finding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{ContextIndex, DedupedView};
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use dqsentinel_core::{CalendarEntry, PromoEntry, Record, RunContext, SentinelConfig};

    fn monday(n: usize) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, 2).unwrap() + Duration::weeks(n as i64)
    }

    fn series_records(units: &[f64]) -> Vec<Record> {
        units
            .iter()
            .enumerate()
            .map(|(i, &u)| Record {
                week_start: monday(i),
                sku_id: "S1".to_string(),
                store_id: "C1".to_string(),
                units: u,
                price: 5.0,
                inventory_on_hand: Some(100.0),
                currency: "USD".to_string(),
                load_ts: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                load_ts_offset: None,
                source_file: "erp.csv".to_string(),
                row: i,
            })
            .collect()
    }

    fn run(units: &[f64], context: RunContext) -> CheckOutput {
        let view = DedupedView::new(series_records(units)).unwrap();
        let context = ContextIndex::new(&context);
        let config = SentinelConfig::default();
        LevelShiftCheck
            .run(&CheckInput {
                source_file: "f.csv",
                view: &view,
                context: &context,
                config: &config,
            })
            .unwrap()
    }

    fn doubling(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let base = if i < n / 2 { 50.0 } else { 100.0 };
                base + (i % 3) as f64
            })
            .collect()
    }

    #[test]
    fn test_max_shift_finds_step() {
        let values = doubling(20);
        let point = max_shift(&values, 4).unwrap();
        assert_eq!(point.split, 10);
        assert!(point.statistic > 3.0);
        assert!((point.mean_after - point.mean_before - 50.0).abs() < 1.0);
    }

    #[test]
    fn test_max_shift_needs_two_segments() {
        assert!(max_shift(&[1.0; 7], 4).is_none());
        assert_eq!(max_shift(&[3.0; 8], 4).unwrap().statistic, 0.0);
    }

    #[test]
    fn test_noise_without_shift_passes() {
        let values: Vec<f64> = (0..40).map(|i| 50.0 + (i % 5) as f64).collect();
        let output = run(&values, RunContext::default());
        assert!(output.findings.is_empty());
    }

    #[test]
    fn test_doubling_series_flagged() {
        let output = run(&doubling(30), RunContext::default());

        assert_eq!(output.findings.len(), 1);
        let finding = &output.findings[0];
        assert_eq!(finding.kind, FindingKind::LevelShift);
        assert_eq!(finding.evidence["field"], "units");
        assert_eq!(finding.evidence["split_week"], monday(15).to_string());
        assert!(finding.evidence.get("aligned_with").is_none());
    }

    #[test]
    fn test_short_series_skipped() {
        let output = run(&[1.0, 1.0, 1.0, 100.0, 100.0, 100.0, 100.0], RunContext::default());
        assert!(output.findings.is_empty());
    }

    #[test]
    fn test_shift_annotated_with_promo_and_holiday() {
        let context = RunContext {
            calendar: vec![CalendarEntry {
                week_start: monday(15),
                holiday_flag: true,
                fiscal_week: Some(16),
            }],
            promos: vec![PromoEntry {
                week_start: monday(14),
                sku_id: "S1".to_string(),
                store_id: "C1".to_string(),
                discount: 0.3,
                bundle: false,
                display: false,
            }],
        };
        let output = run(&doubling(30), context);

        let finding = &output.findings[0];
        assert_eq!(finding.evidence["aligned_with"], serde_json::json!(["holiday", "promo"]));
        assert_eq!(finding.evidence["fiscal_week"], 16);
    }
}
