//! Seasonality diagnostics over weekly unit totals.
//!
//! Units are summed per `week_start` across every series of the file and the
//! resulting sequence is correlated with itself one week and one year back.
//! The coefficients are reported as evidence on the file report; a finding is
//! raised only when a lag-52 threshold is configured.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use dqsentinel_core::{Finding, FindingKind, Result, SeasonalityProfile, Severity};

use crate::registry::{Check, CheckInput, CheckOutput};

/// Weeks in a seasonal year.
const YEAR_LAG: usize = 52;

/// Reports lag-1 and lag-52 autocorrelation of weekly totals.
#[derive(Debug, Default)]
pub struct SeasonalityCheck;

impl Check for SeasonalityCheck {
    fn name(&self) -> &'static str {
        "seasonality"
    }

    fn run(&self, input: &CheckInput<'_>) -> Result<CheckOutput> {
        let mut totals: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for record in input.view.records() {
            *totals.entry(record.week_start).or_default() += record.units;
        }
        let values: Vec<f64> = totals.into_values().collect();

        let profile = seasonality_profile(&values, input.config.seasonality_min_weeks);
        let mut output = CheckOutput {
            seasonality: Some(profile),
            ..Default::default()
        };

        if !profile.enough_history {
            tracing::debug!(
                file = input.source_file,
                weeks = profile.n_weeks,
                "Not enough history for seasonality"
            );
            return Ok(output);
        }

        if let (Some(threshold), Some(acf52)) =
            (input.config.seasonality_break_acf52, profile.acf_lag52)
        {
            if acf52 < threshold {
                let mut finding = Finding::new(
                    FindingKind::SeasonalityBreak,
                    Severity::Warning,
                    format!(
                        "Weekly units correlate {:.2} with the same week a year earlier, below {:.2}",
                        acf52, threshold
                    ),
                )
                .with_metric(acf52)
                .with_evidence("acf_lag52", acf52)
                .with_evidence("threshold", threshold)
                .with_evidence("n_weeks", profile.n_weeks);
                if let Some(acf1) = profile.acf_lag1 {
                    finding = finding.with_evidence("acf_lag1", acf1);
                }
                output.findings.push(finding);
            }
        }

        Ok(output)
    }
}

/// Autocorrelation profile of an ordered weekly sequence.
pub fn seasonality_profile(values: &[f64], min_weeks: usize) -> SeasonalityProfile {
    let n_weeks = values.len();
    if n_weeks < min_weeks {
        return SeasonalityProfile {
            n_weeks,
            enough_history: false,
            acf_lag1: None,
            acf_lag52: None,
        };
    }
    SeasonalityProfile {
        n_weeks,
        enough_history: true,
        acf_lag1: autocorrelation(values, 1),
        acf_lag52: autocorrelation(values, YEAR_LAG),
    }
}

/// Pearson correlation of `values[lag..]` with `values[..n - lag]`.
///
/// Positions, not calendar dates, are lagged. `None` below two pairs or when
/// either side has zero variance.
pub fn autocorrelation(values: &[f64], lag: usize) -> Option<f64> {
    let n = values.len();
    if lag == 0 || n < lag + 2 {
        return None;
    }
    let later = &values[lag..];
    let earlier = &values[..n - lag];
    let pairs = later.len() as f64;

    let mean_later = later.iter().sum::<f64>() / pairs;
    let mean_earlier = earlier.iter().sum::<f64>() / pairs;

    let (mut cov, mut var_later, mut var_earlier) = (0.0, 0.0, 0.0);
    for (x, y) in later.iter().zip(earlier) {
        let dx = x - mean_later;
        let dy = y - mean_earlier;
        cov += dx * dy;
        var_later += dx * dx;
        var_earlier += dy * dy;
    }
    if var_later <= 0.0 || var_earlier <= 0.0 {
        return None;
    }
    let r = cov / (var_later * var_earlier).sqrt();
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}
