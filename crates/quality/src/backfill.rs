//! Backfill detection from the `load_ts` - `week_start` lag distribution.

use dqsentinel_core::{Finding, FindingKind, Result, Severity};

use crate::registry::{Check, CheckInput, CheckOutput};

/// Flags files where too many weeks were loaded long after the fact.
#[derive(Debug, Default)]
pub struct BackfillCheck;

impl Check for BackfillCheck {
    fn name(&self) -> &'static str {
        "backfill"
    }

    fn run(&self, input: &CheckInput<'_>) -> Result<CheckOutput> {
        let freshness = input.config.freshness_lag_days;
        let mut lags: Vec<i64> = Vec::with_capacity(input.view.len());
        let mut late = Vec::new();

        for record in input.view.records() {
            let lag = record.lag_days();
            lags.push(lag);
            if lag > freshness {
                late.push(record.key());
            }
        }

        let pct_backfilled = if lags.is_empty() {
            0.0
        } else {
            late.len() as f64 / lags.len() as f64
        };

        let mut output = CheckOutput {
            pct_backfilled: Some(pct_backfilled),
            ..Default::default()
        };

        if pct_backfilled > input.config.backfill_significance {
            lags.sort_unstable();
            let count = late.len();
            output.findings.push(
                Finding::new(
                    FindingKind::Backfill,
                    Severity::Warning,
                    format!(
                        "{:.2}% of records were loaded more than {} days after week_start; partial backfill likely",
                        pct_backfilled * 100.0,
                        freshness
                    ),
                )
                .with_keys(late)
                .with_metric(pct_backfilled)
                .with_evidence("count_backfilled", count)
                .with_evidence("count_checked", lags.len())
                .with_evidence("freshness_lag_days", freshness)
                .with_evidence("median_lag_days", median(&lags))
                .with_evidence("max_lag_days", lags.last().copied().unwrap_or_default()),
            );
        }

        Ok(output)
    }
}

/// Median of sorted values; mean of the middle pair for even lengths.
fn median(sorted: &[i64]) -> f64 {
    match sorted.len() {
        0 => 0.0,
        n if n % 2 == 1 => sorted[n / 2] as f64,
        n => (sorted[n / 2 - 1] + sorted[n / 2]) as f64 / 2.0,
    }
}
