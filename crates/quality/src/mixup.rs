//! Unit/price mixup detection.
//!
//! Two signals feed the same finding kind:
//! - per SKU, a record whose price sits far outside the SKU's price range
//!   while its units look like a price (and the mirror case)
//! - per file, medians that only make sense if the columns were swapped

use std::collections::{BTreeMap, BTreeSet};

use dqsentinel_core::{Finding, FindingKind, PrimaryKey, Record, Result, SentinelConfig, Severity};

use crate::registry::{Check, CheckInput, CheckOutput};

/// Interquartile bounds of a value distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Range {
    lo: f64,
    hi: f64,
}

impl Range {
    fn of(values: &mut [f64]) -> Self {
        values.sort_by(f64::total_cmp);
        Self {
            lo: quantile(values, 0.25),
            hi: quantile(values, 0.75),
        }
    }

    fn far_outside(&self, value: f64, factor: f64) -> bool {
        value > self.hi * factor || value < self.lo / factor
    }

    fn inside(&self, value: f64, slack: f64) -> bool {
        value >= self.lo * (1.0 - slack) && value <= self.hi * (1.0 + slack)
    }
}

/// Linear-interpolated quantile of sorted values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let pos = q * (n - 1) as f64;
            let lower = pos.floor() as usize;
            let upper = pos.ceil() as usize;
            let frac = pos - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * frac
        }
    }
}

fn suspicious(record: &Record, prices: &Range, units: &Range, config: &SentinelConfig) -> bool {
    let factor = config.mixup_range_factor;
    let slack = config.mixup_inside_slack;
    (prices.far_outside(record.price, factor) && prices.inside(record.units, slack))
        || (units.far_outside(record.units, factor) && units.inside(record.price, slack))
}

/// Flags records whose units and price look swapped or unit-confused.
#[derive(Debug, Default)]
pub struct UnitPriceMixupCheck;

impl Check for UnitPriceMixupCheck {
    fn name(&self) -> &'static str {
        "unit_price_mixup"
    }

    fn run(&self, input: &CheckInput<'_>) -> Result<CheckOutput> {
        let config = input.config;
        let mut output = CheckOutput::default();

        let mut by_sku: BTreeMap<&str, Vec<&Record>> = BTreeMap::new();
        for record in input.view.records() {
            by_sku.entry(record.sku_id.as_str()).or_default().push(record);
        }

        let mut flagged: BTreeSet<PrimaryKey> = BTreeSet::new();
        let mut skus: BTreeSet<&str> = BTreeSet::new();
        for (sku, records) in &by_sku {
            if records.len() < config.mixup_min_records {
                continue;
            }
            let prices = Range::of(&mut records.iter().map(|r| r.price).collect::<Vec<_>>());
            let units = Range::of(&mut records.iter().map(|r| r.units).collect::<Vec<_>>());

            for record in records {
                if suspicious(record, &prices, &units, config) {
                    flagged.insert(record.key());
                    skus.insert(*sku);
                }
            }
        }

        if !flagged.is_empty() {
            let confidence = flagged.len() as f64 / input.view.len().max(1) as f64;
            output.findings.push(
                Finding::new(
                    FindingKind::UnitPriceMixup,
                    Severity::Warning,
                    format!(
                        "{} record(s) across {} SKU(s) have a price outside the SKU's range while units look like a price",
                        flagged.len(),
                        skus.len()
                    ),
                )
                .with_metric(confidence)
                .with_evidence("count_suspected", flagged.len())
                .with_evidence("skus", skus.iter().map(|s| s.to_string()).collect::<Vec<_>>())
                .with_keys(flagged),
            );
        }

        if config.mixup_file_medians {
            output.findings.extend(file_median_finding(input));
        }

        Ok(output)
    }
}

/// Whole-file signal: medians only plausible if the columns were swapped.
fn file_median_finding(input: &CheckInput<'_>) -> Option<Finding> {
    let mut prices: Vec<f64> = input.view.records().map(|r| r.price).collect();
    let mut units: Vec<f64> = input.view.records().map(|r| r.units).collect();
    if prices.is_empty() {
        return None;
    }
    prices.sort_by(f64::total_cmp);
    units.sort_by(f64::total_cmp);
    let price_median = quantile(&prices, 0.5);
    let units_median = quantile(&units, 0.5);
    let integer_share =
        prices.iter().filter(|p| p.fract() == 0.0).count() as f64 / prices.len() as f64;

    let hint = if price_median < 1.5 && units_median > 10.0 {
        "median price < 1.5 while median units > 10"
    } else if integer_share > 0.9 && price_median > 5.0 && units_median < 2.0 {
        "prices are integer-like and larger than typical units"
    } else {
        return None;
    };

    let ratio = if price_median > 0.0 {
        units_median / price_median
    } else {
        units_median
    };

    Some(
        Finding::new(
            FindingKind::UnitPriceMixup,
            Severity::Warning,
            format!("File-level medians suggest swapped units/price: {hint}"),
        )
        .with_metric(ratio)
        .with_evidence("price_median", price_median)
        .with_evidence("units_median", units_median)
        .with_evidence("integer_price_share", integer_share),
    )
}
