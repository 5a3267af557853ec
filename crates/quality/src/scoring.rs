//! Scoring engine - folds findings into file reports and reports into a run.
//!
//! Every function here is a pure reduction. Statuses combine with `max`,
//! reports are keyed by file and findings are kept in canonical order, so
//! the result does not depend on the order files or checks finished in.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use dqsentinel_core::{
    normalize_findings, AffectedKey, BlockingStatus, FileReport, Finding, FindingKind,
    OperationalFailure, RunId, RunSummary, SeasonalityProfile, Severity, Status,
};

/// Counters measured outside the findings themselves.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FileMeasures {
    /// Records that passed schema validation
    pub record_count: usize,

    /// Records sharing a primary key with another record
    pub duplicate_count: usize,

    /// Records left after primary-key resolution
    pub deduped_count: usize,

    /// Backfilled fraction of the deduplicated records
    pub pct_backfilled: f64,

    /// Weekly-total autocorrelation
    pub seasonality: Option<SeasonalityProfile>,
}

/// Status of one file from its findings.
pub fn file_status(findings: &[Finding]) -> Status {
    findings
        .iter()
        .map(|f| match f.severity {
            Severity::Blocking => Status::Red,
            Severity::Warning => Status::Amber,
        })
        .max()
        .unwrap_or(Status::Green)
}

/// Build the report of one file.
pub fn file_report(
    source_file: impl Into<String>,
    measures: FileMeasures,
    mut findings: Vec<Finding>,
) -> FileReport {
    normalize_findings(&mut findings);
    let status = file_status(&findings);

    let level_shift_groups = findings
        .iter()
        .filter(|f| f.kind == FindingKind::LevelShift)
        .flat_map(|f| f.affected_keys.iter())
        .filter(|k| matches!(k, AffectedKey::Series(_)))
        .collect::<BTreeSet<_>>()
        .len();
    let suspected_unit_price_mixup = findings.iter().any(|f| f.kind == FindingKind::UnitPriceMixup);

    FileReport {
        source_file: source_file.into(),
        record_count: measures.record_count,
        blocking: if status == Status::Red {
            BlockingStatus::Fail
        } else {
            BlockingStatus::Pass
        },
        status,
        duplicate_count: measures.duplicate_count,
        deduped_count: measures.deduped_count,
        pct_backfilled: measures.pct_backfilled,
        suspected_unit_price_mixup,
        level_shift_groups,
        seasonality: measures.seasonality,
        findings,
    }
}

/// Combine two reports of the same source file.
pub fn merge_file_reports(a: FileReport, b: FileReport) -> FileReport {
    let deduped_count = a.deduped_count + b.deduped_count;
    let pct_backfilled = if deduped_count == 0 {
        0.0
    } else {
        (a.pct_backfilled * a.deduped_count as f64 + b.pct_backfilled * b.deduped_count as f64)
            / deduped_count as f64
    };
    let measures = FileMeasures {
        record_count: a.record_count + b.record_count,
        duplicate_count: a.duplicate_count + b.duplicate_count,
        deduped_count,
        pct_backfilled,
        seasonality: longer_history(a.seasonality, b.seasonality),
    };

    let mut findings = a.findings;
    findings.extend(b.findings);
    file_report(a.source_file, measures, findings)
}

/// The profile built from more weeks; ties resolve on the coefficients.
fn longer_history(
    a: Option<SeasonalityProfile>,
    b: Option<SeasonalityProfile>,
) -> Option<SeasonalityProfile> {
    let rank = |p: &SeasonalityProfile| {
        (
            p.n_weeks,
            p.acf_lag52.unwrap_or(f64::NEG_INFINITY),
            p.acf_lag1.unwrap_or(f64::NEG_INFINITY),
        )
    };
    match (a, b) {
        (Some(a), Some(b)) => {
            let (ra, rb) = (rank(&a), rank(&b));
            let a_wins = ra
                .0
                .cmp(&rb.0)
                .then_with(|| ra.1.total_cmp(&rb.1))
                .then_with(|| ra.2.total_cmp(&rb.2))
                .is_ge();
            Some(if a_wins { a } else { b })
        }
        (a, b) => a.or(b),
    }
}

/// Worst status over reports and operational failures.
pub fn run_status<'a>(
    reports: impl IntoIterator<Item = &'a FileReport>,
    failures: &[OperationalFailure],
) -> Status {
    let data = reports
        .into_iter()
        .map(|r| r.status)
        .fold(Status::Green, Status::worst);
    if failures.is_empty() {
        data
    } else {
        Status::Red
    }
}

/// Reduce per-file reports and failures into a run summary.
pub fn summarize(
    reports: impl IntoIterator<Item = FileReport>,
    mut failures: Vec<OperationalFailure>,
) -> RunSummary {
    let mut file_reports: BTreeMap<String, FileReport> = BTreeMap::new();
    for report in reports {
        insert_report(&mut file_reports, report);
    }
    failures.sort();

    RunSummary {
        run_id: RunId::new(),
        generated_at: Utc::now(),
        status: run_status(file_reports.values(), &failures),
        file_reports,
        operational_failures: failures,
    }
}

/// Merge two partial summaries. Keeps the identity of `a`.
pub fn merge_summaries(a: RunSummary, b: RunSummary) -> RunSummary {
    let mut file_reports = a.file_reports;
    for report in b.file_reports.into_values() {
        insert_report(&mut file_reports, report);
    }
    let mut failures = a.operational_failures;
    failures.extend(b.operational_failures);
    failures.sort();

    RunSummary {
        run_id: a.run_id,
        generated_at: a.generated_at.max(b.generated_at),
        status: run_status(file_reports.values(), &failures),
        file_reports,
        operational_failures: failures,
    }
}

fn insert_report(reports: &mut BTreeMap<String, FileReport>, report: FileReport) {
    match reports.remove(&report.source_file) {
        Some(existing) => {
            let merged = merge_file_reports(existing, report);
            reports.insert(merged.source_file.clone(), merged);
        }
        None => {
            reports.insert(report.source_file.clone(), report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dqsentinel_core::SeriesKey;

    fn warning(kind: FindingKind) -> Finding {
        Finding::new(kind, Severity::Warning, kind.as_str())
    }

    fn blocking(kind: FindingKind) -> Finding {
        Finding::new(kind, Severity::Blocking, kind.as_str())
    }

    fn report(name: &str, findings: Vec<Finding>) -> FileReport {
        file_report(name, FileMeasures::default(), findings)
    }

    #[test]
    fn test_file_status_state_machine() {
        assert_eq!(file_status(&[]), Status::Green);
        assert_eq!(file_status(&[warning(FindingKind::CadenceGap)]), Status::Amber);
        assert_eq!(
            file_status(&[warning(FindingKind::CadenceGap), blocking(FindingKind::DuplicateKey)]),
            Status::Red
        );
    }

    #[test]
    fn test_file_report_counts() {
        let shift = |sku: &str| {
            warning(FindingKind::LevelShift).with_keys([SeriesKey::new(sku, "C1")])
        };
        let r = report(
            "a.csv",
            vec![shift("S1"), shift("S2"), warning(FindingKind::UnitPriceMixup)],
        );

        assert_eq!(r.level_shift_groups, 2);
        assert!(r.suspected_unit_price_mixup);
        assert_eq!(r.blocking, BlockingStatus::Pass);
        assert_eq!(r.status, Status::Amber);
    }

    #[test]
    fn test_blocking_finding_fails_file_and_run() {
        let summary = summarize(
            vec![
                report("a.csv", vec![]),
                report("b.csv", vec![blocking(FindingKind::SchemaMissingColumn)]),
            ],
            Vec::new(),
        );
        assert_eq!(summary.status, Status::Red);
        assert_eq!(summary.file_reports["b.csv"].blocking, BlockingStatus::Fail);
        assert_eq!(summary.exit_code(), 3);
    }

    #[test]
    fn test_no_findings_is_green() {
        let summary = summarize(vec![report("a.csv", vec![]), report("b.csv", vec![])], Vec::new());
        assert_eq!(summary.status, Status::Green);
        assert_eq!(summary.exit_code(), 0);
    }

    #[test]
    fn test_operational_failure_forces_red() {
        let failure = OperationalFailure {
            source_file: Some("a.csv".to_string()),
            stage: "level_shift".to_string(),
            message: "boom".to_string(),
        };
        let summary = summarize(vec![report("a.csv", vec![])], vec![failure]);
        assert_eq!(summary.status, Status::Red);
    }

    #[test]
    fn test_summary_order_independent() {
        let reports = vec![
            report("a.csv", vec![warning(FindingKind::Backfill)]),
            report("b.csv", vec![]),
            report("c.csv", vec![warning(FindingKind::CadenceGap), warning(FindingKind::LevelShift)]),
        ];
        let mut reversed = reports.clone();
        reversed.reverse();

        let forward = summarize(reports, Vec::new());
        let backward = summarize(reversed, Vec::new());
        assert_eq!(forward.status, backward.status);
        assert_eq!(forward.file_reports, backward.file_reports);
    }

    #[test]
    fn test_merge_summaries_is_monotone() {
        let green = summarize(vec![report("a.csv", vec![])], Vec::new());
        let amber = summarize(vec![report("b.csv", vec![warning(FindingKind::Backfill)])], Vec::new());
        let red = summarize(vec![report("c.csv", vec![blocking(FindingKind::DuplicateKey)])], Vec::new());

        let merged = merge_summaries(green.clone(), amber.clone());
        assert_eq!(merged.status, Status::Amber);
        let merged = merge_summaries(merged, red);
        assert_eq!(merged.status, Status::Red);
        let merged = merge_summaries(merged, green);
        assert_eq!(merged.status, Status::Red);
        assert_eq!(merged.file_reports.len(), 3);
    }

    #[test]
    fn test_same_file_reports_merge() {
        let a = file_report(
            "a.csv",
            FileMeasures {
                record_count: 10,
                duplicate_count: 2,
                deduped_count: 9,
                pct_backfilled: 0.0,
                seasonality: None,
            },
            vec![warning(FindingKind::DuplicateKey)],
        );
        let b = file_report(
            "a.csv",
            FileMeasures {
                record_count: 30,
                duplicate_count: 0,
                deduped_count: 30,
                pct_backfilled: 0.2,
                seasonality: None,
            },
            vec![warning(FindingKind::DuplicateKey)],
        );

        let summary = summarize(vec![a, b], Vec::new());
        let merged = &summary.file_reports["a.csv"];
        assert_eq!(merged.record_count, 40);
        assert_eq!(merged.duplicate_count, 2);
        assert_eq!(merged.deduped_count, 39);
        assert!((merged.pct_backfilled - 6.0 / 39.0).abs() < 1e-12);
        assert_eq!(merged.findings.len(), 1);
    }

    #[test]
    fn test_merge_weights_backfill_by_deduped_records() {
        // Ten raw rows collapse to two records, one of them late.
        let a = file_report(
            "a.csv",
            FileMeasures {
                record_count: 10,
                duplicate_count: 10,
                deduped_count: 2,
                pct_backfilled: 0.5,
                ..Default::default()
            },
            vec![],
        );
        let b = file_report(
            "a.csv",
            FileMeasures {
                record_count: 2,
                deduped_count: 2,
                ..Default::default()
            },
            vec![],
        );

        let merged = merge_file_reports(a, b);
        assert_eq!(merged.deduped_count, 4);
        assert!((merged.pct_backfilled - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_merge_keeps_longer_seasonality_history() {
        let profile = |n_weeks| SeasonalityProfile {
            n_weeks,
            enough_history: n_weeks >= 24,
            acf_lag1: Some(0.1),
            acf_lag52: None,
        };
        let with = |p: Option<SeasonalityProfile>| {
            file_report("a.csv", FileMeasures { seasonality: p, ..Default::default() }, vec![])
        };

        let merged = merge_file_reports(with(Some(profile(30))), with(Some(profile(60))));
        assert_eq!(merged.seasonality.map(|p| p.n_weeks), Some(60));
        let merged = merge_file_reports(with(Some(profile(60))), with(Some(profile(30))));
        assert_eq!(merged.seasonality.map(|p| p.n_weeks), Some(60));
        let merged = merge_file_reports(with(None), with(Some(profile(30))));
        assert_eq!(merged.seasonality.map(|p| p.n_weeks), Some(30));
    }
}
