//! Sentinel engine.
//!
//! Files are analyzed independently on a bounded pool of blocking workers.
//! Inside a file the stages run in a fixed order: schema, primary keys,
//! then every registered check over the deduplicated view. A check that
//! errors or panics becomes an operational failure; the remaining checks
//! still run.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dqsentinel_core::{
    FileInput, FileReport, OperationalFailure, Result, RunContext, RunSummary, SentinelConfig,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::index::{ContextIndex, DedupedView};
use crate::pk::check_primary_keys;
use crate::registry::{CheckInput, CheckRegistry};
use crate::schema::{self, Validated};
use crate::scoring::{self, FileMeasures};

/// Outcome of analyzing one file.
#[derive(Debug, Clone)]
pub struct FileAnalysis {
    /// Report built from every stage that completed
    pub report: FileReport,

    /// Stages that could not complete
    pub failures: Vec<OperationalFailure>,
}

/// Run the full pipeline over one file.
pub fn analyze_file(
    input: &FileInput,
    context: &ContextIndex,
    registry: &CheckRegistry,
    config: &SentinelConfig,
) -> FileAnalysis {
    let source_file = input.source_file.as_str();

    let (records, mut findings) = match schema::validate(input) {
        Validated::Valid { records, findings } => (records, findings),
        Validated::Rejected { findings } => {
            tracing::warn!(file = source_file, "File rejected by schema validation");
            return FileAnalysis {
                report: scoring::file_report(source_file, FileMeasures::default(), findings),
                failures: Vec::new(),
            };
        }
    };

    let pk = check_primary_keys(&records);
    findings.extend(pk.findings);
    let mut measures = FileMeasures {
        record_count: records.len(),
        duplicate_count: pk.duplicate_count,
        deduped_count: pk.deduped.len(),
        ..Default::default()
    };
    let mut failures = Vec::new();

    match DedupedView::new(pk.deduped) {
        Ok(view) => {
            let check_input = CheckInput {
                source_file,
                view: &view,
                context,
                config,
            };
            for check in registry.iter() {
                tracing::debug!(file = source_file, check = check.name(), "Running check");
                let outcome = catch_unwind(AssertUnwindSafe(|| check.run(&check_input)))
                    .unwrap_or_else(|payload| Err(panic_error(payload)));

                match outcome {
                    Ok(output) => {
                        findings.extend(output.findings);
                        if let Some(pct) = output.pct_backfilled {
                            measures.pct_backfilled = pct;
                        }
                        if output.seasonality.is_some() {
                            measures.seasonality = output.seasonality;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(file = source_file, check = check.name(), "Check failed: {}", e);
                        failures.push(failure(Some(source_file), check.name(), e.to_string()));
                    }
                }
            }
        }
        Err(e) => {
            tracing::warn!(file = source_file, "Cannot build deduplicated view: {}", e);
            failures.push(failure(Some(source_file), "dedup", e.to_string()));
        }
    }

    FileAnalysis {
        report: scoring::file_report(source_file, measures, findings),
        failures,
    }
}

fn failure(source_file: Option<&str>, stage: &str, message: String) -> OperationalFailure {
    OperationalFailure {
        source_file: source_file.map(str::to_string),
        stage: stage.to_string(),
        message,
    }
}

fn panic_error(payload: Box<dyn Any + Send>) -> dqsentinel_core::DqError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    dqsentinel_core::DqError::Other(format!("panicked: {message}"))
}

/// Runs a batch of files through the registered checks.
#[derive(Debug, Clone)]
pub struct SentinelEngine {
    config: Arc<SentinelConfig>,
    registry: Arc<CheckRegistry>,
}

impl SentinelEngine {
    /// Create an engine with the standard checks.
    pub fn new(config: SentinelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(CheckRegistry::standard()),
        })
    }

    /// Replace the check registry.
    pub fn with_registry(mut self, registry: CheckRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Active thresholds.
    pub fn config(&self) -> &SentinelConfig {
        &self.config
    }

    /// Registered checks.
    pub fn registry(&self) -> &CheckRegistry {
        &self.registry
    }

    /// Analyze one file on the current thread.
    pub fn analyze(&self, input: &FileInput, context: &ContextIndex) -> FileAnalysis {
        analyze_file(input, context, &self.registry, &self.config)
    }

    /// Analyze every file and reduce the results into one summary.
    pub async fn run(&self, files: Vec<FileInput>, context: RunContext) -> RunSummary {
        let context = Arc::new(ContextIndex::new(&context));
        let workers = self.config.max_workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        tracing::info!(files = files.len(), workers, "Starting data-quality run");

        let mut reports = Vec::with_capacity(files.len());
        let mut failures = Vec::new();
        let mut tasks = JoinSet::new();

        for file in files {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    failures.push(failure(Some(file.source_file.as_str()), "schedule", e.to_string()));
                    continue;
                }
            };
            let context = Arc::clone(&context);
            let registry = Arc::clone(&self.registry);
            let config = Arc::clone(&self.config);

            tasks.spawn_blocking(move || {
                let _permit = permit;
                catch_unwind(AssertUnwindSafe(|| {
                    analyze_file(&file, &context, &registry, &config)
                }))
                .map_err(|payload| {
                    failure(
                        Some(file.source_file.as_str()),
                        "analyze",
                        panic_error(payload).to_string(),
                    )
                })
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(analysis)) => {
                    tracing::debug!(
                        file = %analysis.report.source_file,
                        status = %analysis.report.status,
                        findings = analysis.report.findings.len(),
                        "File analyzed"
                    );
                    reports.push(analysis.report);
                    failures.extend(analysis.failures);
                }
                Ok(Err(f)) => {
                    tracing::warn!(file = ?f.source_file, "File analysis panicked: {}", f.message);
                    failures.push(f);
                }
                Err(e) => {
                    tracing::warn!("Worker did not complete: {}", e);
                    failures.push(failure(None, "analyze", e.to_string()));
                }
            }
        }

        let summary = scoring::summarize(reports, failures);
        tracing::info!(
            run_id = %summary.run_id,
            status = %summary.status,
            files = summary.file_reports.len(),
            failures = summary.operational_failures.len(),
            "Data-quality run finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Check, CheckOutput};
    use dqsentinel_core::{
        BlockingStatus, DqError, FindingKind, RawRow, Status, REQUIRED_COLUMNS,
    };

    fn row(week: &str, sku: &str, units: &str, load_ts: &str) -> RawRow {
        [
            ("week_start", week),
            ("sku_id", sku),
            ("store_id", "C1"),
            ("units", units),
            ("price", "4.99"),
            ("inventory_on_hand", "100"),
            ("currency", "USD"),
            ("load_ts", load_ts),
            ("source_file", "erp.csv"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn clean_file(name: &str) -> FileInput {
        let mut input = FileInput::new(name, REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect());
        input.rows = vec![
            row("2023-01-02", "S1", "10", "2023-01-04T06:00:00Z"),
            row("2023-01-09", "S1", "11", "2023-01-11T06:00:00Z"),
            row("2023-01-16", "S1", "12", "2023-01-18T06:00:00Z"),
        ];
        input
    }

    struct Failing;

    impl Check for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn run(&self, _input: &CheckInput<'_>) -> Result<CheckOutput> {
            Err(DqError::Other("upstream table unavailable".to_string()))
        }
    }

    struct Panicking;

    impl Check for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn run(&self, _input: &CheckInput<'_>) -> Result<CheckOutput> {
            panic!("detector bug")
        }
    }

    fn engine() -> SentinelEngine {
        SentinelEngine::new(SentinelConfig { max_workers: 2, ..Default::default() }).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SentinelConfig { max_workers: 0, ..Default::default() };
        assert!(SentinelEngine::new(config).is_err());
    }

    #[test]
    fn test_analyze_clean_file() {
        let analysis = engine().analyze(&clean_file("a.csv"), &ContextIndex::default());

        assert!(analysis.failures.is_empty());
        assert_eq!(analysis.report.record_count, 3);
        assert_eq!(analysis.report.deduped_count, 3);
        assert_eq!(analysis.report.status, Status::Green);
        let seasonality = analysis.report.seasonality.unwrap();
        assert_eq!(seasonality.n_weeks, 3);
        assert!(!seasonality.enough_history);
    }

    #[test]
    fn test_deduped_count_excludes_superseded_loads() {
        let mut input = clean_file("a.csv");
        input
            .rows
            .push(row("2023-01-09", "S1", "11", "2023-01-12T06:00:00Z"));

        let analysis = engine().analyze(&input, &ContextIndex::default());
        assert_eq!(analysis.report.record_count, 4);
        assert_eq!(analysis.report.duplicate_count, 2);
        assert_eq!(analysis.report.deduped_count, 3);
    }

    #[test]
    fn test_rejected_file_skips_checks() {
        let mut input = clean_file("a.csv");
        input.columns.retain(|c| c != "currency");

        let analysis = engine().analyze(&input, &ContextIndex::default());
        assert_eq!(analysis.report.record_count, 0);
        assert_eq!(analysis.report.blocking, BlockingStatus::Fail);
        assert!(analysis
            .report
            .findings
            .iter()
            .all(|f| f.kind == FindingKind::SchemaMissingColumn));
    }

    #[test]
    fn test_failing_check_is_operational_failure() {
        let mut registry = CheckRegistry::standard();
        registry.register(Box::new(Failing)).unwrap();
        let engine = engine().with_registry(registry);

        let analysis = engine.analyze(&clean_file("a.csv"), &ContextIndex::default());
        assert_eq!(analysis.failures.len(), 1);
        assert_eq!(analysis.failures[0].stage, "failing");
        assert_eq!(analysis.report.status, Status::Green);
    }

    #[tokio::test]
    async fn test_run_reports_every_file() {
        let summary = engine()
            .run(
                vec![clean_file("a.csv"), clean_file("b.csv"), clean_file("c.csv")],
                RunContext::default(),
            )
            .await;

        assert_eq!(summary.file_reports.len(), 3);
        assert_eq!(summary.status, Status::Green);
        assert_eq!(summary.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_panicking_check_forces_red() {
        let mut registry = CheckRegistry::new();
        registry.register(Box::new(Panicking)).unwrap();
        let engine = engine().with_registry(registry);

        let summary = engine.run(vec![clean_file("a.csv")], RunContext::default()).await;
        assert_eq!(summary.status, Status::Red);
        assert_eq!(summary.operational_failures.len(), 1);
        assert_eq!(summary.operational_failures[0].stage, "panicking");
        assert!(summary.operational_failures[0].message.contains("detector bug"));
        assert_eq!(summary.file_reports["a.csv"].status, Status::Green);
    }

    #[tokio::test]
    async fn test_empty_batch_is_green() {
        let summary = engine().run(Vec::new(), RunContext::default()).await;
        assert!(summary.file_reports.is_empty());
        assert_eq!(summary.status, Status::Green);
    }
}
