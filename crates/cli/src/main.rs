//! DQ Sentinel CLI - data-quality gate for weekly retail extracts.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dqsentinel_core::{
    BlockingStatus, CalendarEntry, FileInput, Finding, OperationalFailure, PromoEntry, RunContext,
    RunId, RunSummary, SeasonalityProfile, SentinelConfig, Status, Time,
};
use dqsentinel_quality::SentinelEngine;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dq-sentinel")]
#[command(about = "Data-quality gate for weekly retail time series", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every file of a run manifest
    Check {
        /// Run manifest (JSON)
        #[arg(long)]
        input: PathBuf,
        /// Threshold overrides (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Directory for dq_summary.json and dq_findings.json
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Print the default thresholds
    Defaults,
}

/// Files and context tables handed over by the ingestion layer.
#[derive(Debug, Deserialize)]
struct Manifest {
    files: Vec<FileInput>,
    #[serde(default)]
    calendar: Vec<CalendarEntry>,
    #[serde(default)]
    promos: Vec<PromoEntry>,
}

#[derive(Serialize)]
struct SummaryDocument<'a> {
    run_id: &'a RunId,
    generated_at: &'a Time,
    status: Status,
    exit_code: u8,
    files: Vec<FileSummary<'a>>,
    operational_failures: &'a [OperationalFailure],
}

#[derive(Serialize)]
struct FileSummary<'a> {
    source_file: &'a str,
    record_count: usize,
    blocking: BlockingStatus,
    status: Status,
    duplicate_count: usize,
    deduped_count: usize,
    pct_backfilled: f64,
    suspected_unit_price_mixup: bool,
    level_shift_groups: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    seasonality: Option<SeasonalityProfile>,
    finding_count: usize,
}

#[derive(Serialize)]
struct FindingRow<'a> {
    source_file: &'a str,
    #[serde(flatten)]
    finding: &'a Finding,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Check { input, config, out_dir } => {
            let config = load_config(config.as_deref()).await?;
            let manifest = load_manifest(&input).await?;
            info!(files = manifest.files.len(), "Loaded run manifest from {}", input.display());

            let engine = SentinelEngine::new(config)?;
            let context = RunContext {
                calendar: manifest.calendar,
                promos: manifest.promos,
            };
            let summary = engine.run(manifest.files, context).await;

            write_artifacts(&summary, &out_dir).await?;
            println!(
                "{} {} ({} file(s), {} finding(s), {} operational failure(s))",
                summary.run_id,
                summary.status.as_str().to_uppercase(),
                summary.file_reports.len(),
                summary.findings().count(),
                summary.operational_failures.len(),
            );
            Ok(ExitCode::from(summary.exit_code()))
        }
        Commands::Defaults => {
            println!("{}", serde_json::to_string_pretty(&SentinelConfig::default())?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn load_config(path: Option<&Path>) -> Result<SentinelConfig> {
    let Some(path) = path else {
        return Ok(SentinelConfig::default());
    };
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    SentinelConfig::from_json(&text).with_context(|| format!("Invalid config {}", path.display()))
}

async fn load_manifest(path: &Path) -> Result<Manifest> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid manifest {}", path.display()))
}

async fn write_artifacts(summary: &RunSummary, out_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let document = SummaryDocument {
        run_id: &summary.run_id,
        generated_at: &summary.generated_at,
        status: summary.status,
        exit_code: summary.exit_code(),
        files: summary
            .file_reports
            .values()
            .map(|r| FileSummary {
                source_file: &r.source_file,
                record_count: r.record_count,
                blocking: r.blocking,
                status: r.status,
                duplicate_count: r.duplicate_count,
                deduped_count: r.deduped_count,
                pct_backfilled: r.pct_backfilled,
                suspected_unit_price_mixup: r.suspected_unit_price_mixup,
                level_shift_groups: r.level_shift_groups,
                seasonality: r.seasonality,
                finding_count: r.findings.len(),
            })
            .collect(),
        operational_failures: &summary.operational_failures,
    };
    let rows: Vec<FindingRow<'_>> = summary
        .findings()
        .map(|(source_file, finding)| FindingRow { source_file, finding })
        .collect();

    let summary_path = out_dir.join("dq_summary.json");
    tokio::fs::write(&summary_path, serde_json::to_vec_pretty(&document)?)
        .await
        .with_context(|| format!("Failed to write {}", summary_path.display()))?;

    let findings_path = out_dir.join("dq_findings.json");
    tokio::fs::write(&findings_path, serde_json::to_vec_pretty(&rows)?)
        .await
        .with_context(|| format!("Failed to write {}", findings_path.display()))?;

    info!(
        "Wrote {} and {}",
        summary_path.display(),
        findings_path.display()
    );
    Ok(())
}
