//! Schema validation and record construction.
//!
//! The only stage allowed to veto a file: a missing required column or a
//! value that prevents key formation or numeric checks rejects the file, and
//! no later check runs on it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use dqsentinel_core::{
    AffectedKey, FileInput, Finding, FindingKind, Record, Severity, Time, REQUIRED_COLUMNS,
};
use regex::Regex;

use crate::index::{weekday_finding, RecordSet};

/// Sample rows carried as evidence per type-mismatch finding.
const SAMPLE_ROWS: usize = 10;

/// Outcome of schema validation.
#[derive(Debug, Clone)]
pub enum Validated {
    /// Typed records ready for the remaining checks
    Valid {
        /// Indexed records
        records: RecordSet,
        /// Non-blocking schema findings
        findings: Vec<Finding>,
    },
    /// File cannot be checked further
    Rejected {
        /// Schema findings, at least one blocking
        findings: Vec<Finding>,
    },
}

impl Validated {
    /// Findings produced by validation, whatever the outcome.
    pub fn findings(&self) -> &[Finding] {
        match self {
            Validated::Valid { findings, .. } | Validated::Rejected { findings } => findings,
        }
    }
}

/// Semantic type a column must coerce to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Date,
    Identifier,
    Amount,
    Stock,
    Currency,
    Timestamp,
    Text,
}

impl ColumnType {
    fn of(column: &str) -> Self {
        match column {
            "week_start" => ColumnType::Date,
            "sku_id" | "store_id" => ColumnType::Identifier,
            "units" | "price" => ColumnType::Amount,
            "inventory_on_hand" => ColumnType::Stock,
            "currency" => ColumnType::Currency,
            "load_ts" => ColumnType::Timestamp,
            _ => ColumnType::Text,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            ColumnType::Date => "calendar date",
            ColumnType::Identifier => "non-empty identifier",
            ColumnType::Amount | ColumnType::Stock => "non-negative number",
            ColumnType::Currency => "ISO 4217 currency code",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Text => "non-empty text",
        }
    }

    /// Bad values in this column block key formation, dedup or numeric checks.
    fn blocks_downstream(&self) -> bool {
        matches!(
            self,
            ColumnType::Date | ColumnType::Identifier | ColumnType::Amount | ColumnType::Timestamp
        )
    }
}

/// Validate a file's columns and coerce its rows into records.
pub fn validate(input: &FileInput) -> Validated {
    let declared: BTreeSet<&str> = input.columns.iter().map(|c| c.trim()).collect();
    let mut findings = Vec::new();

    let extra: Vec<&str> = declared
        .iter()
        .copied()
        .filter(|c| !REQUIRED_COLUMNS.contains(c))
        .collect();
    if !extra.is_empty() {
        findings.push(
            Finding::new(
                FindingKind::SchemaExtraColumn,
                Severity::Warning,
                format!("Unexpected column(s): {}", extra.join(", ")),
            )
            .with_keys(extra.iter().map(|c| AffectedKey::Column(c.to_string())))
            .with_metric(extra.len() as f64),
        );
    }

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|c| !declared.contains(c))
        .collect();
    if !missing.is_empty() {
        findings.push(
            Finding::new(
                FindingKind::SchemaMissingColumn,
                Severity::Blocking,
                format!("Missing required column(s): {}", missing.join(", ")),
            )
            .with_keys(missing.iter().map(|c| AffectedKey::Column(c.to_string())))
            .with_metric(missing.len() as f64),
        );
        return Validated::Rejected { findings };
    }

    let mut bad_cells: BTreeMap<&'static str, Vec<usize>> = BTreeMap::new();
    let mut records = Vec::with_capacity(input.rows.len());

    for (row_idx, raw) in input.rows.iter().enumerate() {
        let cells: BTreeMap<&str, &str> = raw.iter().map(|(k, v)| (k.trim(), v.trim())).collect();
        let cell = |column: &str| cells.get(column).copied().unwrap_or("");

        let mut row_ok = true;
        for column in REQUIRED_COLUMNS {
            if !cell_is_valid(ColumnType::of(column), cell(column)) {
                bad_cells.entry(column).or_default().push(row_idx);
                if ColumnType::of(column).blocks_downstream() {
                    row_ok = false;
                }
            }
        }
        if !row_ok {
            continue;
        }

        // Blocking columns were checked above.
        let (Some(week_start), Some((load_ts, load_ts_offset))) =
            (parse_date(cell("week_start")), parse_timestamp(cell("load_ts")))
        else {
            continue;
        };
        let (Some(units), Some(price)) = (parse_amount(cell("units")), parse_amount(cell("price")))
        else {
            continue;
        };

        records.push(Record {
            week_start,
            sku_id: cell("sku_id").to_string(),
            store_id: cell("store_id").to_string(),
            units,
            price,
            inventory_on_hand: parse_amount(cell("inventory_on_hand")),
            currency: cell("currency").to_string(),
            load_ts,
            load_ts_offset,
            source_file: cell("source_file").to_string(),
            row: row_idx,
        });
    }

    let mut rejected = false;
    for (column, rows) in bad_cells {
        let column_type = ColumnType::of(column);
        let severity = if column_type.blocks_downstream() {
            rejected = true;
            Severity::Blocking
        } else {
            Severity::Warning
        };
        findings.push(
            Finding::new(
                FindingKind::SchemaTypeMismatch,
                severity,
                format!(
                    "Column '{}' has {} value(s) not coercible to {}",
                    column,
                    rows.len(),
                    column_type.describe()
                ),
            )
            .with_keys([AffectedKey::Column(column.to_string())])
            .with_metric(rows.len() as f64)
            .with_evidence("expected", column_type.describe())
            .with_evidence(
                "sample_rows",
                rows.iter().take(SAMPLE_ROWS).copied().collect::<Vec<_>>(),
            ),
        );
    }

    if rejected {
        return Validated::Rejected { findings };
    }

    let records = RecordSet::new(records);
    findings.extend(weekday_finding(&records));
    Validated::Valid { records, findings }
}

fn cell_is_valid(column_type: ColumnType, value: &str) -> bool {
    match column_type {
        ColumnType::Date => parse_date(value).is_some(),
        ColumnType::Identifier | ColumnType::Text => !value.is_empty(),
        ColumnType::Amount | ColumnType::Stock => parse_amount(value).is_some(),
        ColumnType::Currency => currency_pattern().is_some_and(|re| re.is_match(value)),
        ColumnType::Timestamp => parse_timestamp(value).is_some(),
    }
}

fn currency_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z]{3}$").ok()).as_ref()
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a calendar date, accepting a full timestamp and keeping its local date.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Some(dt) = parse_offset_datetime(value) {
        return Some(dt.date_naive());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|dt| dt.date())
}

/// Parse an ingestion timestamp into UTC plus the offset it was written with.
///
/// Naive timestamps and bare dates are taken as UTC and carry no offset.
pub fn parse_timestamp(value: &str) -> Option<(Time, Option<i32>)> {
    if let Some(dt) = parse_offset_datetime(value) {
        return Some((dt.with_timezone(&Utc), Some(dt.offset().local_minus_utc())));
    }
    if let Some(dt) = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
    {
        return Some((dt.and_utc(), None));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| (dt.and_utc(), None))
}

fn parse_offset_datetime(value: &str) -> Option<DateTime<chrono::FixedOffset>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%z"))
        .ok()
}

/// Parse a finite, non-negative number.
pub fn parse_amount(value: &str) -> Option<f64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}
