//! Record model - one weekly observation plus its keys and run context.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::Time;

/// Columns every input file must declare.
pub const REQUIRED_COLUMNS: [&str; 9] = [
    "week_start",
    "sku_id",
    "store_id",
    "units",
    "price",
    "inventory_on_hand",
    "currency",
    "load_ts",
    "source_file",
];

/// Identity of a series: one SKU in one store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    /// SKU identifier
    pub sku_id: String,

    /// Store identifier
    pub store_id: String,
}

impl SeriesKey {
    /// Create a series key.
    pub fn new(sku_id: impl Into<String>, store_id: impl Into<String>) -> Self {
        Self {
            sku_id: sku_id.into(),
            store_id: store_id.into(),
        }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.sku_id, self.store_id)
    }
}

/// Primary key of an observation: `(week_start, sku_id, store_id)`.
///
/// Field order matters: the derived `Ord` sorts by week first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrimaryKey {
    /// Week start date
    pub week_start: NaiveDate,

    /// SKU identifier
    pub sku_id: String,

    /// Store identifier
    pub store_id: String,
}

impl PrimaryKey {
    /// The series this key belongs to.
    pub fn series(&self) -> SeriesKey {
        SeriesKey::new(self.sku_id.clone(), self.store_id.clone())
    }
}

impl std::fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}|{}", self.week_start, self.sku_id, self.store_id)
    }
}

/// One typed observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Week start date (expected to be a Monday)
    pub week_start: NaiveDate,

    /// SKU identifier
    pub sku_id: String,

    /// Store identifier
    pub store_id: String,

    /// Units sold
    pub units: f64,

    /// Unit price in `currency`
    pub price: f64,

    /// Inventory on hand at week end; `None` when the cell was not a valid amount
    pub inventory_on_hand: Option<f64>,

    /// ISO 4217 currency code
    pub currency: String,

    /// Ingestion timestamp, normalized to UTC
    pub load_ts: Time,

    /// UTC offset in seconds as written in the raw `load_ts`, if it carried one
    pub load_ts_offset: Option<i32>,

    /// Source file named on the row
    pub source_file: String,

    /// Zero-based row number in the input file
    pub row: usize,
}

impl Record {
    /// Primary key of this record.
    pub fn key(&self) -> PrimaryKey {
        PrimaryKey {
            week_start: self.week_start,
            sku_id: self.sku_id.clone(),
            store_id: self.store_id.clone(),
        }
    }

    /// Series this record belongs to.
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(self.sku_id.clone(), self.store_id.clone())
    }

    /// Days between `week_start` and the UTC date of `load_ts`.
    pub fn lag_days(&self) -> i64 {
        (self.load_ts.date_naive() - self.week_start).num_days()
    }

    /// Whether `week_start` falls on a Monday.
    pub fn is_monday(&self) -> bool {
        self.week_start.weekday() == Weekday::Mon
    }
}

/// One untyped row: column name to raw cell text.
pub type RawRow = BTreeMap<String, String>;

/// One input file as handed over by the ingestion layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileInput {
    /// File name used as the report key
    pub source_file: String,

    /// Declared column set, in header order
    pub columns: Vec<String>,

    /// Split but uncoerced rows
    #[serde(default)]
    pub rows: Vec<RawRow>,
}

impl FileInput {
    /// Create an empty input for `source_file` with the given header.
    pub fn new(source_file: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            source_file: source_file.into(),
            columns,
            rows: Vec::new(),
        }
    }
}

/// One row of the official retail calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEntry {
    /// Week start date
    pub week_start: NaiveDate,

    /// Whether the week contains a holiday
    #[serde(default)]
    pub holiday_flag: bool,

    /// Fiscal week number
    #[serde(default)]
    pub fiscal_week: Option<u32>,
}

/// One row of the promotion table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoEntry {
    /// Week start date
    pub week_start: NaiveDate,

    /// SKU identifier
    pub sku_id: String,

    /// Store identifier
    pub store_id: String,

    /// Discount fraction
    #[serde(default)]
    pub discount: f64,

    /// Bundle offer running
    #[serde(default)]
    pub bundle: bool,

    /// In-store display running
    #[serde(default)]
    pub display: bool,
}

impl PromoEntry {
    /// Whether any promotion mechanic is actually running.
    pub fn is_active(&self) -> bool {
        self.discount > 0.0 || self.bundle || self.display
    }
}

/// Optional context tables shared by every file of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunContext {
    /// Official calendar, if supplied
    #[serde(default)]
    pub calendar: Vec<CalendarEntry>,

    /// Promotion table, if supplied
    #[serde(default)]
    pub promos: Vec<PromoEntry>,
}
