//! Key index over a file's records.
//!
//! Two views are built here:
//! - [`RecordSet`]: every validated record, indexed by primary key and series
//! - [`DedupedView`]: one record per week per series, the input of every
//!   check that runs after primary-key resolution
//!
//! [`ContextIndex`] holds the run-wide calendar and promo lookups.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, NaiveDate};
use dqsentinel_core::{
    CalendarEntry, DqError, Finding, FindingKind, PrimaryKey, Record, Result, RunContext,
    SeriesKey, Severity,
};

/// All records of one file with their key indexes.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    records: Vec<Record>,
    by_key: BTreeMap<PrimaryKey, Vec<usize>>,
    by_series: BTreeMap<SeriesKey, Vec<usize>>,
}

impl RecordSet {
    /// Index a set of records.
    pub fn new(records: Vec<Record>) -> Self {
        let mut by_key: BTreeMap<PrimaryKey, Vec<usize>> = BTreeMap::new();
        let mut by_series: BTreeMap<SeriesKey, Vec<usize>> = BTreeMap::new();

        for (idx, record) in records.iter().enumerate() {
            by_key.entry(record.key()).or_default().push(idx);
            by_series.entry(record.series_key()).or_default().push(idx);
        }
        for indices in by_series.values_mut() {
            indices.sort_by_key(|&i| (records[i].week_start, records[i].row));
        }

        Self {
            records,
            by_key,
            by_series,
        }
    }

    /// Records in input order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record indices grouped by primary key.
    pub fn by_key(&self) -> &BTreeMap<PrimaryKey, Vec<usize>> {
        &self.by_key
    }

    /// Primary keys held by more than one record.
    pub fn duplicate_groups(&self) -> impl Iterator<Item = (&PrimaryKey, Vec<&Record>)> {
        self.by_key
            .iter()
            .filter(|(_, indices)| indices.len() > 1)
            .map(|(key, indices)| (key, indices.iter().map(|&i| &self.records[i]).collect()))
    }

    /// Records of each series, ascending by week.
    pub fn series(&self) -> impl Iterator<Item = (&SeriesKey, Vec<&Record>)> {
        self.by_series
            .iter()
            .map(|(key, indices)| (key, indices.iter().map(|&i| &self.records[i]).collect()))
    }
}

/// Warn about records whose `week_start` is not a Monday.
pub fn weekday_finding(set: &RecordSet) -> Option<Finding> {
    let off_day: Vec<&Record> = set.records().iter().filter(|r| !r.is_monday()).collect();
    if off_day.is_empty() {
        return None;
    }

    let weekdays: BTreeSet<String> = off_day
        .iter()
        .map(|r| chrono::Datelike::weekday(&r.week_start).to_string())
        .collect();

    Some(
        Finding::new(
            FindingKind::SchemaTypeMismatch,
            Severity::Warning,
            format!("{} record(s) have a week_start that is not a Monday", off_day.len()),
        )
        .with_keys(off_day.iter().map(|r| r.key()))
        .with_metric(off_day.len() as f64)
        .with_evidence("column", "week_start")
        .with_evidence("weekdays", weekdays.into_iter().collect::<Vec<_>>()),
    )
}

/// One `(sku_id, store_id)` series with at most one record per week.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    /// Series identity
    pub key: SeriesKey,

    /// Records, strictly ascending by `week_start`
    pub records: Vec<Record>,
}

impl Series {
    /// Number of observations.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the series has no observations.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Units in week order.
    pub fn units(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.units).collect()
    }

    /// Prices in week order.
    pub fn prices(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.price).collect()
    }

    /// Record for an exact week, if present.
    pub fn at(&self, week: NaiveDate) -> Option<&Record> {
        self.records
            .binary_search_by_key(&week, |r| r.week_start)
            .ok()
            .map(|i| &self.records[i])
    }
}

/// Deduplicated, series-grouped view of a file.
#[derive(Debug, Clone, Default)]
pub struct DedupedView {
    series: Vec<Series>,
    record_count: usize,
}

impl DedupedView {
    /// Group deduplicated records into series.
    ///
    /// Fails if two records of one series share a week: callers must resolve
    /// primary keys first.
    pub fn new(records: Vec<Record>) -> Result<Self> {
        let record_count = records.len();
        let mut grouped: BTreeMap<SeriesKey, Vec<Record>> = BTreeMap::new();
        for record in records {
            grouped.entry(record.series_key()).or_default().push(record);
        }

        let mut series = Vec::with_capacity(grouped.len());
        for (key, mut records) in grouped {
            records.sort_by_key(|r| r.week_start);
            if let Some(pair) = records.windows(2).find(|w| w[0].week_start >= w[1].week_start) {
                return Err(DqError::NonComparableSeries {
                    series: key.to_string(),
                    reason: format!("week {} appears more than once", pair[1].week_start),
                });
            }
            series.push(Series { key, records });
        }

        Ok(Self {
            series,
            record_count,
        })
    }

    /// Series in key order.
    pub fn series(&self) -> &[Series] {
        &self.series
    }

    /// Every record, series by series.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.series.iter().flat_map(|s| s.records.iter())
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.record_count
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }
}

/// Calendar and promo lookups shared by every file of a run.
#[derive(Debug, Clone, Default)]
pub struct ContextIndex {
    calendar: BTreeMap<NaiveDate, CalendarEntry>,
    promos: BTreeSet<PrimaryKey>,
}

impl ContextIndex {
    /// Build the lookups. Inactive promo rows are ignored.
    pub fn new(context: &RunContext) -> Self {
        let calendar = context
            .calendar
            .iter()
            .map(|entry| (entry.week_start, entry.clone()))
            .collect();
        let promos = context
            .promos
            .iter()
            .filter(|p| p.is_active())
            .map(|p| PrimaryKey {
                week_start: p.week_start,
                sku_id: p.sku_id.clone(),
                store_id: p.store_id.clone(),
            })
            .collect();

        Self { calendar, promos }
    }

    /// Whether an official calendar was supplied.
    pub fn has_calendar(&self) -> bool {
        !self.calendar.is_empty()
    }

    /// Calendar weeks strictly between two dates.
    pub fn calendar_weeks_between(&self, after: NaiveDate, before: NaiveDate) -> Vec<NaiveDate> {
        if after >= before {
            return Vec::new();
        }
        self.calendar
            .range(after.succ_opt().unwrap_or(after)..before)
            .map(|(week, _)| *week)
            .collect()
    }

    /// Calendar entry for an exact week.
    pub fn calendar_entry(&self, week: NaiveDate) -> Option<&CalendarEntry> {
        self.calendar.get(&week)
    }

    /// Holiday weeks within `window_weeks` of `week`. A negative window is empty.
    pub fn holiday_near(&self, week: NaiveDate, window_weeks: i64) -> Option<&CalendarEntry> {
        if window_weeks < 0 {
            return None;
        }
        let span = Duration::weeks(window_weeks);
        self.calendar
            .range(week - span..=week + span)
            .map(|(_, entry)| entry)
            .find(|entry| entry.holiday_flag)
    }

    /// Whether an active promo ran for the series within `window_weeks` of `week`.
    pub fn promo_near(&self, series: &SeriesKey, week: NaiveDate, window_weeks: i64) -> bool {
        if window_weeks < 0 {
            return false;
        }
        let span = Duration::weeks(window_weeks);
        let lo = PrimaryKey {
            week_start: week - span,
            sku_id: series.sku_id.clone(),
            store_id: series.store_id.clone(),
        };
        let hi = PrimaryKey {
            week_start: week + span,
            sku_id: series.sku_id.clone(),
            store_id: series.store_id.clone(),
        };
        self.promos
            .range(lo..=hi)
            .any(|key| key.sku_id == series.sku_id && key.store_id == series.store_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use dqsentinel_core::PromoEntry;

    fn record(week: NaiveDate, sku: &str, store: &str, row: usize) -> Record {
        Record {
            week_start: week,
            sku_id: sku.to_string(),
            store_id: store.to_string(),
            units: 10.0,
            price: 5.0,
            inventory_on_hand: Some(100.0),
            currency: "USD".to_string(),
            load_ts: Utc.with_ymd_and_hms(2023, 1, 3, 0, 0, 0).unwrap(),
            load_ts_offset: None,
            source_file: "erp.csv".to_string(),
            row,
        }
    }

    fn monday(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, 2).unwrap() + Duration::weeks(n)
    }

    #[test]
    fn test_record_set_groups_by_key_and_series() {
        let set = RecordSet::new(vec![
            record(monday(1), "S1", "C1", 0),
            record(monday(0), "S1", "C1", 1),
            record(monday(0), "S1", "C1", 2),
            record(monday(0), "S2", "C1", 3),
        ]);

        assert_eq!(set.len(), 4);
        assert_eq!(set.duplicate_groups().count(), 1);

        let series: Vec<_> = set.series().collect();
        assert_eq!(series.len(), 2);
        let weeks: Vec<_> = series[0].1.iter().map(|r| r.week_start).collect();
        assert_eq!(weeks, vec![monday(0), monday(0), monday(1)]);
    }

    #[test]
    fn test_weekday_finding_flags_non_mondays() {
        let sunday = monday(1) - Duration::days(1);
        let set = RecordSet::new(vec![
            record(monday(0), "S1", "C1", 0),
            record(sunday, "S1", "C1", 1),
        ]);

        let finding = weekday_finding(&set).unwrap();
        assert_eq!(finding.kind, FindingKind::SchemaTypeMismatch);
        assert_eq!(finding.severity, Severity::Warning);
        assert_eq!(finding.metric, 1.0);
        assert!(weekday_finding(&RecordSet::new(vec![record(monday(0), "S1", "C1", 0)])).is_none());
    }

    #[test]
    fn test_deduped_view_rejects_repeated_week() {
        let result = DedupedView::new(vec![
            record(monday(0), "S1", "C1", 0),
            record(monday(0), "S1", "C1", 1),
        ]);
        assert!(matches!(result, Err(DqError::NonComparableSeries { .. })));
    }

    #[test]
    fn test_deduped_view_sorts_series() {
        let view = DedupedView::new(vec![
            record(monday(2), "S1", "C1", 0),
            record(monday(0), "S1", "C1", 1),
            record(monday(1), "S1", "C1", 2),
        ])
        .unwrap();

        assert_eq!(view.len(), 3);
        let series = &view.series()[0];
        assert_eq!(series.records[0].week_start, monday(0));
        assert!(series.at(monday(1)).is_some());
        assert!(series.at(monday(5)).is_none());
    }

    #[test]
    fn test_context_lookups() {
        let context = RunContext {
            calendar: vec![
                CalendarEntry { week_start: monday(0), holiday_flag: false, fiscal_week: Some(1) },
                CalendarEntry { week_start: monday(1), holiday_flag: true, fiscal_week: Some(2) },
                CalendarEntry { week_start: monday(2), holiday_flag: false, fiscal_week: Some(3) },
            ],
            promos: vec![PromoEntry {
                week_start: monday(4),
                sku_id: "S1".to_string(),
                store_id: "C1".to_string(),
                discount: 0.2,
                bundle: false,
                display: false,
            }],
        };
        let index = ContextIndex::new(&context);
        let series = SeriesKey::new("S1", "C1");

        assert!(index.has_calendar());
        assert_eq!(index.calendar_weeks_between(monday(0), monday(2)), vec![monday(1)]);
        assert!(index.holiday_near(monday(2), 1).is_some());
        assert!(index.holiday_near(monday(3), 1).is_none());
        assert!(index.promo_near(&series, monday(5), 1));
        assert!(!index.promo_near(&series, monday(6), 1));
        assert!(!index.promo_near(&SeriesKey::new("S2", "C1"), monday(4), 1));
        assert!(index.holiday_near(monday(1), 0).is_some());
        assert!(index.promo_near(&series, monday(4), 0));
    }

    #[test]
    fn test_negative_window_finds_nothing() {
        let context = RunContext {
            calendar: vec![CalendarEntry {
                week_start: monday(1),
                holiday_flag: true,
                fiscal_week: None,
            }],
            promos: vec![PromoEntry {
                week_start: monday(1),
                sku_id: "S1".to_string(),
                store_id: "C1".to_string(),
                discount: 0.1,
                bundle: false,
                display: false,
            }],
        };
        let index = ContextIndex::new(&context);

        assert!(index.holiday_near(monday(1), -1).is_none());
        assert!(!index.promo_near(&SeriesKey::new("S1", "C1"), monday(1), -1));
    }
}
