//! Shared fixtures: an in-memory market behind the provider seam and a
//! sleeper that records instead of waiting.

#![allow(dead_code)]

use barsync_core::data::{DataError, DataProvider, ProviderFrame, TimestampCodec};
use barsync_core::domain::{Bar, Granularity};
use barsync_core::store::StoreFile;
use barsync_core::sync::{Sleeper, SyncEngine};
use barsync_core::SyncConfig;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use polars::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<std::time::Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<std::time::Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: std::time::Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub ticker: String,
    pub granularity: Granularity,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Serves bars from a fixed set of timestamps per (ticker, granularity).
///
/// With `slop` set, responses also include bars up to `slop` before the
/// requested start, like a provider rounding window edges outward.
#[derive(Default)]
pub struct MarketProvider {
    bars: Mutex<HashMap<(String, Granularity), Vec<DateTime<Utc>>>>,
    failures: Mutex<HashMap<String, VecDeque<DataError>>>,
    malformed: Mutex<HashSet<String>>,
    calls: Mutex<Vec<Call>>,
    slop: Mutex<Option<Duration>>,
    blocked: Mutex<bool>,
}

impl MarketProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self, ticker: &str, granularity: Granularity, timestamps: Vec<DateTime<Utc>>) {
        self.bars
            .lock()
            .unwrap()
            .insert((ticker.to_string(), granularity), timestamps);
    }

    /// Daily bars on every weekday in `[first, last]`.
    pub fn list_daily(&self, ticker: &str, first: NaiveDate, last: NaiveDate) {
        self.list(ticker, Granularity::Daily, weekdays(first, last));
    }

    /// Seven hourly bars (14:30..20:30 UTC) on every weekday in `[first, last]`.
    pub fn list_hourly(&self, ticker: &str, first: NaiveDate, last: NaiveDate) {
        let stamps = weekdays(first, last)
            .into_iter()
            .flat_map(|d| (0..7).map(move |h| d + Duration::minutes(14 * 60 + 30) + Duration::hours(h)))
            .collect();
        self.list(ticker, Granularity::Intraday, stamps);
    }

    pub fn fail_next(&self, ticker: &str, errors: Vec<DataError>) {
        self.failures
            .lock()
            .unwrap()
            .entry(ticker.to_string())
            .or_default()
            .extend(errors);
    }

    pub fn serve_malformed(&self, ticker: &str) {
        self.malformed.lock().unwrap().insert(ticker.to_string());
    }

    pub fn with_slop(self, slop: Duration) -> Self {
        *self.slop.lock().unwrap() = Some(slop);
        self
    }

    pub fn block(&self) {
        *self.blocked.lock().unwrap() = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl DataProvider for MarketProvider {
    fn name(&self) -> &str {
        "market"
    }

    fn fetch(
        &self,
        ticker: &str,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ProviderFrame, DataError> {
        self.calls.lock().unwrap().push(Call {
            ticker: ticker.to_string(),
            granularity,
            start,
            end,
        });
        if let Some(error) = self
            .failures
            .lock()
            .unwrap()
            .get_mut(ticker)
            .and_then(|q| q.pop_front())
        {
            return Err(error);
        }

        let from = match *self.slop.lock().unwrap() {
            Some(slop) => start - slop,
            None => start,
        };
        let stamps: Vec<DateTime<Utc>> = self
            .bars
            .lock()
            .unwrap()
            .get(&(ticker.to_string(), granularity))
            .map(|all| all.iter().copied().filter(|ts| *ts >= from && *ts < end).collect())
            .unwrap_or_default();

        if self.malformed.lock().unwrap().contains(ticker) {
            let frame = df!("Date" => ["2024-01-11"], "Close" => [1.0]).unwrap();
            return Ok(ProviderFrame::new(frame));
        }
        Ok(frame_for(granularity, &stamps))
    }

    fn is_available(&self) -> bool {
        !*self.blocked.lock().unwrap()
    }
}

/// Provider-shaped frame; prices are derived from the timestamp.
pub fn frame_for(granularity: Granularity, stamps: &[DateTime<Utc>]) -> ProviderFrame {
    if stamps.is_empty() {
        return ProviderFrame::default();
    }
    let (name, text): (&str, Vec<String>) = match granularity {
        Granularity::Daily => (
            "Date",
            stamps.iter().map(|t| t.format("%Y-%m-%d").to_string()).collect(),
        ),
        Granularity::Intraday => ("Datetime", stamps.iter().map(|t| t.to_rfc3339()).collect()),
    };
    let price: Vec<f64> = stamps
        .iter()
        .map(|t| 100.0 + (t.timestamp() % 10_000) as f64 / 100.0)
        .collect();
    let volume: Vec<i64> = stamps.iter().map(|_| 1_000).collect();
    let frame = DataFrame::new(vec![
        Column::new(name.into(), text),
        Column::new("Open".into(), price.clone()),
        Column::new("High".into(), price.clone()),
        Column::new("Low".into(), price.clone()),
        Column::new("Close".into(), price.clone()),
        Column::new("Adj Close".into(), price),
        Column::new("Volume".into(), volume),
    ])
    .unwrap();
    ProviderFrame::new(frame)
}

pub fn weekdays(first: NaiveDate, last: NaiveDate) -> Vec<DateTime<Utc>> {
    use chrono::{Datelike, Weekday};
    first
        .iter_days()
        .take_while(|d| *d <= last)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .map(|d| Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap()))
        .collect()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

/// Fixed clock for every test run: Saturday 2024-01-20, 12:00 UTC.
pub fn now() -> DateTime<Utc> {
    utc(2024, 1, 20, 12)
}

pub fn config_in(dir: &TempDir) -> SyncConfig {
    SyncConfig {
        start_date: date(2024, 1, 2),
        daily_store: dir.path().join("prices_daily.csv"),
        intraday_store: dir.path().join("prices_hourly.csv"),
        universe_source: dir.path().join("nasdaq_screener.csv"),
        batch_size: 2,
        ..SyncConfig::default()
    }
}

pub fn engine(
    config: &SyncConfig,
    provider: &Arc<MarketProvider>,
    sleeper: &Arc<RecordingSleeper>,
) -> SyncEngine {
    SyncEngine::new(config, provider.clone(), sleeper.clone())
        .unwrap()
        .with_now(now())
}

pub fn store(config: &SyncConfig, granularity: Granularity) -> StoreFile {
    StoreFile::new(
        config.store_path(granularity),
        granularity,
        TimestampCodec::default(),
    )
}

/// Seed a store with daily bars for `ticker` on the given dates.
pub fn seed_daily(config: &SyncConfig, ticker: &str, days: &[NaiveDate]) {
    let store = store(config, Granularity::Daily);
    store.ensure_header().unwrap();
    let bars: Vec<Bar> = days
        .iter()
        .map(|d| Bar {
            ticker: ticker.to_string(),
            granularity: Granularity::Daily,
            timestamp: Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap()),
            adj_close: Some(1.0),
            close: Some(1.0),
            high: Some(1.0),
            low: Some(1.0),
            open: Some(1.0),
            volume: 10,
        })
        .collect();
    store.append(&bars).unwrap();
}

/// Data rows of a store file as (ticker, timestamp text), header skipped.
pub fn rows(path: &Path) -> Vec<(String, String)> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .unwrap();
    reader
        .records()
        .map(|r| {
            let r = r.unwrap();
            (r[0].to_string(), r[2].to_string())
        })
        .collect()
}

/// Row count per ticker.
pub fn counts(path: &Path) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for (ticker, _) in rows(path) {
        *counts.entry(ticker).or_insert(0) += 1;
    }
    counts
}

/// True when no (ticker, timestamp) pair repeats.
pub fn no_duplicates(path: &Path) -> bool {
    let all = rows(path);
    let distinct: HashSet<_> = all.iter().collect();
    distinct.len() == all.len()
}
