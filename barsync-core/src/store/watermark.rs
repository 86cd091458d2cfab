//! Watermark index: the latest stored timestamp per ticker.
//!
//! Rebuilt by streaming the store at the start of every pass and never
//! persisted, so the store file stays the single source of truth. Only the
//! ticker and timestamp columns are decoded; one record buffer is reused for
//! the whole file.

use super::file::{is_complete, ticker_field, StoreFile};
use crate::data::schema::TICKER_COLUMN;
use crate::error::SyncError;
use chrono::{DateTime, Utc};
use csv::ByteRecord;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatermarkIndex {
    marks: HashMap<String, DateTime<Utc>>,
    /// Short rows and rows whose ticker or timestamp could not be read
    /// (torn lines).
    pub skipped_rows: usize,
    /// Rows folded into the index.
    pub rows: usize,
}

impl WatermarkIndex {
    /// Fold a store into its watermark index. A missing or header-less
    /// store is empty.
    pub fn build(store: &StoreFile) -> Result<Self, SyncError> {
        let mut index = Self::default();
        let Some((mut reader, headers)) = store.open()? else {
            return Ok(index);
        };

        let granularity = store.granularity();
        let codec = store.codec();
        let ticker_idx = store.column_index(&headers, TICKER_COLUMN)?;
        let ts_idx = store.column_index(&headers, granularity.time_column())?;

        let mut record = ByteRecord::new();
        while reader
            .read_byte_record(&mut record)
            .map_err(|e| SyncError::csv(store.path(), e))?
        {
            if !is_complete(&record, &headers) {
                index.skipped_rows += 1;
                continue;
            }
            let parsed = ticker_field(&record, ticker_idx).and_then(|ticker| {
                let raw = std::str::from_utf8(record.get(ts_idx)?).ok()?;
                codec.parse(granularity, raw).map(|ts| (ticker, ts))
            });
            match parsed {
                Some((ticker, ts)) => {
                    index.observe(ticker, ts);
                    index.rows += 1;
                }
                None => index.skipped_rows += 1,
            }
        }

        if index.skipped_rows > 0 {
            tracing::warn!(
                store = %store.path().display(),
                skipped = index.skipped_rows,
                "skipped unreadable store rows"
            );
        }
        tracing::debug!(
            store = %store.path().display(),
            tickers = index.len(),
            rows = index.rows,
            "built watermark index"
        );
        Ok(index)
    }

    fn observe(&mut self, ticker: String, ts: DateTime<Utc>) {
        self.marks
            .entry(ticker)
            .and_modify(|mark| {
                if ts > *mark {
                    *mark = ts;
                }
            })
            .or_insert(ts);
    }

    /// Watermark for an upper-cased ticker; `None` means never observed.
    pub fn get(&self, ticker: &str) -> Option<DateTime<Utc>> {
        self.marks.get(ticker).copied()
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.marks.contains_key(ticker)
    }

    /// Observed tickers in sorted order.
    pub fn tickers(&self) -> Vec<String> {
        let mut tickers: Vec<String> = self.marks.keys().cloned().collect();
        tickers.sort();
        tickers
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, DateTime<Utc>)> {
        self.marks.iter().map(|(t, ts)| (t.as_str(), *ts))
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TimestampCodec;
    use crate::domain::Granularity;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    fn write_store(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn folds_running_max_per_ticker() {
        let dir = TempDir::new().unwrap();
        let path = write_store(
            &dir,
            "daily.csv",
            "ticker,interval,Date,Adj Close,Close,High,Low,Open,Volume\n\
             AAPL,daily,2024-01-09,1,1,1,1,1,10\n\
             msft,daily,2024-01-05,1,1,1,1,1,10\n\
             AAPL,daily,2024-01-10,1,1,1,1,1,10\n\
             AAPL,daily,2024-01-08,1,1,1,1,1,10\n",
        );
        let store = StoreFile::new(path, Granularity::Daily, TimestampCodec::default());
        let index = WatermarkIndex::build(&store).unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(index.rows, 4);
        assert_eq!(
            index.get("AAPL"),
            Some(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap())
        );
        assert_eq!(
            index.get("MSFT"),
            Some(Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap())
        );
        assert_eq!(index.get("NVDA"), None);
    }

    #[test]
    fn intraday_offsets_are_respected() {
        let dir = TempDir::new().unwrap();
        let path = write_store(
            &dir,
            "hourly.csv",
            "ticker,interval,Datetime,Adj Close,Close,High,Low,Open,Volume\n\
             AAPL,hourly,2024-01-10 15:30:00+00:00,1,1,1,1,1,10\n\
             AAPL,hourly,2024-01-10 11:30:00-05:00,1,1,1,1,1,10\n",
        );
        let store = StoreFile::new(path, Granularity::Intraday, TimestampCodec::default());
        let index = WatermarkIndex::build(&store).unwrap();
        // 11:30-05:00 is 16:30 UTC, later than 15:30 UTC.
        assert_eq!(
            index.get("AAPL"),
            Some(Utc.with_ymd_and_hms(2024, 1, 10, 16, 30, 0).unwrap())
        );
    }

    #[test]
    fn torn_rows_are_skipped_and_counted() {
        let dir = TempDir::new().unwrap();
        let path = write_store(
            &dir,
            "daily.csv",
            "ticker,interval,Date,Adj Close,Close,High,Low,Open,Volume\n\
             AAPL,daily,2024-01-10,1,1,1,1,1,10\n\
             AAPL,da",
        );
        let store = StoreFile::new(path, Granularity::Daily, TimestampCodec::default());
        let index = WatermarkIndex::build(&store).unwrap();
        assert_eq!(index.skipped_rows, 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn torn_row_with_complete_date_does_not_advance_watermark() {
        let dir = TempDir::new().unwrap();
        let path = write_store(
            &dir,
            "daily.csv",
            "ticker,interval,Date,Adj Close,Close,High,Low,Open,Volume\n\
             AAPL,daily,2024-01-10,1,1,1,1,1,10\n\
             AAPL,daily,2024-01-11,185.",
        );
        let store = StoreFile::new(path, Granularity::Daily, TimestampCodec::default());
        let index = WatermarkIndex::build(&store).unwrap();
        assert_eq!(
            index.get("AAPL"),
            Some(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap())
        );
        assert_eq!(index.skipped_rows, 1);
        assert_eq!(index.rows, 1);
    }

    #[test]
    fn zero_byte_store_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = write_store(&dir, "daily.csv", "");
        let store = StoreFile::new(path, Granularity::Daily, TimestampCodec::default());
        let index = WatermarkIndex::build(&store).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.skipped_rows, 0);
    }

    #[test]
    fn missing_store_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = StoreFile::new(
            dir.path().join("absent.csv"),
            Granularity::Daily,
            TimestampCodec::default(),
        );
        assert!(WatermarkIndex::build(&store).unwrap().is_empty());
    }

    #[test]
    fn missing_timestamp_column_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_store(&dir, "daily.csv", "ticker,interval,Datetime\nAAPL,daily,x\n");
        let store = StoreFile::new(path, Granularity::Daily, TimestampCodec::default());
        let err = WatermarkIndex::build(&store).unwrap_err();
        assert!(matches!(err, SyncError::StoreSchema { column, .. } if column == "Date"));
    }
}
