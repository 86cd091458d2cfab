//! On-disk store schema and timestamp encoding.
//!
//! Both stores share one column layout; only the timestamp column name and
//! its text encoding differ:
//!
//! ```text
//! ticker,interval,Date,Adj Close,Close,High,Low,Open,Volume          (daily)
//! ticker,interval,Datetime,Adj Close,Close,High,Low,Open,Volume      (intraday)
//! ```
//!
//! Daily timestamps are `YYYY-MM-DD`. Intraday timestamps are second-precision
//! instants with an explicit offset in the store time zone, e.g.
//! `2024-01-10 14:30:00+00:00`.

use crate::domain::{Bar, Granularity};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Column name holding the ticker symbol.
pub const TICKER_COLUMN: &str = "ticker";

/// Number of columns in a store row.
pub const STORE_WIDTH: usize = 9;

const INTRADAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

/// Canonical header for a store of the given granularity.
pub fn store_header(granularity: Granularity) -> [&'static str; STORE_WIDTH] {
    [
        TICKER_COLUMN,
        "interval",
        granularity.time_column(),
        "Adj Close",
        "Close",
        "High",
        "Low",
        "Open",
        "Volume",
    ]
}

/// Encodes and decodes store timestamps in a single fixed time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampCodec {
    tz: Tz,
}

impl Default for TimestampCodec {
    fn default() -> Self {
        Self { tz: Tz::UTC }
    }
}

impl TimestampCodec {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn time_zone(&self) -> Tz {
        self.tz
    }

    /// Interpret a wall-clock time as local to the store time zone.
    ///
    /// Times inside a DST gap do not exist locally; they are read as UTC.
    pub fn localize(&self, naive: NaiveDateTime) -> DateTime<Utc> {
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| naive.and_utc())
    }

    /// Calendar date of an instant as seen from the store time zone.
    pub fn local_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        ts.with_timezone(&self.tz).date_naive()
    }

    /// Normalize an instant to the granularity: daily bars collapse to
    /// midnight UTC of their local calendar date, intraday bars are truncated
    /// to whole seconds.
    pub fn normalize(&self, granularity: Granularity, ts: DateTime<Utc>) -> DateTime<Utc> {
        match granularity {
            Granularity::Daily => midnight(self.local_date(ts)),
            Granularity::Intraday => {
                DateTime::from_timestamp(ts.timestamp(), 0).unwrap_or(ts)
            }
        }
    }

    pub fn format(&self, granularity: Granularity, ts: DateTime<Utc>) -> String {
        match granularity {
            Granularity::Daily => ts.date_naive().format("%Y-%m-%d").to_string(),
            Granularity::Intraday => ts.with_timezone(&self.tz).format(INTRADAY_FORMAT).to_string(),
        }
    }

    /// Parse a timestamp field read back from a store.
    pub fn parse(&self, granularity: Granularity, raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        match granularity {
            Granularity::Daily => parse_date_prefix(raw).map(midnight),
            Granularity::Intraday => self.parse_instant(raw),
        }
    }

    /// Parse a free-form instant: offset-qualified forms are converted, naive
    /// forms are localized, bare dates become local midnight.
    pub fn parse_instant(&self, raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_str(raw, INTRADAY_FORMAT) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
                return Some(self.localize(naive));
            }
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| self.localize(naive))
    }

    /// Render a bar as a store row in canonical column order.
    pub fn to_record(&self, bar: &Bar) -> [String; STORE_WIDTH] {
        [
            bar.ticker.clone(),
            bar.granularity.label().to_string(),
            self.format(bar.granularity, bar.timestamp),
            price_field(bar.adj_close),
            price_field(bar.close),
            price_field(bar.high),
            price_field(bar.low),
            price_field(bar.open),
            bar.volume.to_string(),
        ]
    }
}

/// Midnight UTC of a calendar date (the daily bar timestamp convention).
pub fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

fn parse_date_prefix(raw: &str) -> Option<NaiveDate> {
    let prefix = raw.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

fn price_field(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => v.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, mi, 0).unwrap()
    }

    #[test]
    fn header_uses_granularity_time_column() {
        assert_eq!(store_header(Granularity::Daily)[2], "Date");
        assert_eq!(store_header(Granularity::Intraday)[2], "Datetime");
        assert_eq!(store_header(Granularity::Daily)[0], TICKER_COLUMN);
    }

    #[test]
    fn intraday_format_has_offset_and_seconds() {
        let codec = TimestampCodec::default();
        let s = codec.format(Granularity::Intraday, utc(2024, 1, 10, 14, 30));
        assert_eq!(s, "2024-01-10 14:30:00+00:00");
        assert_eq!(codec.parse(Granularity::Intraday, &s), Some(utc(2024, 1, 10, 14, 30)));
    }

    #[test]
    fn intraday_format_in_other_zone_keeps_instant() {
        let codec = TimestampCodec::new(chrono_tz::America::New_York);
        let s = codec.format(Granularity::Intraday, utc(2024, 1, 10, 14, 30));
        assert_eq!(s, "2024-01-10 09:30:00-05:00");
        assert_eq!(codec.parse(Granularity::Intraday, &s), Some(utc(2024, 1, 10, 14, 30)));
    }

    #[test]
    fn daily_parse_accepts_date_and_datetime_text() {
        let codec = TimestampCodec::default();
        let expected = Some(utc(2024, 1, 10, 0, 0));
        assert_eq!(codec.parse(Granularity::Daily, "2024-01-10"), expected);
        assert_eq!(codec.parse(Granularity::Daily, "2024-01-10 00:00:00"), expected);
        assert_eq!(codec.parse(Granularity::Daily, "garbage"), None);
        assert_eq!(codec.parse(Granularity::Daily, ""), None);
    }

    #[test]
    fn naive_instants_are_localized() {
        let codec = TimestampCodec::new(chrono_tz::America::New_York);
        assert_eq!(
            codec.parse_instant("2024-01-10 09:30:00"),
            Some(utc(2024, 1, 10, 14, 30))
        );
        assert_eq!(
            codec.parse_instant("2024-01-10T09:30:00-05:00"),
            Some(utc(2024, 1, 10, 14, 30))
        );
    }

    #[test]
    fn daily_normalization_uses_local_date() {
        let codec = TimestampCodec::new(chrono_tz::America::New_York);
        // 02:00 UTC on the 11th is still the 10th in New York.
        assert_eq!(
            codec.normalize(Granularity::Daily, utc(2024, 1, 11, 2, 0)),
            utc(2024, 1, 10, 0, 0)
        );
    }

    #[test]
    fn record_leaves_missing_prices_empty() {
        let codec = TimestampCodec::default();
        let bar = Bar {
            ticker: "AAPL".into(),
            granularity: Granularity::Daily,
            timestamp: utc(2024, 1, 10, 0, 0),
            adj_close: None,
            close: Some(185.5),
            high: Some(f64::NAN),
            low: Some(183.0),
            open: Some(184.25),
            volume: 1200,
        };
        let rec = codec.to_record(&bar);
        assert_eq!(
            rec,
            [
                "AAPL", "daily", "2024-01-10", "", "185.5", "", "183", "184.25", "1200"
            ]
            .map(String::from)
        );
    }
}
