//! Row formatter: turns a provider response into canonical bars.
//!
//! Providers name columns however they like ("Adj Close", "adjclose",
//! "('Close', 'AAPL')" flattened to a two-level header, ...). Each column name
//! is matched once against an ordered rule list; the first rule that matches
//! decides which canonical field the column feeds. If any canonical field is
//! left unresolved the whole frame is rejected.

use super::provider::ProviderFrame;
use super::schema::TimestampCodec;
use crate::domain::{Bar, Granularity};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use polars::prelude::*;
use thiserror::Error;

/// Canonical fields every provider frame must supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalColumn {
    Timestamp,
    AdjClose,
    Close,
    High,
    Low,
    Open,
    Volume,
}

impl CanonicalColumn {
    pub const ALL: [CanonicalColumn; 7] = [
        CanonicalColumn::Timestamp,
        CanonicalColumn::AdjClose,
        CanonicalColumn::Close,
        CanonicalColumn::High,
        CanonicalColumn::Low,
        CanonicalColumn::Open,
        CanonicalColumn::Volume,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CanonicalColumn::Timestamp => "timestamp",
            CanonicalColumn::AdjClose => "adj close",
            CanonicalColumn::Close => "close",
            CanonicalColumn::High => "high",
            CanonicalColumn::Low => "low",
            CanonicalColumn::Open => "open",
            CanonicalColumn::Volume => "volume",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// A column claims `target` when its lower-cased name equals `exact` or
/// contains every needle in `contains`.
struct ColumnRule {
    target: CanonicalColumn,
    exact: Option<&'static str>,
    contains: &'static [&'static str],
}

impl ColumnRule {
    fn matches(&self, name: &str) -> bool {
        self.exact == Some(name)
            || (!self.contains.is_empty() && self.contains.iter().all(|n| name.contains(n)))
    }
}

// Order matters: "adj close" must be tried before "close".
const COLUMN_RULES: [ColumnRule; 7] = [
    ColumnRule {
        target: CanonicalColumn::Timestamp,
        exact: Some("date"),
        contains: &["datetime"],
    },
    ColumnRule {
        target: CanonicalColumn::AdjClose,
        exact: None,
        contains: &["adj", "close"],
    },
    ColumnRule {
        target: CanonicalColumn::Close,
        exact: None,
        contains: &["close"],
    },
    ColumnRule {
        target: CanonicalColumn::High,
        exact: None,
        contains: &["high"],
    },
    ColumnRule {
        target: CanonicalColumn::Low,
        exact: None,
        contains: &["low"],
    },
    ColumnRule {
        target: CanonicalColumn::Open,
        exact: None,
        contains: &["open"],
    },
    ColumnRule {
        target: CanonicalColumn::Volume,
        exact: None,
        contains: &["volume"],
    },
];

/// Canonical field a raw column name maps to, if any.
pub fn classify_column(raw_name: &str) -> Option<CanonicalColumn> {
    let name = raw_name.trim().to_lowercase();
    COLUMN_RULES
        .iter()
        .find(|rule| rule.matches(&name))
        .map(|rule| rule.target)
}

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unresolved columns: {}", .0.join(", "))]
    MissingColumns(Vec<&'static str>),

    #[error("unsupported timestamp column type: {0}")]
    UnsupportedTimestamp(String),

    #[error("frame access failed: {0}")]
    Frame(String),
}

impl From<PolarsError> for FormatError {
    fn from(e: PolarsError) -> Self {
        FormatError::Frame(e.to_string())
    }
}

/// Converts provider frames into bars in the store's time zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowFormatter {
    codec: TimestampCodec,
}

impl RowFormatter {
    pub fn new(codec: TimestampCodec) -> Self {
        Self { codec }
    }

    /// Format one ticker's response. An empty frame yields no bars; a frame
    /// missing any canonical column is an error.
    pub fn format(
        &self,
        raw: &ProviderFrame,
        ticker: &str,
        granularity: Granularity,
    ) -> Result<Vec<Bar>, FormatError> {
        if raw.is_empty() {
            return Ok(Vec::new());
        }

        let slots = resolve_columns(raw)?;
        let columns = raw.frame.get_columns();
        let column = |c: CanonicalColumn| pick(columns, &slots, c);

        let timestamps = self.timestamp_values(column(CanonicalColumn::Timestamp), granularity)?;
        let adj_close = price_values(column(CanonicalColumn::AdjClose))?;
        let close = price_values(column(CanonicalColumn::Close))?;
        let high = price_values(column(CanonicalColumn::High))?;
        let low = price_values(column(CanonicalColumn::Low))?;
        let open = price_values(column(CanonicalColumn::Open))?;
        let volume = volume_values(column(CanonicalColumn::Volume))?;

        let ticker = ticker.trim().to_uppercase();
        let mut bars = Vec::with_capacity(timestamps.len());
        for (i, ts) in timestamps.into_iter().enumerate() {
            let Some(timestamp) = ts else {
                continue;
            };
            let bar = Bar {
                ticker: ticker.clone(),
                granularity,
                timestamp,
                adj_close: adj_close[i],
                close: close[i],
                high: high[i],
                low: low[i],
                open: open[i],
                volume: volume[i],
            };
            // Holidays and halted sessions come back as all-null rows.
            if bar.is_void() && bar.volume == 0 {
                continue;
            }
            bars.push(bar);
        }
        Ok(bars)
    }

    fn timestamp_values(
        &self,
        column: &Column,
        granularity: Granularity,
    ) -> Result<Vec<Option<DateTime<Utc>>>, FormatError> {
        let instants: Vec<Option<DateTime<Utc>>> = match column.dtype() {
            DataType::Datetime(unit, tz) => {
                let unit = *unit;
                let aware = tz.is_some();
                let physical = column.cast(&DataType::Int64)?;
                let values = physical.i64()?;
                values
                    .into_iter()
                    .map(|v| {
                        let instant = from_epoch(v?, unit)?;
                        Some(if aware {
                            instant
                        } else {
                            self.codec.localize(instant.naive_utc())
                        })
                    })
                    .collect()
            }
            DataType::Date => {
                let physical = column.cast(&DataType::Int32)?;
                let values = physical.i32()?;
                values
                    .into_iter()
                    .map(|v| {
                        let date = from_epoch_days(v?)?;
                        Some(self.codec.localize(date.and_time(NaiveTime::MIN)))
                    })
                    .collect()
            }
            DataType::String => column
                .str()?
                .into_iter()
                .map(|v| v.and_then(|s| self.codec.parse_instant(s.trim())))
                .collect(),
            other => return Err(FormatError::UnsupportedTimestamp(other.to_string())),
        };

        Ok(instants
            .into_iter()
            .map(|ts| ts.map(|ts| self.codec.normalize(granularity, ts)))
            .collect())
    }
}

/// Resolve each canonical field to a column index; first claimant wins.
fn resolve_columns(raw: &ProviderFrame) -> Result<[usize; 7], FormatError> {
    let mut slots: [Option<usize>; 7] = [None; 7];
    for (idx, name) in flattened_names(raw).iter().enumerate() {
        if let Some(target) = classify_column(name) {
            slots[target.slot()].get_or_insert(idx);
        }
    }

    let missing: Vec<&'static str> = CanonicalColumn::ALL
        .iter()
        .filter(|c| slots[c.slot()].is_none())
        .map(|c| c.name())
        .collect();
    if !missing.is_empty() {
        return Err(FormatError::MissingColumns(missing));
    }

    let mut resolved = [0usize; 7];
    for (out, slot) in resolved.iter_mut().zip(slots) {
        *out = slot.unwrap_or_default();
    }
    Ok(resolved)
}

fn pick<'a>(columns: &'a [Column], slots: &[usize; 7], c: CanonicalColumn) -> &'a Column {
    &columns[slots[c.slot()]]
}

/// Column names with any multi-level header collapsed to its first level.
fn flattened_names(raw: &ProviderFrame) -> Vec<String> {
    raw.frame
        .get_column_names()
        .iter()
        .enumerate()
        .map(|(i, name)| {
            raw.header_levels
                .as_ref()
                .and_then(|levels| levels.get(i))
                .and_then(|levels| levels.first())
                .cloned()
                .unwrap_or_else(|| name.to_string())
        })
        .collect()
}

fn price_values(column: &Column) -> Result<Vec<Option<f64>>, FormatError> {
    let cast = column.cast(&DataType::Float64)?;
    Ok(cast
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect())
}

fn volume_values(column: &Column) -> Result<Vec<u64>, FormatError> {
    let cast = column.cast(&DataType::Float64)?;
    Ok(cast
        .f64()?
        .into_iter()
        .map(|v| match v {
            Some(x) if x.is_finite() && x > 0.0 => x.round() as u64,
            _ => 0,
        })
        .collect())
}

fn from_epoch(value: i64, unit: TimeUnit) -> Option<DateTime<Utc>> {
    match unit {
        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(value)),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(value),
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(value),
    }
}

fn from_epoch_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1970, 1, 1)?.checked_add_signed(Duration::days(days as i64))
}
