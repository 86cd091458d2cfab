//! Read-only store health report.
//!
//! Flags tickers with too little history to be useful downstream and tickers
//! whose data stopped well before the rest of the store. "Well before" is
//! measured against the 95th percentile of per-ticker last timestamps, so a
//! handful of tickers fetched ahead of the pack do not move the reference.

use super::file::{is_complete, ticker_field, StoreFile};
use crate::data::schema::TICKER_COLUMN;
use crate::domain::Granularity;
use crate::error::SyncError;
use chrono::{DateTime, Duration, Utc};
use csv::ByteRecord;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditThresholds {
    pub min_observations: usize,
    pub staleness_threshold_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TickerStats {
    rows: usize,
    first: DateTime<Utc>,
    last: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreAudit {
    pub granularity: Granularity,
    pub path: String,
    pub tickers: usize,
    pub rows: usize,
    pub skipped_rows: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    /// 95th percentile of per-ticker last timestamps.
    pub reference: Option<DateTime<Utc>>,
    /// Tickers with fewer than `min_observations` rows.
    pub sparse: Vec<String>,
    /// Tickers whose last row precedes `reference - staleness_threshold_days`.
    pub stale: Vec<String>,
}

/// Audit one store. Returns `None` when the store does not exist or has no
/// header yet.
pub fn audit_store(
    store: &StoreFile,
    thresholds: AuditThresholds,
) -> Result<Option<StoreAudit>, SyncError> {
    let Some((mut reader, headers)) = store.open()? else {
        return Ok(None);
    };
    let granularity = store.granularity();
    let codec = store.codec();
    let ticker_idx = store.column_index(&headers, TICKER_COLUMN)?;
    let ts_idx = store.column_index(&headers, granularity.time_column())?;

    let mut stats: BTreeMap<String, TickerStats> = BTreeMap::new();
    let mut rows = 0;
    let mut skipped_rows = 0;
    let mut record = ByteRecord::new();
    while reader
        .read_byte_record(&mut record)
        .map_err(|e| SyncError::csv(store.path(), e))?
    {
        if !is_complete(&record, &headers) {
            skipped_rows += 1;
            continue;
        }
        let parsed = ticker_field(&record, ticker_idx).and_then(|ticker| {
            let raw = std::str::from_utf8(record.get(ts_idx)?).ok()?;
            codec.parse(granularity, raw).map(|ts| (ticker, ts))
        });
        let Some((ticker, ts)) = parsed else {
            skipped_rows += 1;
            continue;
        };
        rows += 1;
        stats
            .entry(ticker)
            .and_modify(|s| {
                s.rows += 1;
                s.first = s.first.min(ts);
                s.last = s.last.max(ts);
            })
            .or_insert(TickerStats {
                rows: 1,
                first: ts,
                last: ts,
            });
    }

    let first = stats.values().map(|s| s.first).min();
    let last = stats.values().map(|s| s.last).max();
    let mut lasts: Vec<DateTime<Utc>> = stats.values().map(|s| s.last).collect();
    lasts.sort();
    let reference = percentile(&lasts, 0.95);

    let sparse = stats
        .iter()
        .filter(|(_, s)| s.rows < thresholds.min_observations)
        .map(|(t, _)| t.clone())
        .collect();
    let stale = match reference {
        Some(reference) => {
            let cutoff = reference - Duration::days(thresholds.staleness_threshold_days);
            stats
                .iter()
                .filter(|(_, s)| s.last < cutoff)
                .map(|(t, _)| t.clone())
                .collect()
        }
        None => Vec::new(),
    };

    Ok(Some(StoreAudit {
        granularity,
        path: store.path().display().to_string(),
        tickers: stats.len(),
        rows,
        skipped_rows,
        first,
        last,
        reference,
        sparse,
        stale,
    }))
}

/// Nearest-rank percentile of an ascending slice.
fn percentile(sorted: &[DateTime<Utc>], q: f64) -> Option<DateTime<Utc>> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted.get(rank.saturating_sub(1).min(sorted.len() - 1)).copied()
}
