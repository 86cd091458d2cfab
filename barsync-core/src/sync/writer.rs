//! Append writer: the last dedup layer before rows hit a store.
//!
//! The planner already starts windows after the watermark, but providers
//! round window edges server-side and can hand back the watermark bar again.
//! Only rows strictly newer than the watermark are appended.

use crate::domain::Bar;
use crate::error::SyncError;
use crate::store::StoreFile;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendSummary {
    pub appended: usize,
    /// Rows at or before the watermark, or repeated within the batch.
    pub dropped: usize,
}

/// Keep rows newer than `watermark`, ascending, one per timestamp.
pub fn select_new_rows(mut bars: Vec<Bar>, watermark: Option<DateTime<Utc>>) -> (Vec<Bar>, usize) {
    let before = bars.len();
    if let Some(mark) = watermark {
        bars.retain(|b| b.timestamp > mark);
    }
    bars.sort_by_key(|b| b.timestamp);
    bars.dedup_by_key(|b| b.timestamp);
    let dropped = before - bars.len();
    (bars, dropped)
}

/// Filter a ticker's formatted rows against its watermark and append the rest.
pub fn append_new_rows(
    store: &StoreFile,
    bars: Vec<Bar>,
    watermark: Option<DateTime<Utc>>,
) -> Result<AppendSummary, SyncError> {
    let (rows, dropped) = select_new_rows(bars, watermark);
    let appended = store.append(&rows)?;
    Ok(AppendSummary { appended, dropped })
}
