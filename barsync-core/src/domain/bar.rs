//! Bar: the canonical row shape shared by both stores.

use super::granularity::Granularity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV bar for a single ticker at a single timestamp.
///
/// Daily bars sit at midnight UTC of their calendar date. Prices are optional
/// because providers occasionally return partial rows; a missing price is
/// written as an empty CSV field rather than a made-up number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ticker: String,
    pub granularity: Granularity,
    pub timestamp: DateTime<Utc>,
    pub adj_close: Option<f64>,
    pub close: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub open: Option<f64>,
    pub volume: u64,
}

impl Bar {
    /// Returns true if no price field is present (provider placeholder row).
    pub fn is_void(&self) -> bool {
        self.open.is_none()
            && self.high.is_none()
            && self.low.is_none()
            && self.close.is_none()
            && self.adj_close.is_none()
    }
}
