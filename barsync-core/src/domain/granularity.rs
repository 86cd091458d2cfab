//! Granularity: which of the two stores a bar belongs to.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bar granularity. Each granularity has its own store file and its own
/// timestamp column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Intraday,
}

impl Granularity {
    /// Both granularities, in the order a ticker is processed.
    pub const ALL: [Granularity; 2] = [Granularity::Daily, Granularity::Intraday];

    /// Value written into the store's `interval` column.
    pub fn label(self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Intraday => "hourly",
        }
    }

    /// Name of the timestamp column in the store header.
    pub fn time_column(self) -> &'static str {
        match self {
            Granularity::Daily => "Date",
            Granularity::Intraday => "Datetime",
        }
    }

    /// Interval parameter understood by the quote provider.
    pub fn provider_interval(self) -> &'static str {
        match self {
            Granularity::Daily => "1d",
            Granularity::Intraday => "1h",
        }
    }

    /// One bar's worth of time. The next fetch starts one step after the watermark.
    pub fn step(self) -> Duration {
        match self {
            Granularity::Daily => Duration::days(1),
            Granularity::Intraday => Duration::hours(1),
        }
    }

    /// Forward pad added to "now" when computing the end of a fetch window.
    pub fn end_pad(self) -> Duration {
        self.step()
    }

    pub fn is_intraday(self) -> bool {
        matches!(self, Granularity::Intraday)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
