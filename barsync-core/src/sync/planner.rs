//! Fetch window planning.
//!
//! A window is the half-open instant range `[start, end)` still missing from a
//! store for one ticker. Planning is pure: the same watermark, clock reading
//! and configured range always give the same window.

use crate::data::schema::midnight;
use crate::domain::Granularity;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchWindow {
    pub ticker: String,
    pub granularity: Granularity,
    pub start: DateTime<Utc>,
    /// Exclusive.
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlanner {
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    max_intraday_lookback: Duration,
}

impl WindowPlanner {
    pub fn new(
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
        max_intraday_lookback_days: i64,
    ) -> Self {
        Self {
            start_date,
            end_date,
            max_intraday_lookback: Duration::days(max_intraday_lookback_days),
        }
    }

    /// Plan the missing window for `ticker`, or `None` if it is already current.
    ///
    /// `watermark` is the latest stored timestamp; `None` takes the
    /// never-seen branch and starts at the configured start date.
    pub fn plan(
        &self,
        ticker: &str,
        granularity: Granularity,
        watermark: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<FetchWindow> {
        let mut start = match watermark {
            Some(mark) => mark + granularity.step(),
            None => midnight(self.start_date),
        };
        if granularity.is_intraday() {
            start = start.max(now - self.max_intraday_lookback);
        }

        let horizon = now + granularity.end_pad();
        let end = match self.end_date {
            Some(last_day) => midnight(last_day + Duration::days(1)).min(horizon),
            None => horizon,
        };

        (start < end).then(|| FetchWindow {
            ticker: ticker.to_string(),
            granularity,
            start,
            end,
        })
    }
}
