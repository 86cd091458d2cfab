//! Rate-limited, retrying fetch of one planned window.

use super::planner::FetchWindow;
use super::rate_limit::{RequestBudget, RetryPolicy, Sleeper};
use crate::data::{DataError, DataProvider, FormatError, RowFormatter};
use crate::domain::Bar;
use std::sync::Arc;
use std::time::Duration;

/// Result of fetching one window. Only `Bars` carries data; everything else
/// is a soft, per-ticker outcome.
#[derive(Debug)]
pub enum FetchOutcome {
    Bars(Vec<Bar>),
    /// The provider had no rows, or every row was a placeholder.
    Empty,
    /// The response could not be mapped onto the store schema.
    Malformed(FormatError),
    /// A non-transient error, or transient errors past the retry limit.
    Failed { error: DataError, attempts: u32 },
    /// The provider has blocked us; no request was retried.
    Blocked,
}

pub struct FetchClient {
    provider: Arc<dyn DataProvider>,
    budget: Arc<RequestBudget>,
    retry: RetryPolicy,
    formatter: RowFormatter,
    sleeper: Arc<dyn Sleeper>,
}

impl FetchClient {
    pub fn new(
        provider: Arc<dyn DataProvider>,
        budget: Arc<RequestBudget>,
        retry: RetryPolicy,
        formatter: RowFormatter,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            provider,
            budget,
            retry,
            formatter,
            sleeper,
        }
    }

    pub fn budget(&self) -> &RequestBudget {
        &self.budget
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn fetch(&self, window: &FetchWindow) -> FetchOutcome {
        if !self.provider.is_available() {
            return FetchOutcome::Blocked;
        }

        let mut retries = 0;
        loop {
            self.budget.acquire();
            let result = self.provider.fetch(
                &window.ticker,
                window.granularity,
                window.start,
                window.end,
            );
            match result {
                Ok(frame) => {
                    return match self.formatter.format(&frame, &window.ticker, window.granularity) {
                        Ok(bars) if bars.is_empty() => FetchOutcome::Empty,
                        Ok(bars) => FetchOutcome::Bars(bars),
                        Err(e) => FetchOutcome::Malformed(e),
                    };
                }
                Err(DataError::SymbolNotFound { .. }) => return FetchOutcome::Empty,
                Err(DataError::CircuitBreakerTripped) => return FetchOutcome::Blocked,
                Err(error) if error.is_transient() && retries < self.retry.max_retries => {
                    retries += 1;
                    let mut delay = self.retry.delay_before(retries);
                    if let DataError::RateLimited { retry_after_secs } = &error {
                        delay = delay.max(Duration::from_secs(*retry_after_secs));
                    }
                    tracing::warn!(
                        ticker = %window.ticker,
                        granularity = %window.granularity,
                        retry = retries,
                        delay_secs = delay.as_secs_f64(),
                        %error,
                        "transient provider error, backing off"
                    );
                    self.sleeper.sleep(delay);
                }
                Err(error) => {
                    return FetchOutcome::Failed {
                        error,
                        attempts: retries + 1,
                    }
                }
            }
        }
    }
}
