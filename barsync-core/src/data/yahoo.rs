//! Yahoo Finance data provider.
//!
//! Fetches daily and hourly OHLCV bars from Yahoo's v8 chart API and hands
//! them to the engine as a raw [`ProviderFrame`]. Retries and request pacing
//! live in the sync layer; this type performs exactly one HTTP request per
//! `fetch` call and classifies the outcome.
//!
//! Yahoo Finance has no official API and is subject to unannounced format
//! changes, which is why the frame goes through the same column-resolution
//! path as any other provider output.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{DataError, DataProvider, ProviderFrame};
use crate::domain::Granularity;
use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Yahoo Finance quote provider.
pub struct YahooProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl YahooProvider {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
        })
    }

    /// Build the chart API URL for a ticker, interval and `[start, end)` range.
    fn chart_url(
        ticker: &str,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> String {
        format!(
            "https://query2.finance.yahoo.com/v8/finance/chart/{ticker}\
             ?period1={}&period2={}&interval={}\
             &includeAdjustedClose=true&includePrePost=false&events=",
            start.timestamp(),
            end.timestamp(),
            granularity.provider_interval(),
        )
    }

    /// Parse the chart API response into a raw frame.
    ///
    /// Daily frames carry a `Date` column (calendar date of the session open,
    /// UTC); hourly frames carry an offset-qualified `Datetime` string column.
    fn parse_response(
        ticker: &str,
        granularity: Granularity,
        resp: ChartResponse,
    ) -> Result<ProviderFrame, DataError> {
        let results = match (resp.chart.result, resp.chart.error) {
            (Some(results), _) => results,
            (None, Some(err)) if err.code == "Not Found" => {
                return Err(DataError::SymbolNotFound {
                    symbol: ticker.to_string(),
                })
            }
            (None, Some(err)) => {
                return Err(DataError::ResponseFormatChanged(format!(
                    "{}: {}",
                    err.code, err.description
                )))
            }
            (None, None) => {
                return Err(DataError::ResponseFormatChanged(
                    "empty result with no error".into(),
                ))
            }
        };

        let Some(data) = results.into_iter().next() else {
            return Ok(ProviderFrame::default());
        };
        // No timestamps means no bars in the window (e.g. a weekend).
        let Some(timestamps) = data.timestamp else {
            return Ok(ProviderFrame::default());
        };
        let quote = data.indicators.quote.into_iter().next().unwrap_or_default();
        let adj_closes = data
            .indicators
            .adjclose
            .and_then(|v| v.into_iter().next())
            .map(|a| a.adjclose)
            .unwrap_or_default();

        let n = timestamps.len();
        let pick = |v: &[Option<f64>]| -> Vec<Option<f64>> {
            (0..n).map(|i| v.get(i).copied().flatten()).collect()
        };
        // Hourly charts carry no adjclose indicator; the close stands in.
        let adj_close = if adj_closes.is_empty() {
            pick(&quote.close)
        } else {
            pick(&adj_closes)
        };
        let volumes: Vec<Option<u64>> = (0..n)
            .map(|i| quote.volume.get(i).copied().flatten())
            .collect();

        let time_column = match granularity {
            Granularity::Daily => {
                let mut days = Vec::with_capacity(n);
                for &ts in &timestamps {
                    let dt = DateTime::from_timestamp(ts, 0).ok_or_else(|| {
                        DataError::ResponseFormatChanged(format!("invalid timestamp: {ts}"))
                    })?;
                    days.push(dt.date_naive().signed_duration_since(epoch_date()).num_days() as i32);
                }
                Column::new("Date".into(), days)
                    .cast(&DataType::Date)
                    .map_err(|e| DataError::ResponseFormatChanged(format!("date cast: {e}")))?
            }
            Granularity::Intraday => {
                let mut stamps = Vec::with_capacity(n);
                for &ts in &timestamps {
                    let dt = DateTime::from_timestamp(ts, 0).ok_or_else(|| {
                        DataError::ResponseFormatChanged(format!("invalid timestamp: {ts}"))
                    })?;
                    stamps.push(dt.to_rfc3339());
                }
                Column::new("Datetime".into(), stamps)
            }
        };

        let frame = DataFrame::new(vec![
            time_column,
            Column::new("Open".into(), pick(&quote.open)),
            Column::new("High".into(), pick(&quote.high)),
            Column::new("Low".into(), pick(&quote.low)),
            Column::new("Close".into(), pick(&quote.close)),
            Column::new("Adj Close".into(), adj_close),
            Column::new("Volume".into(), volumes),
        ])
        .map_err(|e| DataError::ResponseFormatChanged(format!("frame creation: {e}")))?;

        Ok(ProviderFrame::new(frame))
    }
}

fn epoch_date() -> chrono::NaiveDate {
    DateTime::UNIX_EPOCH.date_naive()
}

impl DataProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch(
        &self,
        ticker: &str,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ProviderFrame, DataError> {
        if !self.circuit_breaker.is_allowed() {
            tracing::warn!(
                ticker,
                cooldown_secs = self.circuit_breaker.remaining_cooldown().as_secs(),
                "circuit breaker open, request refused"
            );
            return Err(DataError::CircuitBreakerTripped);
        }

        let url = Self::chart_url(ticker, granularity, start, end);
        let resp = self.client.get(&url).send().map_err(|e| {
            self.circuit_breaker.record_failure();
            DataError::NetworkUnreachable(e.to_string())
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            // IP ban: stop talking to Yahoo for the breaker's cooldown.
            self.circuit_breaker.trip();
            return Err(DataError::CircuitBreakerTripped);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            self.circuit_breaker.record_failure();
            let retry_after_secs = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(DataError::RateLimited { retry_after_secs });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(DataError::AuthenticationRequired(
                "Yahoo Finance requires authentication".into(),
            ));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(DataError::SymbolNotFound {
                symbol: ticker.to_string(),
            });
        }
        if !status.is_success() {
            self.circuit_breaker.record_failure();
            return Err(DataError::HttpStatus {
                status: status.as_u16(),
                symbol: ticker.to_string(),
            });
        }

        let chart: ChartResponse = resp.json().map_err(|e| {
            DataError::ResponseFormatChanged(format!("failed to parse response for {ticker}: {e}"))
        })?;
        let frame = Self::parse_response(ticker, granularity, chart)?;
        self.circuit_breaker.record_success();
        Ok(frame)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}
