//! Data provider trait and structured error types.
//!
//! The DataProvider trait abstracts over quote sources so the sync engine can
//! run against Yahoo Finance in production and a scripted provider in tests.

use crate::domain::Granularity;
use chrono::{DateTime, Utc};
use polars::prelude::DataFrame;
use thiserror::Error;

/// Raw response table for one ticker/granularity, before formatting.
///
/// Column naming is whatever the provider chose. When the provider reports a
/// multi-level header, `header_levels` holds one list of levels per frame
/// column (outermost level first) and only the first level is meaningful.
#[derive(Debug, Clone)]
pub struct ProviderFrame {
    pub frame: DataFrame,
    pub header_levels: Option<Vec<Vec<String>>>,
}

impl Default for ProviderFrame {
    fn default() -> Self {
        Self::new(DataFrame::empty())
    }
}

impl ProviderFrame {
    pub fn new(frame: DataFrame) -> Self {
        Self {
            frame,
            header_levels: None,
        }
    }

    /// Attach a multi-level header (one entry per column of `frame`).
    pub fn with_header_levels(mut self, levels: Vec<Vec<String>>) -> Self {
        self.header_levels = Some(levels);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }
}

/// Structured error types for provider requests.
///
/// These are designed to be displayable in CLI output and the end-of-run report.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("HTTP {status} for {symbol}")]
    HttpStatus { status: u16, symbol: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("data error: {0}")]
    Other(String),
}

impl DataError {
    /// Whether retrying the same request later can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DataError::NetworkUnreachable(_) | DataError::RateLimited { .. } => true,
            DataError::HttpStatus { status, .. } => *status >= 500,
            DataError::Other(_) => true,
            DataError::ResponseFormatChanged(_)
            | DataError::AuthenticationRequired(_)
            | DataError::SymbolNotFound { .. }
            | DataError::CircuitBreakerTripped => false,
        }
    }
}

/// Trait for quote providers.
///
/// `end` is exclusive. An empty frame means the provider has no bars for the
/// window; errors are reserved for failed requests.
pub trait DataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch bars for a ticker over `[start, end)` at the given granularity.
    fn fetch(
        &self,
        ticker: &str,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ProviderFrame, DataError>;

    /// Check if the provider is currently available (not blocked).
    fn is_available(&self) -> bool;
}
