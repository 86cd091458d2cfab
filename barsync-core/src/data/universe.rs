//! Ticker universe: the eligible symbol set loaded from a screener export.
//!
//! The screener is a CSV with at least a `Symbol` column and a `Last Sale`
//! column formatted like `$1,234.56`. A symbol is eligible when its last
//! price falls inside the configured band and it contains none of the
//! characters that mark warrants, units, preferreds and test issues.

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UniverseError {
    #[error("universe source not found: {0}")]
    Missing(String),

    #[error("invalid symbol pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("read universe source: {0}")]
    Csv(#[from] csv::Error),
}

/// Syntactic validity check for ticker symbols.
#[derive(Debug, Clone)]
pub struct SymbolPolicy {
    invalid: Regex,
}

impl SymbolPolicy {
    /// `pattern` matches any character that makes a symbol invalid.
    pub fn new(pattern: &str) -> Result<Self, UniverseError> {
        Ok(Self {
            invalid: Regex::new(pattern)?,
        })
    }

    pub fn is_valid(&self, symbol: &str) -> bool {
        let symbol = symbol.trim();
        !symbol.is_empty() && !self.invalid.is_match(symbol)
    }
}

/// Eligibility rule: inclusive price band plus symbol validity.
#[derive(Debug, Clone)]
pub struct EligibilityFilter {
    pub min_price: f64,
    pub max_price: f64,
    pub symbols: SymbolPolicy,
}

impl EligibilityFilter {
    pub fn is_eligible(&self, symbol: &str, last_price: Option<f64>) -> bool {
        let in_band = last_price.is_some_and(|p| p >= self.min_price && p <= self.max_price);
        in_band && self.symbols.is_valid(symbol)
    }
}

#[derive(Debug, Deserialize)]
struct ScreenerRow {
    #[serde(rename = "Symbol")]
    symbol: Option<String>,
    #[serde(rename = "Last Sale")]
    last_sale: Option<String>,
}

/// Eligible tickers for one reconciliation run, upper-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickerUniverse {
    tickers: BTreeSet<String>,
    /// Rows read from the source before filtering.
    pub source_rows: usize,
}

impl TickerUniverse {
    /// Load and filter a screener CSV.
    pub fn load(path: &Path, filter: &EligibilityFilter) -> Result<Self, UniverseError> {
        if !path.exists() {
            return Err(UniverseError::Missing(path.display().to_string()));
        }
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;

        let mut tickers = BTreeSet::new();
        let mut source_rows = 0;
        for row in reader.deserialize::<ScreenerRow>() {
            let row = row?;
            source_rows += 1;
            let Some(symbol) = row.symbol else {
                continue;
            };
            let price = row.last_sale.as_deref().and_then(parse_price);
            if filter.is_eligible(&symbol, price) {
                tickers.insert(symbol.trim().to_uppercase());
            }
        }

        tracing::info!(
            source = %path.display(),
            source_rows,
            eligible = tickers.len(),
            min_price = filter.min_price,
            max_price = filter.max_price,
            "loaded ticker universe"
        );
        Ok(Self {
            tickers,
            source_rows,
        })
    }

    /// Build a universe directly from symbols (already filtered).
    pub fn from_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tickers: BTreeSet<String> = symbols
            .into_iter()
            .map(|s| s.as_ref().trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        let source_rows = tickers.len();
        Self {
            tickers,
            source_rows,
        }
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.tickers.contains(&ticker.trim().to_uppercase())
    }

    pub fn tickers(&self) -> &BTreeSet<String> {
        &self.tickers
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }
}

/// Parse a screener price such as `$1,234.56`. Blank or garbled values yield `None`.
pub fn parse_price(raw: &str) -> Option<f64> {
    let clean: String = raw.chars().filter(|c| *c != '$' && *c != ',').collect();
    let clean = clean.trim();
    if clean.is_empty() {
        return None;
    }
    clean.parse::<f64>().ok().filter(|p| p.is_finite())
}
