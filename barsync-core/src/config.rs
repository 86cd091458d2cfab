//! Run configuration, loaded from TOML.
//!
//! Every key is optional; a missing file section falls back to the defaults
//! below, which mirror a NASDAQ screener export synced into two CSV stores in
//! the working directory.

use crate::data::{EligibilityFilter, SymbolPolicy, TickerUniverse, TimestampCodec, UniverseError};
use crate::domain::Granularity;
use crate::error::SyncError;
use crate::sync::rate_limit::RetryPolicy;
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_INVALID_SYMBOL_PATTERN: &str = r"[\^\.\/\-=]";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Lowest eligible last-sale price (inclusive).
    pub min_price: f64,
    /// Highest eligible last-sale price (inclusive).
    pub max_price: f64,
    /// First date fetched for a never-seen ticker.
    pub start_date: NaiveDate,
    /// Last date (inclusive) ever fetched; `None` tracks the present.
    pub end_date: Option<NaiveDate>,
    pub daily_store: PathBuf,
    pub intraday_store: PathBuf,
    pub universe_source: PathBuf,
    pub batch_size: usize,
    /// Provider requests allowed between two cooldowns.
    pub requests_per_cooldown: u32,
    pub cooldown_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_secs: u64,
    /// Regex matching any character that disqualifies a symbol.
    pub invalid_symbol_pattern: String,
    /// Audit: tickers with fewer rows are reported as sparse.
    pub min_observations: usize,
    /// Provider retention horizon for hourly bars.
    pub max_intraday_lookback_days: i64,
    /// Audit: tickers lagging the store by more than this are reported as stale.
    pub staleness_threshold_days: i64,
    /// IANA name of the store time zone.
    pub timezone: String,
    pub workers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_price: 2.0,
            max_price: 200.0,
            start_date: NaiveDate::from_ymd_opt(2018, 1, 2).unwrap_or_default(),
            end_date: None,
            daily_store: PathBuf::from("prices_daily.csv"),
            intraday_store: PathBuf::from("prices_hourly.csv"),
            universe_source: PathBuf::from("nasdaq_screener.csv"),
            batch_size: 50,
            requests_per_cooldown: 500,
            cooldown_secs: 60,
            max_retries: 3,
            retry_base_delay_secs: 5,
            invalid_symbol_pattern: DEFAULT_INVALID_SYMBOL_PATTERN.to_string(),
            min_observations: 100,
            max_intraday_lookback_days: 729,
            staleness_threshold_days: 5,
            timezone: "UTC".to_string(),
            workers: 1,
        }
    }
}

impl SyncConfig {
    /// Load and validate a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, SyncError> {
        if !path.exists() {
            return Err(SyncError::SourceMissing {
                what: "config file",
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if !(self.min_price.is_finite() && self.max_price.is_finite()) {
            return Err(SyncError::Config("price band must be finite".into()));
        }
        if self.min_price > self.max_price {
            return Err(SyncError::Config(format!(
                "min_price {} exceeds max_price {}",
                self.min_price, self.max_price
            )));
        }
        if let Some(end) = self.end_date {
            if end < self.start_date {
                return Err(SyncError::Config(format!(
                    "end_date {end} precedes start_date {}",
                    self.start_date
                )));
            }
        }
        if self.batch_size == 0 {
            return Err(SyncError::Config("batch_size must be at least 1".into()));
        }
        if self.requests_per_cooldown == 0 {
            return Err(SyncError::Config(
                "requests_per_cooldown must be at least 1".into(),
            ));
        }
        if self.workers == 0 {
            return Err(SyncError::Config("workers must be at least 1".into()));
        }
        if self.max_intraday_lookback_days <= 0 {
            return Err(SyncError::Config(
                "max_intraday_lookback_days must be positive".into(),
            ));
        }
        if self.staleness_threshold_days < 0 {
            return Err(SyncError::Config(
                "staleness_threshold_days must not be negative".into(),
            ));
        }
        self.symbol_policy()?;
        self.codec()?;
        Ok(())
    }

    pub fn time_zone(&self) -> Result<Tz, SyncError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| SyncError::Config(format!("unknown time zone '{}': {e}", self.timezone)))
    }

    pub fn codec(&self) -> Result<TimestampCodec, SyncError> {
        self.time_zone().map(TimestampCodec::new)
    }

    pub fn symbol_policy(&self) -> Result<SymbolPolicy, SyncError> {
        SymbolPolicy::new(&self.invalid_symbol_pattern).map_err(|e| {
            SyncError::Config(format!(
                "invalid_symbol_pattern '{}': {e}",
                self.invalid_symbol_pattern
            ))
        })
    }

    pub fn eligibility(&self) -> Result<EligibilityFilter, SyncError> {
        Ok(EligibilityFilter {
            min_price: self.min_price,
            max_price: self.max_price,
            symbols: self.symbol_policy()?,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_secs(self.retry_base_delay_secs),
        )
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn store_path(&self, granularity: Granularity) -> &Path {
        match granularity {
            Granularity::Daily => &self.daily_store,
            Granularity::Intraday => &self.intraday_store,
        }
    }

    /// Load the eligible universe from `universe_source`.
    pub fn load_universe(&self) -> Result<TickerUniverse, SyncError> {
        let filter = self.eligibility()?;
        TickerUniverse::load(&self.universe_source, &filter).map_err(|e| match e {
            UniverseError::Missing(_) => SyncError::SourceMissing {
                what: "universe source",
                path: self.universe_source.clone(),
            },
            UniverseError::Csv(source) => SyncError::csv(&self.universe_source, source),
            UniverseError::Pattern(e) => SyncError::Config(e.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = SyncConfig::default();
        config.validate().unwrap();
        assert_eq!(config.start_date, NaiveDate::from_ymd_opt(2018, 1, 2).unwrap());
        assert_eq!(config.max_intraday_lookback_days, 729);
        assert_eq!(config.retry_policy().max_retries, 3);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
            min_price = 5.0
            end_date = "2024-01-15"
            workers = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.min_price, 5.0);
        assert_eq!(config.max_price, 200.0);
        assert_eq!(config.end_date, NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(config.workers, 4);
        assert_eq!(config.batch_size, 50);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<SyncConfig>("min_prise = 5.0").is_err());
    }

    #[test]
    fn rejects_inverted_price_band() {
        let config = SyncConfig {
            min_price: 10.0,
            max_price: 5.0,
            ..SyncConfig::default()
        };
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn rejects_end_before_start() {
        let config = SyncConfig {
            end_date: NaiveDate::from_ymd_opt(2017, 1, 1),
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_sizes() {
        for config in [
            SyncConfig {
                batch_size: 0,
                ..SyncConfig::default()
            },
            SyncConfig {
                requests_per_cooldown: 0,
                ..SyncConfig::default()
            },
            SyncConfig {
                workers: 0,
                ..SyncConfig::default()
            },
        ] {
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn rejects_bad_pattern_and_zone() {
        let bad_regex = SyncConfig {
            invalid_symbol_pattern: "[".into(),
            ..SyncConfig::default()
        };
        assert!(bad_regex.validate().is_err());

        let bad_zone = SyncConfig {
            timezone: "Mars/Olympus".into(),
            ..SyncConfig::default()
        };
        assert!(bad_zone.validate().is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timezone = \"America/New_York\"\nbatch_size = 10").unwrap();
        let config = SyncConfig::from_file(file.path()).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.time_zone().unwrap(), chrono_tz::America::New_York);
    }

    #[test]
    fn missing_config_file_is_source_missing() {
        let err = SyncConfig::from_file(Path::new("/nonexistent/barsync.toml")).unwrap_err();
        assert!(matches!(err, SyncError::SourceMissing { .. }));
    }

    #[test]
    fn missing_universe_is_source_missing() {
        let config = SyncConfig {
            universe_source: PathBuf::from("/nonexistent/screener.csv"),
            ..SyncConfig::default()
        };
        assert!(matches!(
            config.load_universe(),
            Err(SyncError::SourceMissing { .. })
        ));
    }
}
