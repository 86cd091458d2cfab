//! End-of-run report: counts per granularity plus the soft-failure list.

use super::reconcile::ReconcilePlan;
use crate::domain::Granularity;
use serde::Serialize;
use std::fmt;

/// Why a ticker produced no rows this run. None of these abort a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The provider returned no usable rows for the window.
    ProviderEmpty,
    /// The response could not be mapped onto the store columns.
    SchemaUnresolvable,
    /// Request errors persisted past the retry limit.
    ProviderTransient,
    /// The provider blocked requests (circuit breaker open).
    ProviderBlocked,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::ProviderEmpty => "empty",
            FailureKind::SchemaUnresolvable => "schema unresolvable",
            FailureKind::ProviderTransient => "provider error",
            FailureKind::ProviderBlocked => "blocked",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickerFailure {
    pub ticker: String,
    pub granularity: Granularity,
    pub kind: FailureKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GranularityStats {
    /// Non-degenerate windows planned.
    pub planned: usize,
    /// Tickers skipped because their window was empty.
    pub already_current: usize,
    /// Tickers that gained at least one row.
    pub updated: usize,
    pub rows_appended: usize,
    /// Fetched rows discarded by the watermark filter.
    pub rows_dropped: usize,
}

impl GranularityStats {
    fn merge(&mut self, other: &GranularityStats) {
        self.planned += other.planned;
        self.already_current += other.already_current;
        self.updated += other.updated;
        self.rows_appended += other.rows_appended;
        self.rows_dropped += other.rows_dropped;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub invalid: Vec<String>,
    pub stale: Vec<String>,
    pub new: Vec<String>,
    pub rows_removed: usize,
}

impl From<&ReconcilePlan> for ReconcileSummary {
    fn from(plan: &ReconcilePlan) -> Self {
        Self {
            invalid: plan.invalid.iter().cloned().collect(),
            stale: plan.stale.iter().cloned().collect(),
            new: plan.new.iter().cloned().collect(),
            rows_removed: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub dry_run: bool,
    pub daily: GranularityStats,
    pub intraday: GranularityStats,
    pub failures: Vec<TickerFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<ReconcileSummary>,
    /// Provider requests issued so far in the run (retries included).
    pub requests: u64,
    pub cooldowns: u32,
}

impl SyncReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    pub fn stats(&self, granularity: Granularity) -> &GranularityStats {
        match granularity {
            Granularity::Daily => &self.daily,
            Granularity::Intraday => &self.intraday,
        }
    }

    pub fn stats_mut(&mut self, granularity: Granularity) -> &mut GranularityStats {
        match granularity {
            Granularity::Daily => &mut self.daily,
            Granularity::Intraday => &mut self.intraday,
        }
    }

    pub fn record_failure(
        &mut self,
        ticker: &str,
        granularity: Granularity,
        kind: FailureKind,
        detail: impl Into<String>,
    ) {
        self.failures.push(TickerFailure {
            ticker: ticker.to_string(),
            granularity,
            kind,
            detail: detail.into(),
        });
    }

    /// Fold a later pass of the same run into this report. Request counters
    /// are run-scoped totals, so the later reading wins.
    pub fn merge(&mut self, other: SyncReport) {
        self.dry_run |= other.dry_run;
        self.daily.merge(&other.daily);
        self.intraday.merge(&other.intraday);
        self.failures.extend(other.failures);
        if other.reconcile.is_some() {
            self.reconcile = other.reconcile;
        }
        self.requests = self.requests.max(other.requests);
        self.cooldowns = self.cooldowns.max(other.cooldowns);
    }

    pub fn rows_appended(&self) -> usize {
        self.daily.rows_appended + self.intraday.rows_appended
    }

    /// Failed tickers of one kind, sorted and de-duplicated.
    pub fn failed_tickers(&self, kind: FailureKind) -> Vec<&str> {
        let mut tickers: Vec<&str> = self
            .failures
            .iter()
            .filter(|f| f.kind == kind)
            .map(|f| f.ticker.as_str())
            .collect();
        tickers.sort_unstable();
        tickers.dedup();
        tickers
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            writeln!(f, "Dry run: nothing fetched, nothing written")?;
        }
        if let Some(rec) = &self.reconcile {
            writeln!(
                f,
                "Reconcile: {} invalid, {} stale, {} new, {} rows removed",
                rec.invalid.len(),
                rec.stale.len(),
                rec.new.len(),
                rec.rows_removed
            )?;
        }
        for granularity in Granularity::ALL {
            let s = self.stats(granularity);
            writeln!(
                f,
                "{:<7} planned {:>5}  current {:>5}  updated {:>5}  rows +{}",
                granularity.label(),
                s.planned,
                s.already_current,
                s.updated,
                s.rows_appended
            )?;
        }
        writeln!(
            f,
            "Requests: {} ({} cooldowns)",
            self.requests, self.cooldowns
        )?;
        if !self.failures.is_empty() {
            writeln!(f, "Failures ({}):", self.failures.len())?;
            for failure in &self.failures {
                writeln!(
                    f,
                    "  {:<8} {:<7} {}: {}",
                    failure.ticker,
                    failure.granularity.label(),
                    failure.kind,
                    failure.detail
                )?;
            }
        }
        Ok(())
    }
}
