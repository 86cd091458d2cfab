//! Sync engine: run modes over the two stores.
//!
//! Every pass rebuilds watermarks from the stores, plans one window per
//! ticker and granularity, fetches through the shared request budget and
//! appends through the watermark filter. Tickers are processed in batches;
//! with more than one worker a private rayon pool runs each batch. A ticker's
//! daily and intraday steps always run in order on the same worker.

use super::client::{FetchClient, FetchOutcome};
use super::planner::WindowPlanner;
use super::rate_limit::{RequestBudget, Sleeper};
use super::reconcile::ReconcilePlan;
use super::report::{FailureKind, ReconcileSummary, SyncReport};
use super::writer::{append_new_rows, AppendSummary};
use crate::config::SyncConfig;
use crate::data::{DataProvider, RowFormatter, SymbolPolicy, TickerUniverse};
use crate::domain::Granularity;
use crate::error::SyncError;
use crate::store::{StoreFile, WatermarkIndex};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Where a window starts for tickers that already have rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlanFrom {
    /// Configured start date, as if the ticker were new.
    NeverSeen,
    /// One step after the stored watermark.
    Watermark,
}

#[derive(Debug)]
enum StepOutcome {
    Current,
    Planned,
    Appended(AppendSummary),
    Failed(FailureKind, String),
}

#[derive(Debug, Default)]
struct Watermarks {
    daily: WatermarkIndex,
    intraday: WatermarkIndex,
}

impl Watermarks {
    fn get(&self, granularity: Granularity) -> &WatermarkIndex {
        match granularity {
            Granularity::Daily => &self.daily,
            Granularity::Intraday => &self.intraday,
        }
    }

    fn set(&mut self, granularity: Granularity, index: WatermarkIndex) {
        match granularity {
            Granularity::Daily => self.daily = index,
            Granularity::Intraday => self.intraday = index,
        }
    }
}

pub struct SyncEngine {
    daily: StoreFile,
    intraday: StoreFile,
    planner: WindowPlanner,
    client: FetchClient,
    symbols: SymbolPolicy,
    batch_size: usize,
    pool: Option<rayon::ThreadPool>,
    now: DateTime<Utc>,
    dry_run: bool,
}

impl SyncEngine {
    pub fn new(
        config: &SyncConfig,
        provider: Arc<dyn DataProvider>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let codec = config.codec()?;
        let budget = Arc::new(RequestBudget::new(
            config.requests_per_cooldown,
            config.cooldown(),
            Arc::clone(&sleeper),
        ));
        let client = FetchClient::new(
            provider,
            budget,
            config.retry_policy(),
            RowFormatter::new(codec),
            sleeper,
        );

        let pool = if config.workers > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(config.workers)
                    .thread_name(|i| format!("barsync-worker-{i}"))
                    .build()
                    .map_err(|e| SyncError::WorkerPool(e.to_string()))?,
            )
        } else {
            None
        };

        Ok(Self {
            daily: StoreFile::new(&config.daily_store, Granularity::Daily, codec),
            intraday: StoreFile::new(&config.intraday_store, Granularity::Intraday, codec),
            planner: WindowPlanner::new(
                config.start_date,
                config.end_date,
                config.max_intraday_lookback_days,
            ),
            client,
            symbols: config.symbol_policy()?,
            batch_size: config.batch_size,
            pool,
            now: Utc::now(),
            dry_run: false,
        })
    }

    /// Pin the clock used for planning.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Plan and report only: no fetch, no write.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn store(&self, granularity: Granularity) -> &StoreFile {
        match granularity {
            Granularity::Daily => &self.daily,
            Granularity::Intraday => &self.intraday,
        }
    }

    pub fn budget(&self) -> &RequestBudget {
        self.client.budget()
    }

    /// Initial backfill of both stores for `tickers`, from the configured
    /// start date. Existing rows are still respected by the append filter.
    pub fn backfill(&self, tickers: &[String]) -> Result<SyncReport, SyncError> {
        self.backfill_granularities(tickers, &Granularity::ALL)
    }

    /// Incremental update of one store. `tickers` narrows the pass to a subset
    /// of the tickers already in the store.
    pub fn update(
        &self,
        granularity: Granularity,
        tickers: Option<&[String]>,
    ) -> Result<SyncReport, SyncError> {
        self.update_excluding(granularity, tickers, &BTreeSet::new())
    }

    /// Purge stale and invalid tickers from both stores, then backfill the
    /// tickers that joined the universe.
    pub fn reconcile(&self, universe: &TickerUniverse) -> Result<SyncReport, SyncError> {
        self.reconcile_with_plan(universe).map(|(report, _)| report)
    }

    /// Reconcile, backfill any store that did not exist, then update the rest.
    pub fn run_all(&self, universe: &TickerUniverse) -> Result<SyncReport, SyncError> {
        let absent: Vec<Granularity> = Granularity::ALL
            .into_iter()
            .filter(|g| !self.store(*g).exists())
            .collect();

        let (mut report, plan) = self.reconcile_with_plan(universe)?;

        if !absent.is_empty() {
            let rest: Vec<String> = universe
                .tickers()
                .iter()
                .filter(|t| !plan.new.contains(*t))
                .cloned()
                .collect();
            if !rest.is_empty() {
                report.merge(self.backfill_granularities(&rest, &absent)?);
            }
        }

        for granularity in Granularity::ALL {
            if absent.contains(&granularity) {
                continue;
            }
            report.merge(self.update_excluding(granularity, None, &plan.new)?);
        }
        self.stamp(&mut report);
        Ok(report)
    }

    fn backfill_granularities(
        &self,
        tickers: &[String],
        granularities: &[Granularity],
    ) -> Result<SyncReport, SyncError> {
        let tickers = normalize_tickers(tickers);
        let mut report = SyncReport::new(self.dry_run);
        tracing::info!(
            tickers = tickers.len(),
            granularities = ?granularities,
            dry_run = self.dry_run,
            "starting backfill"
        );

        if !self.dry_run {
            for &granularity in granularities {
                self.store(granularity).ensure_header()?;
            }
        }
        let mut watermarks = Watermarks::default();
        for &granularity in granularities {
            watermarks.set(granularity, WatermarkIndex::build(self.store(granularity))?);
        }

        self.run_pass(
            &tickers,
            granularities,
            PlanFrom::NeverSeen,
            &watermarks,
            &mut report,
        )?;
        self.stamp(&mut report);
        Ok(report)
    }

    fn update_excluding(
        &self,
        granularity: Granularity,
        tickers: Option<&[String]>,
        exclude: &BTreeSet<String>,
    ) -> Result<SyncReport, SyncError> {
        let store = self.store(granularity);
        if !store.exists() {
            return Err(SyncError::SourceMissing {
                what: match granularity {
                    Granularity::Daily => "daily store",
                    Granularity::Intraday => "intraday store",
                },
                path: store.path().to_path_buf(),
            });
        }

        let index = WatermarkIndex::build(store)?;
        let targets: Vec<String> = match tickers {
            None => index.tickers(),
            Some(requested) => {
                let requested = normalize_tickers(requested);
                let (known, unknown): (Vec<String>, Vec<String>) =
                    requested.into_iter().partition(|t| index.contains(t));
                if !unknown.is_empty() {
                    tracing::warn!(
                        granularity = %granularity,
                        tickers = ?unknown,
                        "requested tickers have no stored rows, skipping"
                    );
                }
                known
            }
        };
        let targets: Vec<String> = targets
            .into_iter()
            .filter(|t| !exclude.contains(t))
            .collect();

        tracing::info!(
            granularity = %granularity,
            tickers = targets.len(),
            dry_run = self.dry_run,
            "starting update"
        );
        let mut watermarks = Watermarks::default();
        watermarks.set(granularity, index);

        let mut report = SyncReport::new(self.dry_run);
        self.run_pass(
            &targets,
            &[granularity],
            PlanFrom::Watermark,
            &watermarks,
            &mut report,
        )?;
        self.stamp(&mut report);
        Ok(report)
    }

    fn reconcile_with_plan(
        &self,
        universe: &TickerUniverse,
    ) -> Result<(SyncReport, ReconcilePlan), SyncError> {
        let mut stored = BTreeSet::new();
        for granularity in Granularity::ALL {
            stored.extend(self.store(granularity).tickers()?);
        }
        let plan = ReconcilePlan::compute(&stored, universe, &self.symbols);
        tracing::info!(
            stored = stored.len(),
            universe = universe.len(),
            invalid = plan.invalid.len(),
            stale = plan.stale.len(),
            new = plan.new.len(),
            dry_run = self.dry_run,
            "reconciling universe"
        );

        let mut summary = ReconcileSummary::from(&plan);
        let removals = plan.removals();
        if !removals.is_empty() && !self.dry_run {
            for granularity in Granularity::ALL {
                let rewrite = self.store(granularity).rewrite_excluding(&removals)?;
                summary.rows_removed += rewrite.removed;
            }
        }

        let mut report = SyncReport::new(self.dry_run);
        if !plan.new.is_empty() {
            let new: Vec<String> = plan.new.iter().cloned().collect();
            report.merge(self.backfill(&new)?);
        }
        report.reconcile = Some(summary);
        self.stamp(&mut report);
        Ok((report, plan))
    }

    fn run_pass(
        &self,
        tickers: &[String],
        granularities: &[Granularity],
        from: PlanFrom,
        watermarks: &Watermarks,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let batches = tickers.len().div_ceil(self.batch_size);
        for (i, batch) in tickers.chunks(self.batch_size).enumerate() {
            tracing::info!(batch = i + 1, of = batches, tickers = batch.len(), "processing batch");
            let sync_one =
                |ticker: &String| self.sync_ticker(ticker, granularities, from, watermarks);
            let results: Vec<Vec<(Granularity, StepOutcome)>> = match &self.pool {
                Some(pool) => pool.install(|| {
                    batch
                        .par_iter()
                        .map(sync_one)
                        .collect::<Result<Vec<_>, SyncError>>()
                })?,
                None => batch
                    .iter()
                    .map(sync_one)
                    .collect::<Result<Vec<_>, SyncError>>()?,
            };
            for (ticker, steps) in batch.iter().zip(results) {
                for (granularity, step) in steps {
                    apply_step(report, ticker, granularity, step);
                }
            }
        }
        Ok(())
    }

    fn sync_ticker(
        &self,
        ticker: &str,
        granularities: &[Granularity],
        from: PlanFrom,
        watermarks: &Watermarks,
    ) -> Result<Vec<(Granularity, StepOutcome)>, SyncError> {
        let mut steps = Vec::with_capacity(granularities.len());
        for &granularity in granularities {
            let watermark = watermarks.get(granularity).get(ticker);
            let seed = match from {
                PlanFrom::NeverSeen => None,
                PlanFrom::Watermark => watermark,
            };
            let Some(window) = self.planner.plan(ticker, granularity, seed, self.now) else {
                tracing::debug!(ticker, granularity = %granularity, "already current");
                steps.push((granularity, StepOutcome::Current));
                continue;
            };
            tracing::debug!(
                ticker,
                granularity = %granularity,
                start = %window.start,
                end = %window.end,
                "planned window"
            );
            if self.dry_run {
                steps.push((granularity, StepOutcome::Planned));
                continue;
            }

            let step = match self.client.fetch(&window) {
                FetchOutcome::Bars(bars) => {
                    let summary = append_new_rows(self.store(granularity), bars, watermark)?;
                    StepOutcome::Appended(summary)
                }
                FetchOutcome::Empty => {
                    StepOutcome::Failed(FailureKind::ProviderEmpty, "no rows in window".into())
                }
                FetchOutcome::Malformed(e) => {
                    StepOutcome::Failed(FailureKind::SchemaUnresolvable, e.to_string())
                }
                FetchOutcome::Failed { error, attempts } => StepOutcome::Failed(
                    FailureKind::ProviderTransient,
                    format!("{error} (after {attempts} attempts)"),
                ),
                FetchOutcome::Blocked => StepOutcome::Failed(
                    FailureKind::ProviderBlocked,
                    format!("{} is not accepting requests", self.client.provider_name()),
                ),
            };
            if let StepOutcome::Failed(kind, detail) = &step {
                tracing::warn!(ticker, granularity = %granularity, %kind, detail, "ticker failed");
            }
            steps.push((granularity, step));
        }
        Ok(steps)
    }

    fn stamp(&self, report: &mut SyncReport) {
        report.requests = self.budget().total_requests();
        report.cooldowns = self.budget().cooldowns();
    }
}

fn apply_step(report: &mut SyncReport, ticker: &str, granularity: Granularity, step: StepOutcome) {
    match step {
        StepOutcome::Current => report.stats_mut(granularity).already_current += 1,
        StepOutcome::Planned => report.stats_mut(granularity).planned += 1,
        StepOutcome::Appended(summary) => {
            let stats = report.stats_mut(granularity);
            stats.planned += 1;
            stats.rows_appended += summary.appended;
            stats.rows_dropped += summary.dropped;
            if summary.appended > 0 {
                stats.updated += 1;
            }
        }
        StepOutcome::Failed(kind, detail) => {
            report.stats_mut(granularity).planned += 1;
            report.record_failure(ticker, granularity, kind, detail);
        }
    }
}

/// Upper-case, trim and de-duplicate tickers, keeping first-seen order.
fn normalize_tickers(tickers: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    tickers
        .iter()
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}
