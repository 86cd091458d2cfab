//! barsync CLI: keep the daily and hourly bar stores in sync.
//!
//! Modes (exactly one):
//! - `--init`: backfill both stores for the universe (or `--tickers`)
//! - `--update`: incremental update from each ticker's watermark
//! - `--reconcile`: purge stale/invalid tickers, backfill new ones
//! - `--all`: reconcile, backfill missing stores, then update
//! - `--audit`: read-only store health report

use anyhow::{Context, Result};
use barsync_core::data::{CircuitBreaker, YahooProvider};
use barsync_core::domain::Granularity;
use barsync_core::store::{audit_store, AuditThresholds, StoreAudit};
use barsync_core::sync::{SyncEngine, SyncReport, ThreadSleeper};
use barsync_core::SyncConfig;
use clap::{ArgGroup, Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_CONFIG: &str = "barsync.toml";

#[derive(Parser)]
#[command(
    name = "barsync",
    about = "barsync: append-only daily/hourly OHLCV store sync",
    version
)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["init", "update", "reconcile", "all", "audit"])
))]
struct Cli {
    /// Initial backfill of both stores.
    #[arg(long)]
    init: bool,

    /// Incremental update from stored watermarks.
    #[arg(long)]
    update: bool,

    /// Reconcile stores against a fresh universe.
    #[arg(long)]
    reconcile: bool,

    /// Reconcile, backfill missing stores, then update.
    #[arg(long)]
    all: bool,

    /// Report store health without fetching.
    #[arg(long)]
    audit: bool,

    /// Plan and report only; fetch and write nothing.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Restrict --init/--update to these tickers (comma separated).
    #[arg(long, value_delimiter = ',')]
    tickers: Vec<String>,

    /// Restrict --update to one store.
    #[arg(long, value_enum)]
    granularity: Option<GranularityArg>,

    /// TOML config file. Defaults to ./barsync.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker threads (overrides the config file).
    #[arg(long)]
    workers: Option<usize>,

    /// Print the end-of-run report as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum GranularityArg {
    Daily,
    Hourly,
}

impl From<GranularityArg> for Granularity {
    fn from(arg: GranularityArg) -> Self {
        match arg {
            GranularityArg::Daily => Granularity::Daily,
            GranularityArg::Hourly => Granularity::Intraday,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "barsync={},barsync_core={}",
                cli.log_level, cli.log_level
            ))
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    config.validate().context("invalid configuration")?;

    if cli.audit {
        return run_audit(&config, cli.json);
    }

    let circuit_breaker = Arc::new(CircuitBreaker::default_provider());
    let provider = YahooProvider::new(circuit_breaker).context("failed to set up provider")?;
    let engine = SyncEngine::new(&config, Arc::new(provider), Arc::new(ThreadSleeper))?
        .with_dry_run(cli.dry_run);

    tracing::info!(
        daily = %config.daily_store.display(),
        intraday = %config.intraday_store.display(),
        workers = config.workers,
        dry_run = cli.dry_run,
        "barsync starting"
    );

    let report = if cli.init {
        let tickers = if cli.tickers.is_empty() {
            let universe = config.load_universe()?;
            universe.tickers().iter().cloned().collect()
        } else {
            cli.tickers.clone()
        };
        engine.backfill(&tickers)?
    } else if cli.update {
        let subset = (!cli.tickers.is_empty()).then_some(cli.tickers.as_slice());
        let granularities: Vec<Granularity> = match cli.granularity {
            Some(g) => vec![g.into()],
            None => Granularity::ALL.to_vec(),
        };
        let mut report = SyncReport::new(cli.dry_run);
        for granularity in granularities {
            report.merge(
                engine
                    .update(granularity, subset)
                    .with_context(|| format!("{granularity} update failed"))?,
            );
        }
        report
    } else if cli.reconcile {
        let universe = config.load_universe()?;
        engine.reconcile(&universe)?
    } else {
        let universe = config.load_universe()?;
        engine.run_all(&universe)?
    };

    print_report(&report, cli.json)?;
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    match path {
        Some(path) => SyncConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            SyncConfig::from_file(Path::new(DEFAULT_CONFIG))
                .with_context(|| format!("failed to load {DEFAULT_CONFIG}"))
        }
        None => Ok(SyncConfig::default()),
    }
}

fn run_audit(config: &SyncConfig, json: bool) -> Result<()> {
    let codec = config.codec()?;
    let thresholds = AuditThresholds {
        min_observations: config.min_observations,
        staleness_threshold_days: config.staleness_threshold_days,
    };

    let mut audits: Vec<StoreAudit> = Vec::new();
    for granularity in Granularity::ALL {
        let store = barsync_core::store::StoreFile::new(
            config.store_path(granularity),
            granularity,
            codec,
        );
        match audit_store(&store, thresholds)? {
            Some(audit) => audits.push(audit),
            None => tracing::warn!(store = %store.path().display(), "store not found, skipping audit"),
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&audits)?);
        return Ok(());
    }

    for audit in &audits {
        println!();
        println!("=== {} store: {} ===", audit.granularity.label(), audit.path);
        println!("Tickers:        {}", audit.tickers);
        println!("Rows:           {}", audit.rows);
        if audit.skipped_rows > 0 {
            println!("Unreadable:     {}", audit.skipped_rows);
        }
        if let (Some(first), Some(last)) = (audit.first, audit.last) {
            println!("Range:          {} to {}", first, last);
        }
        if let Some(reference) = audit.reference {
            println!("Reference:      {reference} (p95 of last rows)");
        }
        println!(
            "Sparse (<{}):   {}",
            config.min_observations,
            audit.sparse.len()
        );
        for ticker in &audit.sparse {
            println!("  {ticker}");
        }
        println!(
            "Stale (>{}d):    {}",
            config.staleness_threshold_days,
            audit.stale.len()
        );
        for ticker in &audit.stale {
            println!("  {ticker}");
        }
    }
    println!();
    Ok(())
}

fn print_report(report: &SyncReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!();
    println!("=== Sync Report ===");
    print!("{report}");
    println!(
        "Completed at {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );
    Ok(())
}
