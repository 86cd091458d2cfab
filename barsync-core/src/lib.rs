//! barsync core: keeps append-only daily and hourly OHLCV stores in sync with
//! a rate-limited quote provider and a changing ticker universe.
//!
//! - Domain types (bars, granularities)
//! - Provider seam, Yahoo Finance provider and circuit breaker
//! - Row formatter mapping arbitrary provider columns onto the store schema
//! - Store files, watermark index and health audit
//! - Window planner, request budget, retrying fetch client, append writer
//! - Universe reconciliation and the sync engine's run modes

pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod store;
pub mod sync;

pub use config::SyncConfig;
pub use error::SyncError;
