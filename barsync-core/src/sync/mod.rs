//! Synchronization: window planning, paced fetching, appending and
//! universe reconciliation.

pub mod client;
pub mod engine;
pub mod planner;
pub mod rate_limit;
pub mod reconcile;
pub mod report;
pub mod writer;

pub use client::{FetchClient, FetchOutcome};
pub use engine::SyncEngine;
pub use planner::{FetchWindow, WindowPlanner};
pub use rate_limit::{RequestBudget, RetryPolicy, Sleeper, ThreadSleeper};
pub use reconcile::ReconcilePlan;
pub use report::{FailureKind, GranularityStats, ReconcileSummary, SyncReport, TickerFailure};
pub use writer::{append_new_rows, select_new_rows, AppendSummary};
