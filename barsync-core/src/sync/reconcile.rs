//! Universe reconciliation plan.
//!
//! The three sets are computed together, before any store is touched, and
//! are pairwise disjoint: a ticker is invalid, stale, new or none of these.

use crate::data::{SymbolPolicy, TickerUniverse};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    /// Stored tickers failing the symbol pattern, universe or not.
    pub invalid: BTreeSet<String>,
    /// Valid stored tickers no longer in the universe.
    pub stale: BTreeSet<String>,
    /// Universe tickers absent from every store.
    pub new: BTreeSet<String>,
}

impl ReconcilePlan {
    /// `stored` is the upper-cased union of tickers across both stores.
    pub fn compute(
        stored: &BTreeSet<String>,
        universe: &TickerUniverse,
        symbols: &SymbolPolicy,
    ) -> Self {
        let mut plan = Self::default();
        for ticker in stored {
            if !symbols.is_valid(ticker) {
                plan.invalid.insert(ticker.clone());
            } else if !universe.contains(ticker) {
                plan.stale.insert(ticker.clone());
            }
        }
        plan.new = universe
            .tickers()
            .iter()
            .filter(|t| !stored.contains(*t))
            .cloned()
            .collect();
        plan
    }

    /// Tickers whose rows are purged from every store.
    pub fn removals(&self) -> BTreeSet<String> {
        self.invalid.union(&self.stale).cloned().collect()
    }

    pub fn is_noop(&self) -> bool {
        self.invalid.is_empty() && self.stale.is_empty() && self.new.is_empty()
    }
}
