//! Request pacing and retry backoff.
//!
//! The provider enforces an unpublished request ceiling. [`RequestBudget`]
//! counts every request issued during a run, across tickers, granularities
//! and workers, and pauses the whole run for a cooldown each time the
//! threshold is reached.

use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Blocking sleep, abstracted so tests can record sleeps instead of waiting.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Default)]
struct BudgetState {
    since_cooldown: u32,
    total: u64,
    cooldowns: u32,
}

/// Run-scoped request limiter shared by every fetch.
pub struct RequestBudget {
    threshold: u32,
    cooldown: Duration,
    sleeper: Arc<dyn Sleeper>,
    state: Mutex<BudgetState>,
}

impl RequestBudget {
    pub fn new(threshold: u32, cooldown: Duration, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            sleeper,
            state: Mutex::new(BudgetState::default()),
        }
    }

    /// Reserve one request. When the threshold has been reached since the last
    /// cooldown, sleep for the cooldown first. The lock is held across the
    /// sleep so every other worker waits out the same cooldown.
    pub fn acquire(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.since_cooldown >= self.threshold {
            tracing::warn!(
                requests = state.since_cooldown,
                cooldown_secs = self.cooldown.as_secs_f64(),
                "request threshold reached, cooling down"
            );
            self.sleeper.sleep(self.cooldown);
            state.since_cooldown = 0;
            state.cooldowns += 1;
        }
        state.since_cooldown += 1;
        state.total += 1;
    }

    /// Requests issued so far in this run.
    pub fn total_requests(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).total
    }

    /// Cooldowns taken so far in this run.
    pub fn cooldowns(&self) -> u32 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).cooldowns
    }
}

impl std::fmt::Debug for RequestBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBudget")
            .field("threshold", &self.threshold)
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

/// Exponential backoff: retry `k` (1-based) waits `base_delay * multiplier^(k-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            multiplier: 2,
        }
    }

    pub fn delay_before(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let factor = self.multiplier.saturating_pow(exponent);
        self.base_delay.saturating_mul(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSleeper {
        sleeps: Mutex<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::new(3, Duration::from_secs(5));
        assert_eq!(policy.delay_before(1), Duration::from_secs(5));
        assert_eq!(policy.delay_before(2), Duration::from_secs(10));
        assert_eq!(policy.delay_before(3), Duration::from_secs(20));
    }

    #[test]
    fn no_cooldown_up_to_threshold() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let budget = RequestBudget::new(3, Duration::from_secs(60), sleeper.clone());
        for _ in 0..3 {
            budget.acquire();
        }
        assert!(sleeper.sleeps.lock().unwrap().is_empty());
        assert_eq!(budget.cooldowns(), 0);
    }

    #[test]
    fn cooldown_before_request_past_threshold() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let budget = RequestBudget::new(3, Duration::from_secs(60), sleeper.clone());
        for _ in 0..7 {
            budget.acquire();
        }
        // Requests 4 and 7 each start a new window.
        assert_eq!(
            *sleeper.sleeps.lock().unwrap(),
            vec![Duration::from_secs(60), Duration::from_secs(60)]
        );
        assert_eq!(budget.cooldowns(), 2);
        assert_eq!(budget.total_requests(), 7);
    }

    #[test]
    fn budget_is_shared_across_threads() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let budget = Arc::new(RequestBudget::new(10, Duration::from_secs(1), sleeper.clone()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let budget = Arc::clone(&budget);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        budget.acquire();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(budget.total_requests(), 40);
        assert_eq!(budget.cooldowns(), 3);
    }
}
