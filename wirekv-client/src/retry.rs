//! # Retry Policy
//!
//! Budget and backoff parameters for the dispatch loop, and the pure
//! backoff schedule it sleeps on between attempts.

use std::time::Duration;

/// Default end-to-end retry budget.
pub const DEFAULT_RETRY_BUDGET: Duration = Duration::from_secs(10);

/// Default delay before the first retry.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(10);

/// Default ceiling for a single backoff sleep.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(1);

/// How the dispatch loop reacts to retryable faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Reconnect and retry until the budget is spent.
    Budgeted,
    /// Connect under the budget, then drop the stream and surface the first
    /// fault of the operation itself. Used when frames handed to the socket
    /// inside a queue or transaction would have an unknown server-side effect.
    Once,
}

/// Retry budget and backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total wall-clock time the loop may spend before raising `Timeout`.
    pub budget: Duration,
    /// Sleep after the first failed attempt.
    pub base_backoff: Duration,
    /// Upper bound for any single sleep.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            budget: DEFAULT_RETRY_BUDGET,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.base_backoff, self.max_backoff)
    }

    /// Sleep to use after `elapsed`, clipped so it never passes the budget
    /// deadline by more than the next attempt needs to observe it.
    pub fn sleep_for(&self, attempt: u32, elapsed: Duration) -> Duration {
        let remaining = self.budget.saturating_sub(elapsed);
        self.backoff(attempt).min(remaining)
    }
}

/// Exponential backoff: `base * 2^(attempt - 1)`, capped at `max`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .map(|delay| delay.min(max))
        .unwrap_or(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let base = Duration::from_millis(10);
        let max = Duration::from_millis(100);
        assert_eq!(backoff_delay(1, base, max), Duration::from_millis(10));
        assert_eq!(backoff_delay(2, base, max), Duration::from_millis(20));
        assert_eq!(backoff_delay(3, base, max), Duration::from_millis(40));
        assert_eq!(backoff_delay(5, base, max), Duration::from_millis(100));
        assert_eq!(backoff_delay(u32::MAX, base, max), max);
    }

    #[test]
    fn attempt_zero_uses_base_delay() {
        let base = Duration::from_millis(7);
        assert_eq!(backoff_delay(0, base, Duration::from_secs(1)), base);
    }

    #[test]
    fn sleep_never_overshoots_budget() {
        let policy = RetryPolicy {
            budget: Duration::from_millis(50),
            base_backoff: Duration::from_millis(40),
            max_backoff: Duration::from_secs(1),
        };
        assert_eq!(policy.sleep_for(1, Duration::from_millis(30)), Duration::from_millis(20));
        assert_eq!(policy.sleep_for(1, Duration::from_millis(80)), Duration::ZERO);
    }
}
