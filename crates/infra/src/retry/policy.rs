//! Backoff policies for retry chains and dead-letter reconciliation.

use std::time::Duration;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default backoff base; the first retry waits twice this.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(5);

/// Retry policy for transient upstream failures.
///
/// Exponential and jitter-free: the task on attempt `n` that fails waits
/// `base_delay * 2^n` before attempt `n + 1` is enqueued. A task may be
/// retried while `attempt <= max_retries`, so a chain makes at most
/// `max_retries + 1` attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before re-enqueueing a task that just failed on `attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor)
    }

    /// Whether a task that failed on `attempt` gets another one.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}

/// Backoff between reconciliation re-drives of the same dead-letter row.
///
/// The `n`-th re-drive (1-indexed) holds the row back for
/// `base * 2^(n-1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for ReconcileBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(120),
            max: Duration::from_secs(3600),
        }
    }
}

impl ReconcileBackoff {
    pub fn delay_for(&self, reconcile_count: u32) -> Duration {
        let exp = reconcile_count.saturating_sub(1);
        let factor = 2u32.saturating_pow(exp);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// `delay_for` as a chrono duration, for timestamp arithmetic.
    pub fn chrono_delay_for(&self, reconcile_count: u32) -> chrono::Duration {
        chrono::Duration::from_std(self.delay_for(reconcile_count)).unwrap_or(chrono::Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_delays_double_from_ten_seconds() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(20));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(40));
    }

    #[test]
    fn should_retry_respects_max_retries() {
        let policy = RetryPolicy::new(3, Duration::from_secs(5));

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));
        assert!(!RetryPolicy::no_retry().should_retry(1));
    }

    #[test]
    fn huge_attempts_saturate_instead_of_overflowing() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for_attempt(200),
            Duration::from_secs(5 * u64::from(u32::MAX))
        );
    }

    #[test]
    fn reconcile_backoff_is_capped() {
        let backoff = ReconcileBackoff {
            base: Duration::from_secs(60),
            max: Duration::from_secs(300),
        };

        assert_eq!(backoff.delay_for(1), Duration::from_secs(60));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(120));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(240));
        assert_eq!(backoff.delay_for(4), Duration::from_secs(300));
        assert_eq!(backoff.delay_for(40), Duration::from_secs(300));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the delay before attempt k+1 is exactly base * 2^k.
        #[test]
        fn delay_is_base_times_two_to_the_attempt(
            base_ms in 1u64..10_000,
            attempt in 0u32..20
        ) {
            let policy = RetryPolicy::new(3, Duration::from_millis(base_ms));
            let expected = Duration::from_millis(base_ms * (1u64 << attempt));
            prop_assert_eq!(policy.delay_for_attempt(attempt), expected);
        }

        /// Property: each delay is double the previous one.
        #[test]
        fn delays_double_per_attempt(base_ms in 1u64..10_000, attempt in 1u32..20) {
            let policy = RetryPolicy::new(3, Duration::from_millis(base_ms));
            prop_assert_eq!(
                policy.delay_for_attempt(attempt),
                policy.delay_for_attempt(attempt - 1) * 2
            );
        }
    }
}
