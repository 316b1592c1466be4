//! Retry scheduling.

use crate::config::EngineConfig;

/// Exponential backoff: `delay = min(initial * 2^(attempts - 1), max)`.
///
/// `attempts` counts completed tries, so the first failure (attempts = 1)
/// waits the initial delay. Once `max_retries` attempts are spent the item
/// is permanently failed and only an operator retry revives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    initial_delay_ms: u64,
    max_delay_ms: u64,
    max_retries: u32,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(initial_delay_ms: u64, max_delay_ms: u64, max_retries: u32) -> Self {
        Self {
            initial_delay_ms,
            max_delay_ms,
            max_retries,
        }
    }

    #[must_use]
    pub const fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.initial_retry_delay_ms,
            config.max_retry_delay_ms,
            config.max_retries,
        )
    }

    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the next attempt, given how many have completed.
    #[must_use]
    pub fn delay_ms(&self, attempts: u32) -> u64 {
        if attempts <= 1 {
            return self.initial_delay_ms.min(self.max_delay_ms);
        }
        // Shifts of 63+ would overflow; the cap kicks in long before that
        let exponent = (attempts - 1).min(63);
        self.initial_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms)
    }

    /// When the next attempt may run, or `None` once the budget is spent.
    #[must_use]
    pub fn next_retry_at(&self, attempts: u32, now: i64) -> Option<i64> {
        if attempts >= self.max_retries {
            return None;
        }
        let delay = i64::try_from(self.delay_ms(attempts)).unwrap_or(i64::MAX);
        Some(now.saturating_add(delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn delay_doubles_from_the_initial() {
        let policy = RetryPolicy::new(1_000, 60_000, 5);
        assert_eq!(policy.delay_ms(1), 1_000);
        assert_eq!(policy.delay_ms(2), 2_000);
        assert_eq!(policy.delay_ms(3), 4_000);
        assert_eq!(policy.delay_ms(4), 8_000);
    }

    #[test]
    fn delay_caps_at_the_maximum() {
        let policy = RetryPolicy::new(1_000, 60_000, 20);
        assert_eq!(policy.delay_ms(7), 60_000);
        assert_eq!(policy.delay_ms(100), 60_000);
    }

    #[test]
    fn delays_never_decrease() {
        let policy = RetryPolicy::new(500, 8_000, 20);
        let mut last = 0;
        for attempts in 1..=16 {
            let delay = policy.delay_ms(attempts);
            assert!(delay >= last);
            last = delay;
        }
    }

    #[test]
    fn budget_exhaustion_yields_permanent_failure() {
        let policy = RetryPolicy::new(1_000, 60_000, 5);
        assert_eq!(policy.next_retry_at(4, 100), Some(100 + 8_000));
        assert_eq!(policy.next_retry_at(5, 100), None);
        assert_eq!(policy.next_retry_at(6, 100), None);
    }

    #[test]
    fn config_carries_the_policy() {
        let config = EngineConfig::default().with_retry_backoff(250, 4_000, 3);
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.delay_ms(1), 250);
        assert_eq!(policy.delay_ms(5), 4_000);
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.next_retry_at(3, 0), None);
    }
}
