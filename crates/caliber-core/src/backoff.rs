//! Exponential retry backoff for failed deliveries.

use std::time::Duration;

/// Default first retry delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
/// Default delay ceiling in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;
/// Default number of delivery attempts before a mutation is surfaced.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Pure retry policy: `delay(n) = min(base * 2^n, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl BackoffPolicy {
    pub const fn new(base_delay_ms: u64, max_delay_ms: u64, max_retries: u32) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            max_retries,
        }
    }

    /// Delay in milliseconds before retry number `attempts`.
    ///
    /// Saturates instead of overflowing and never exceeds `max_delay_ms`.
    pub fn delay_ms(&self, attempts: u32) -> u64 {
        let factor = 2_u64.checked_pow(attempts).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    pub fn delay(&self, attempts: u32) -> Duration {
        Duration::from_millis(self.delay_ms(attempts))
    }

    /// Whether another automatic attempt is allowed after `attempts` failures.
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_retries
    }

    /// Earliest instant (Unix ms) a mutation with `attempts` failures may be retried.
    ///
    /// The first failure waits `delay(0)`, the second `delay(1)`, and so on.
    pub fn retry_at(&self, attempts: u32, last_attempt_at: Option<i64>) -> Option<i64> {
        let last_attempt_at = last_attempt_at?;
        if attempts == 0 {
            return Some(last_attempt_at);
        }
        let wait = i64::try_from(self.delay_ms(attempts - 1)).unwrap_or(i64::MAX);
        Some(last_attempt_at.saturating_add(wait))
    }

    /// Whether the backoff for a mutation has elapsed at `now`.
    pub fn is_due(&self, attempts: u32, last_attempt_at: Option<i64>, now: i64) -> bool {
        self.retry_at(attempts, last_attempt_at)
            .is_none_or(|retry_at| now >= retry_at)
    }
}
