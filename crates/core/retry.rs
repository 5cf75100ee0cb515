//! Caller-side retry with exponential backoff.
//!
//! The core never retries on its own; a caller that wants to ride out a
//! rebuild or a slow moment wraps its call in a [`RetryPolicy`]. Only
//! errors for which
//! [`ProximityError::is_retryable`](crate::error::ProximityError::is_retryable) holds are retried.

use crate::error::Result;
use std::thread;
use std::time::Duration;

/// Exponential backoff schedule.
///
/// # Examples
///
/// ```
/// use proxima::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new()
///     .max_attempts(4)
///     .base_delay(Duration::from_millis(50))
///     .max_delay(Duration::from_millis(150));
/// assert_eq!(policy.delay(1), Duration::from_millis(50));
/// assert_eq!(policy.delay(2), Duration::from_millis(100));
/// assert_eq!(policy.delay(3), Duration::from_millis(150));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
    const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(2);

    pub fn new() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            base_delay: Self::DEFAULT_BASE_DELAY,
            max_delay: Self::DEFAULT_MAX_DELAY,
        }
    }

    /// Total attempts including the first one. Zero is treated as one.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Sleep before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at `max_delay`.
    pub fn delay(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Runs `f` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. The last error is returned.
    pub fn retry<T, F>(&self, mut f: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 1;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let backoff = self.delay(attempt);
                    log::warn!(
                        "retry attempt {}/{} after {:?}: {}",
                        attempt,
                        self.max_attempts - 1,
                        backoff,
                        e
                    );
                    thread::sleep(backoff);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Shorthand for `policy.retry(f)`.
pub fn retry<T, F>(policy: &RetryPolicy, f: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    policy.retry(f)
}
