//! Exponential backoff for platform calls.

use std::time::Duration;

use listsync_core::config::ExecutionConfig;

use crate::clock::Clock;
use crate::error::PlatformError;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never below 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ExecutionConfig::default())
    }
}

impl From<&ExecutionConfig> for RetryPolicy {
    fn from(cfg: &ExecutionConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
        }
    }
}

/// The final failure of [`RetryPolicy::execute`] and how many attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted {
    pub error: PlatformError,
    pub attempts: u32,
}

impl RetryPolicy {
    /// Whether `error` seen on attempt number `attempt` (1-based) earns another try.
    pub fn should_retry(&self, attempt: u32, error: &PlatformError) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }

    /// Delay after failed attempt `attempt` (1-based).
    ///
    /// A rate-limit hint is used as-is (capped at `max_delay`); otherwise
    /// `min(base_delay * 2^(attempt - 1), max_delay)`.
    pub fn delay_for(&self, attempt: u32, error: &PlatformError) -> Duration {
        if let Some(hint) = error.retry_after {
            return hint.min(self.max_delay);
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Call `f` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Returns the value and the number of attempts used.
    pub fn execute<T, F>(
        &self,
        clock: &dyn Clock,
        operation: &str,
        mut f: F,
    ) -> Result<(T, u32), Exhausted>
    where
        F: FnMut() -> Result<T, PlatformError>,
    {
        let mut attempt = 1;
        loop {
            match f() {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!("{operation}: succeeded on attempt {attempt}");
                    }
                    return Ok((value, attempt));
                }
                Err(error) if self.should_retry(attempt, &error) => {
                    let delay = self.delay_for(attempt, &error);
                    tracing::debug!(
                        "{operation}: attempt {attempt}/{} failed ({error}); retrying in {}ms",
                        self.max_attempts,
                        delay.as_millis()
                    );
                    clock.sleep(delay);
                    attempt += 1;
                }
                Err(error) => {
                    if error.is_retryable() {
                        tracing::warn!("{operation}: giving up after {attempt} attempts: {error}");
                    }
                    return Err(Exhausted {
                        error,
                        attempts: attempt,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use rstest::rstest;
    use std::cell::Cell;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
        }
    }

    #[rstest]
    #[case(1, 100)]
    #[case(2, 200)]
    #[case(3, 300)]
    #[case(30, 300)]
    fn delays_double_and_cap(#[case] attempt: u32, #[case] millis: u64) {
        let e = PlatformError::transient("503");
        assert_eq!(policy().delay_for(attempt, &e), Duration::from_millis(millis));
    }

    #[test]
    fn retry_after_hint_wins_but_is_capped() {
        let p = policy();
        let short = PlatformError::rate_limited(Some(Duration::from_millis(50)));
        let long = PlatformError::rate_limited(Some(Duration::from_secs(10)));
        assert_eq!(p.delay_for(1, &short), Duration::from_millis(50));
        assert_eq!(p.delay_for(1, &long), Duration::from_millis(300));
    }

    #[test]
    fn transient_failures_then_success() {
        let clock = ManualClock::default();
        let calls = Cell::new(0);
        let result = policy().execute(&clock, "op", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(PlatformError::transient("timeout"))
            } else {
                Ok("done")
            }
        });
        assert_eq!(result, Ok(("done", 3)));
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let clock = ManualClock::default();
        let calls = Cell::new(0);
        let result: Result<((), u32), _> = policy().execute(&clock, "op", || {
            calls.set(calls.get() + 1);
            Err(PlatformError::transient("503"))
        });
        let err = result.unwrap_err();
        assert_eq!(err.attempts, 4);
        assert_eq!(calls.get(), 4);
        assert_eq!(clock.sleeps().len(), 3);
    }

    #[test]
    fn validation_fails_immediately() {
        let clock = ManualClock::default();
        let result: Result<((), u32), _> =
            policy().execute(&clock, "op", || Err(PlatformError::validation("bad email")));
        assert_eq!(result.unwrap_err().attempts, 1);
        assert!(clock.sleeps().is_empty());
    }
}
