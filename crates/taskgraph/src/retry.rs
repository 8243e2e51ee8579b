//! Retry policy with exponential backoff for transient errors.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use std::thread;
use std::time::{Duration, Instant};

/// Backoff configuration for transient task errors.
///
/// Unlike a fixed attempt count, the budget is wall time: a task keeps
/// retrying until the next attempt would land past `max_total`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Total wall time a task may spend retrying
    pub max_total: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
            max_total: Duration::from_secs(10 * 60),
        }
    }
}

impl RetryConfig {
    /// Create a retry config with custom settings.
    pub fn new(base_delay: Duration, backoff_factor: f64, max_total: Duration) -> Self {
        Self {
            base_delay,
            backoff_factor,
            max_total,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Whether a retry after `delay` still fits the budget of a task that started at `started`.
    pub fn allows(&self, started: Instant, delay: Duration) -> bool {
        started.elapsed() + delay <= self.max_total
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_total: Duration::ZERO,
            ..Default::default()
        }
    }
}

/// Poll `check` until it yields a value, stopping on timeout or cancellation.
///
/// Used by provider facades to wait for operations and stabilization.
/// Transient check errors count as "not yet"; anything else is returned.
pub fn poll_until<T, F>(
    interval: Duration,
    timeout: Duration,
    cancel: &CancelToken,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Result<Option<T>>,
{
    let started = Instant::now();
    loop {
        cancel.check()?;
        match check() {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) if e.is_retryable() => {
                log::debug!("poll check failed transiently: {e}");
            }
            Err(e) => return Err(e),
        }
        if started.elapsed() + interval > timeout {
            return Err(Error::transient(format!(
                "timed out after {}s waiting for stabilization",
                timeout.as_secs()
            )));
        }
        thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_delay_for_attempt_exponential() {
        let config = RetryConfig::new(Duration::from_secs(1), 2.0, Duration::from_secs(600));

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_capped_at_max_delay() {
        let config = RetryConfig {
            max_delay: Duration::from_secs(30),
            ..RetryConfig::new(Duration::from_secs(10), 2.0, Duration::from_secs(600))
        };

        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(20));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(30));
        assert_eq!(config.delay_for_attempt(8), Duration::from_secs(30));
    }

    #[test]
    fn test_no_retry_never_allows() {
        let config = RetryConfig::no_retry();
        assert!(!config.allows(Instant::now(), Duration::from_millis(1)));
    }

    #[test]
    fn test_poll_until_eventually_ready() {
        let calls = Cell::new(0);
        let value = poll_until(
            Duration::from_millis(1),
            Duration::from_secs(1),
            &CancelToken::new(),
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Ok(None)
                } else {
                    Ok(Some("available"))
                }
            },
        )
        .unwrap();
        assert_eq!(value, "available");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_poll_until_times_out() {
        let result: Result<()> = poll_until(
            Duration::from_millis(5),
            Duration::from_millis(12),
            &CancelToken::new(),
            || Ok(None),
        );
        assert!(result.unwrap_err().is_retryable());
    }

    #[test]
    fn test_poll_until_stops_on_cancel() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result: Result<()> = poll_until(
            Duration::from_millis(1),
            Duration::from_secs(1),
            &cancel,
            || Ok(None),
        );
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
