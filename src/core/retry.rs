//! Retry configuration and logic.
//!
//! The core never retries pool or circuit operations on the caller's
//! behalf; health checks retry failed probes with a linear backoff.

use std::time::Duration;

/// Linear retry policy: the n-th retry waits `n × step`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub step: Duration,
}

impl RetryConfig {
    /// Creates a policy with `retries` retries after the first attempt.
    pub fn linear(retries: u32, step: Duration) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            step,
        }
    }

    /// Calculates the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt)
    }

    /// Returns whether another attempt should be made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Executes an async operation with retry logic.
pub async fn retry_async<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Debug,
{
    let mut attempt = 0;
    loop {
        let delay = config.delay_for_attempt(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempt += 1;
                if !config.should_retry(attempt) {
                    return Err(e);
                }
                tracing::debug!(
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    error = ?e,
                    "Retrying operation"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_linear_delay() {
        let config = RetryConfig::linear(2, Duration::from_millis(250));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(250));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(500));
        assert!(config.should_retry(2));
        assert!(!config.should_retry(3));
    }

    #[test]
    fn test_zero_retries() {
        let config = RetryConfig::linear(0, Duration::from_secs(1));
        assert_eq!(config.max_attempts, 1);
        assert!(!config.should_retry(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_async_gives_up() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::linear(2, Duration::from_millis(10));

        let result: Result<(), &str> = retry_async(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("nope") }
        })
        .await;

        assert_eq!(result, Err("nope"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_async_recovers() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::linear(3, Duration::from_millis(10));

        let result: Result<u32, &str> = retry_async(&config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 1 {
                    Err("flaky")
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(1));
    }
}
