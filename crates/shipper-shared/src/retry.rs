//! Retry logic and backoff strategies

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RetryConfig;

/// Retry policy trait
pub trait RetryPolicy: Send + Sync {
    fn should_retry(&self, attempt: u32, error: &dyn std::error::Error) -> bool;
    fn delay(&self, attempt: u32) -> Duration;
    /// `None` means the policy never gives up.
    fn max_attempts(&self) -> Option<u32>;
}

/// Exponential backoff retry policy
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: RetryConfig,
    max_attempts: Option<u32>,
}

impl ExponentialBackoff {
    pub fn new(config: RetryConfig, max_attempts: u32) -> Self {
        Self {
            config,
            max_attempts: Some(max_attempts),
        }
    }

    /// Keep retrying until the operation succeeds.
    pub fn unbounded(config: RetryConfig) -> Self {
        Self {
            config,
            max_attempts: None,
        }
    }

    /// Delay before jitter, capped at `max_delay_ms`.
    fn base_delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.min(64) as i32;
        let delay = self.config.initial_delay_ms as f64 * self.config.multiplier.powi(exponent);
        let cap = self.config.max_delay_ms as f64;
        if delay.is_finite() && delay < cap {
            delay as u64
        } else {
            self.config.max_delay_ms
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn should_retry(&self, attempt: u32, _error: &dyn std::error::Error) -> bool {
        self.max_attempts.map_or(true, |max| attempt.saturating_add(1) < max)
    }

    fn delay(&self, attempt: u32) -> Duration {
        let jitter = fastrand::u64(0..=self.config.jitter_ms);
        Duration::from_millis(self.base_delay_ms(attempt).saturating_add(jitter))
    }

    fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

/// No retry policy
#[derive(Debug, Clone)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn should_retry(&self, _attempt: u32, _error: &dyn std::error::Error) -> bool {
        false
    }

    fn delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }

    fn max_attempts(&self) -> Option<u32> {
        Some(1)
    }
}

/// Retry executor
pub struct RetryExecutor<P: RetryPolicy> {
    policy: P,
}

impl<P: RetryPolicy> RetryExecutor<P> {
    pub fn new(policy: P) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Execute an operation with retry logic
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(attempts = attempt + 1, "Operation succeeded after retrying");
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if !self.policy.should_retry(attempt, &error) {
                        warn!(attempts = attempt + 1, error = %error, "Operation failed, giving up");
                        return Err(error);
                    }

                    let delay = self.policy.delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Operation failed, retrying"
                    );

                    sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

/// Executor that retries with exponential backoff until the operation succeeds
pub fn retry_forever(config: RetryConfig) -> RetryExecutor<ExponentialBackoff> {
    RetryExecutor::new(ExponentialBackoff::unbounded(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config() -> RetryConfig {
        RetryConfig {
            initial_delay_ms: 10,
            max_delay_ms: 1000,
            multiplier: 2.0,
            jitter_ms: 5,
        }
    }

    fn refused() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused")
    }

    #[tokio::test]
    async fn test_exponential_backoff_success_after_retries() {
        let executor = RetryExecutor::new(ExponentialBackoff::new(fast_config(), 3));
        let attempt_count = Arc::new(AtomicU32::new(0));

        let result = executor
            .execute(|| {
                let attempt_count = attempt_count.clone();
                async move {
                    if attempt_count.fetch_add(1, Ordering::Relaxed) < 2 {
                        Err(refused())
                    } else {
                        Ok("connected")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "connected");
        assert_eq!(attempt_count.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_bounded_backoff_gives_up() {
        let executor = RetryExecutor::new(ExponentialBackoff::new(fast_config(), 2));
        let attempt_count = AtomicU32::new(0);

        let result: Result<(), io::Error> = executor
            .execute(|| {
                attempt_count.fetch_add(1, Ordering::Relaxed);
                async { Err(refused()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempt_count.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_backoff_keeps_trying() {
        let executor = retry_forever(fast_config());
        let attempt_count = AtomicU32::new(0);

        let result = executor
            .execute(|| {
                let attempt = attempt_count.fetch_add(1, Ordering::Relaxed);
                async move {
                    if attempt < 20 {
                        Err(refused())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 20);
        assert_eq!(executor.policy().max_attempts(), None);
    }

    #[tokio::test]
    async fn test_no_retry() {
        let executor = RetryExecutor::new(NoRetry);
        let attempt_count = AtomicU32::new(0);

        let result: Result<(), io::Error> = executor
            .execute(|| {
                attempt_count.fetch_add(1, Ordering::Relaxed);
                async { Err(refused()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempt_count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_delay_is_capped() {
        let backoff = ExponentialBackoff::unbounded(RetryConfig {
            initial_delay_ms: 500,
            max_delay_ms: 60_000,
            multiplier: 1.5,
            jitter_ms: 0,
        });

        assert_eq!(backoff.delay(0), Duration::from_millis(500));
        assert_eq!(backoff.delay(1), Duration::from_millis(750));
        assert_eq!(backoff.delay(50), Duration::from_millis(60_000));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(60_000));
    }
}
