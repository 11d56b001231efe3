//! Bounded retries with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{PreloadError, StrategyError};

/// Default number of attempts per asset.
/// 3 attempts with exponential backoff ride out transient CDN hiccups
/// without stalling a batch for long.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Initial backoff delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Time budget for one attempt across every strategy, in seconds.
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            attempt_timeout: Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            attempt_timeout,
        }
    }

    /// Delay to wait before the given 1-based attempt.
    ///
    /// Attempt 1 starts immediately; attempt n+1 waits `base * 2^(n-1)`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Drive `op` until it succeeds or the attempt budget is spent.
    ///
    /// Every attempt is raced against `attempt_timeout`. `on_failure` sees
    /// each failed attempt number and its error before the next backoff.
    pub async fn run<T, F, Fut, C>(&self, label: &str, mut op: F, mut on_failure: C) -> Result<T, PreloadError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StrategyError>>,
        C: FnMut(u32, &StrategyError),
    {
        let max_attempts = self.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let delay = self.delay_before(attempt);
            if !delay.is_zero() {
                warn!(url = label, attempt, backoff_ms = delay.as_millis() as u64, "Retrying after backoff");
                tokio::time::sleep(delay).await;
            }

            let outcome = match tokio::time::timeout(self.attempt_timeout, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(StrategyError::Timeout(self.attempt_timeout)),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) => {
                    on_failure(attempt, &e);
                    last_error = Some(e);
                }
            }
        }

        Err(PreloadError::ExhaustedRetries {
            url: label.to_string(),
            attempts: max_attempts,
            last: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    use super::*;

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before(3), Duration::from_millis(200));
        assert_eq!(policy.delay_before(4), Duration::from_millis(400));
    }

    #[test]
    fn test_zero_attempts_normalised() {
        let policy = RetryPolicy::new(0, Duration::from_millis(1), Duration::from_secs(1));
        assert_eq!(policy.max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_first_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1));
        let calls = AtomicU32::new(0);

        let result = policy
            .run(
                "https://x/a.jpg",
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 2 {
                            Err(StrategyError::Decode("nope".into()))
                        } else {
                            Ok(attempt)
                        }
                    }
                },
                |_, _| {},
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_respects_bound_and_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1));
        let mut failures = Vec::new();
        let started = Instant::now();

        let result: Result<(), _> = policy
            .run(
                "https://x/a.jpg",
                |_| async { Err(StrategyError::Decode("broken".into())) },
                |attempt, _| failures.push(attempt),
            )
            .await;

        assert_eq!(failures, vec![1, 2, 3]);
        // 100ms before attempt 2, 200ms before attempt 3
        assert!(started.elapsed() >= Duration::from_millis(300));
        match result {
            Err(PreloadError::ExhaustedRetries { attempts, last, .. }) => {
                assert_eq!(attempts, 3);
                assert!(last.contains("broken"));
            }
            other => panic!("expected exhausted retries, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_counts_as_failure() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10), Duration::from_millis(50));
        let mut timeouts = 0;

        let result: Result<(), _> = policy
            .run(
                "https://x/slow.jpg",
                |_| futures::future::pending(),
                |_, e| {
                    if e.is_timeout() {
                        timeouts += 1;
                    }
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(timeouts, 2);
    }
}
