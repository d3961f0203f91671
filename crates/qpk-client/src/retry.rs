//! Retry policy implementation with exponential backoff

use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::error::{FetchError, FetchResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Initial backoff duration
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    pub max_backoff: Duration,

    /// Backoff multiplier
    pub multiplier: f64,

    /// Add jitter to prevent thundering herd
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Create retry policy from environment variables
    ///
    /// Absent or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: env_parse("QPK_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            initial_backoff: env_parse("QPK_RETRY_BACKOFF_MS")
                .map_or(defaults.initial_backoff, Duration::from_millis),
            max_backoff: env_parse("QPK_MAX_BACKOFF_MS")
                .map_or(defaults.max_backoff, Duration::from_millis),
            multiplier: env_parse("QPK_BACKOFF_MULTIPLIER").unwrap_or(defaults.multiplier),
            jitter: env_parse("QPK_RETRY_JITTER").unwrap_or(defaults.jitter),
        }
    }

    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before retry number `retry` (1-based), without jitter
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = self
            .multiplier
            .powi(i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX));
        Duration::from_secs_f64(
            (self.initial_backoff.as_secs_f64() * factor).min(self.max_backoff.as_secs_f64()),
        )
    }

    /// Execute a function with retry logic
    ///
    /// Non-retryable errors and the error of the last attempt are returned
    /// as-is. A cancelled `cancel` token interrupts the backoff sleep.
    pub async fn execute<F, Fut, T>(&self, cancel: Option<&CancellationToken>, mut f: F) -> FetchResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = FetchResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match f(attempt).await {
                Ok(result) => return Ok(result),
                Err(e) if !e.should_retry() || attempt >= max_attempts => {
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!("Attempt {} failed: {}", attempt, e);

                    let mut delay = self.backoff_for(attempt);
                    if self.jitter {
                        let jitter = rng().random_range(0.0..0.3);
                        #[allow(clippy::cast_precision_loss)]
                        let jitter_ms = (delay.as_millis() as f64 * jitter) as u64;
                        delay += Duration::from_millis(jitter_ms);
                    }
                    if let Some(hint) = e.retry_after_hint() {
                        delay = delay.max(hint.min(self.max_backoff));
                    }

                    match cancel {
                        Some(token) => {
                            tokio::select! {
                                () = token.cancelled() => return Err(FetchError::Cancelled),
                                () = tokio::time::sleep(delay) => {}
                            }
                        }
                        None => tokio::time::sleep(delay).await,
                    }
                }
            }
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
#[allow(
    unsafe_code,
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::significant_drop_tightening
)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
        assert_eq!(policy.max_backoff, Duration::from_secs(10));
        assert!((policy.multiplier - 2.0).abs() < f64::EPSILON);
        assert!(!policy.jitter);
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(4), Duration::from_secs(8));
        assert_eq!(policy.backoff_for(5), Duration::from_secs(10));
        assert_eq!(policy.backoff_for(40), Duration::from_secs(10));
    }

    #[test]
    fn test_from_env() {
        unsafe {
            std::env::set_var("QPK_MAX_ATTEMPTS", "5");
            std::env::set_var("QPK_RETRY_BACKOFF_MS", "200");
            std::env::set_var("QPK_MAX_BACKOFF_MS", "not-a-number");
            std::env::set_var("QPK_RETRY_JITTER", "true");
        }

        let policy = RetryPolicy::from_env();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(200));
        assert_eq!(policy.max_backoff, Duration::from_secs(10));
        assert!(policy.jitter);

        unsafe {
            for var in [
                "QPK_MAX_ATTEMPTS",
                "QPK_RETRY_BACKOFF_MS",
                "QPK_MAX_BACKOFF_MS",
                "QPK_RETRY_JITTER",
            ] {
                std::env::remove_var(var);
            }
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = fast(3)
            .execute(None, |_| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(FetchError::HttpStatus(StatusCode::SERVICE_UNAVAILABLE))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_budget_exhausted_returns_last_error() {
        let result: FetchResult<()> = fast(2)
            .execute(None, |attempt| async move {
                Err(FetchError::HttpStatus(if attempt == 1 {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::BAD_GATEWAY
                }))
            })
            .await;

        assert!(matches!(
            result,
            Err(FetchError::HttpStatus(StatusCode::BAD_GATEWAY))
        ));
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: FetchResult<()> = fast(5)
            .execute(None, |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::HttpStatus(StatusCode::NOT_FOUND)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(30),
            ..RetryPolicy::default()
        };
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result: FetchResult<()> = policy
            .execute(Some(&token), |_| async {
                Err(FetchError::HttpStatus(StatusCode::SERVICE_UNAVAILABLE))
            })
            .await;

        assert!(matches!(result, Err(FetchError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
