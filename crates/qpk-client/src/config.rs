//! Fetcher configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Default per-attempt timeout
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration of the bundle fetcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Retry budget and backoff
    pub retry: RetryPolicy,
    /// Timeout of a single attempt; not cumulative across retries
    pub attempt_timeout: Duration,
    /// Allow intermediaries to serve cached responses
    pub enable_cache: bool,
    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            enable_cache: true,
            user_agent: format!("qpk-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl FetchConfig {
    /// Read configuration from `QPK_*` environment variables
    ///
    /// Absent or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            retry: RetryPolicy::from_env(),
            attempt_timeout: std::env::var("QPK_ATTEMPT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.attempt_timeout, Duration::from_secs),
            enable_cache: std::env::var("QPK_ENABLE_CACHE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.enable_cache),
            user_agent: defaults.user_agent,
        }
    }

    /// Replace the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the per-attempt timeout
    #[must_use]
    pub const fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Toggle response caching
    #[must_use]
    pub const fn with_cache(mut self, enable: bool) -> Self {
        self.enable_cache = enable;
        self
    }
}
