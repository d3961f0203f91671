//! Error types for consumer operations

use qpk_formats::{FormatError, ValidationReport};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single download attempt
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status: {0}")]
    HttpStatus(StatusCode),

    #[error("Rate limited")]
    RateLimited {
        /// Duration from the HTTP Retry-After header, if present
        retry_after: Option<Duration>,
    },

    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Download cancelled")]
    Cancelled,
}

impl FetchError {
    /// Check if error is retryable
    pub fn should_retry(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) => true,
            // Dropped connections surface as request or body errors
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request() || e.is_body(),
            Self::HttpStatus(status) => {
                matches!(
                    status,
                    &StatusCode::INTERNAL_SERVER_ERROR
                        | &StatusCode::BAD_GATEWAY
                        | &StatusCode::SERVICE_UNAVAILABLE
                        | &StatusCode::GATEWAY_TIMEOUT
                )
            }
            Self::Cancelled => false,
        }
    }

    /// Get the Retry-After hint duration, if this is a rate-limited error with one.
    pub fn retry_after_hint(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Failure of the local asset store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bundle {bundle} changed concurrently: expected version {expected:?}, found {actual:?}")]
    VersionConflict {
        bundle: String,
        expected: Option<u32>,
        actual: Option<u32>,
    },

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Error returned by consumer operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to fetch bundle {bundle}: {source}")]
    Network {
        bundle: String,
        #[source]
        source: FetchError,
    },

    #[error("fetch of bundle {bundle} was cancelled")]
    Cancelled { bundle: String },

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("patch for bundle {bundle} rejected: {}", .report.errors.join("; "))]
    Validation {
        bundle: String,
        report: ValidationReport,
    },

    #[error("bundle {0} is not installed")]
    NotInstalled(String),

    #[error("invalid index for bundle {bundle}: {reason}")]
    Index { bundle: String, reason: String },

    #[error("failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ClientError {
    /// Wrap a failed download, keeping cancellation distinct
    pub(crate) fn fetch(bundle: &str, source: FetchError) -> Self {
        match source {
            FetchError::Cancelled => Self::Cancelled {
                bundle: bundle.to_string(),
            },
            source => Self::Network {
                bundle: bundle.to_string(),
                source,
            },
        }
    }
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type ClientResult<T> = std::result::Result<T, ClientError>;
