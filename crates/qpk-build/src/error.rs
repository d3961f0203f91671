//! Error types for the producer pipeline

use qpk_formats::FormatError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the ledger, diff engine, packager and builder
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Reading or writing a ledger file failed
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A ledger record could not be serialized
    #[error("failed to serialize {path}: {source}")]
    Serialize {
        /// Destination file
        path: PathBuf,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// No build log exists for a version
    #[error("no build log recorded for {bundle} version {version}")]
    MissingBuildLog {
        /// Bundle name
        bundle: String,
        /// Requested version
        version: u32,
    },

    /// A diff was requested between logs of different bundles or in the
    /// wrong direction
    #[error("invalid version range: {0}")]
    InvalidRange(String),

    /// The payload source has no bytes for a changed path
    #[error("payload for {path} is unavailable: {reason}")]
    MissingPayload {
        /// Logical asset path
        path: String,
        /// Failure description
        reason: String,
    },

    /// The payload source returned bytes that differ from the build log
    #[error("payload for {path} does not match build log: expected {expected}, got {actual}")]
    PayloadMismatch {
        /// Logical asset path
        path: String,
        /// Hash recorded in the build log
        expected: String,
        /// Hash of the supplied bytes
        actual: String,
    },

    /// Container or manifest error
    #[error(transparent)]
    Format(#[from] FormatError),
}

impl LedgerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for producer operations
pub type LedgerResult<T> = Result<T, LedgerError>;
