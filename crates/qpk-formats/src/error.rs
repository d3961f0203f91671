//! Error types for bundle container and manifest operations

use thiserror::Error;

/// Errors raised while encoding, decoding or verifying bundles
#[derive(Debug, Error)]
pub enum FormatError {
    /// Input is not a container of the expected kind (bad magic, truncated)
    #[error("invalid container: {0}")]
    InvalidContainer(String),

    /// Header fields are inconsistent with the file
    #[error("corrupt header: {0}")]
    CorruptHeader(String),

    /// Manifest section could not be decrypted, decompressed or parsed
    #[error("corrupt manifest: {0}")]
    CorruptManifest(String),

    /// Container version is not supported by this build
    #[error("unsupported container version: {0}")]
    UnsupportedVersion(u32),

    /// Format, compression or encryption algorithm has no codec
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Asset payload does not match the hash declared in the manifest
    #[error("integrity check failed for {path}: expected {expected}, got {actual}")]
    Integrity {
        /// In-container path of the failing asset
        path: String,
        /// Hash declared in the manifest
        expected: String,
        /// Hash computed from the payload
        actual: String,
    },

    /// Two assets of one type map to the same name
    #[error("assets {first} and {second} share manifest key {key}")]
    DuplicateAsset {
        /// Manifest key both assets resolve to
        key: String,
        /// Path already holding the key
        first: String,
        /// Path that collided with it
        second: String,
    },

    /// Asset declared in the manifest has no payload in the container
    #[error("asset {path} (locale {locale}) is missing from the container")]
    MissingAsset {
        /// Logical path declared in the manifest
        path: String,
        /// Locale that was being resolved
        locale: String,
    },

    /// Compression or decompression failed
    #[error("compression error: {0}")]
    Compression(String),

    /// Encryption or decryption failed
    #[error("encryption error: {0}")]
    Encryption(String),

    /// A processing plugin rejected an asset
    #[error("plugin {plugin} failed: {reason}")]
    Plugin {
        /// Plugin name
        plugin: String,
        /// Failure description
        reason: String,
    },

    /// Binary parsing error
    #[error("binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),

    /// ZIP archive error
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// JSON serialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FormatError {
    /// Malformed input errors are never worth retrying
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidContainer(_) | Self::CorruptHeader(_) | Self::CorruptManifest(_)
        )
    }
}

/// Result type for format operations
pub type FormatResult<T> = Result<T, FormatError>;
