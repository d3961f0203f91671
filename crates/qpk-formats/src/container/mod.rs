//! Container codecs
//!
//! A container holds a set of `(path, bytes)` entries plus exactly one
//! manifest. Two interchangeable encodings exist behind [`ContainerCodec`]:
//!
//! - [`QpkCodec`]: compact binary layout with a fixed 32-byte header
//! - [`ZipCodec`]: ZIP archive with the manifest stored as `manifest.json`
//!
//! The codec for a format is selected with [`ContainerFormat::codec`].

mod archive;
mod qpk;

pub use archive::{MANIFEST_ENTRY, ZipCodec};
pub use qpk::{QPK_HEADER_SIZE, QPK_MAGIC, QPK_VERSION, QpkCodec, QpkFlags, QpkHeader};

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

use crate::asset::AssetPayload;
use crate::error::{FormatError, FormatResult};
use crate::hash::sha256_hex;
use crate::manifest::{
    BundleManifest, CompressionAlgorithm, CompressionSettings, ContainerFormat,
    EncryptionSettings,
};
use crate::plugin::{EncryptionKey, PayloadTransform, PluginRegistry};
use crate::verify::verify_assets;

/// Encoding policy and plugins used by a codec
#[derive(Debug, Clone)]
pub struct CodecOptions {
    /// Compression policy; on decode, the algorithm used when the container
    /// says its sections are compressed
    pub compression: CompressionSettings,
    /// Encryption policy; on decode, the algorithm used when the container
    /// says its sections are encrypted
    pub encryption: EncryptionSettings,
    /// Key for the built-in cipher
    pub key: Option<EncryptionKey>,
    /// Registered strategies
    pub plugins: PluginRegistry,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            compression: CompressionSettings::none(),
            encryption: EncryptionSettings::default(),
            key: None,
            plugins: PluginRegistry::new(),
        }
    }
}

impl CodecOptions {
    /// Options matching the policy recorded in `manifest`
    pub fn for_manifest(manifest: &BundleManifest) -> Self {
        Self {
            compression: manifest.compression,
            encryption: manifest.encryption,
            ..Self::default()
        }
    }

    /// Set the encryption key
    #[must_use]
    pub fn with_key(mut self, key: EncryptionKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Use a plugin registry
    #[must_use]
    pub fn with_plugins(mut self, plugins: PluginRegistry) -> Self {
        self.plugins = plugins;
        self
    }

    /// Pipeline for the given section flags
    ///
    /// A compressed container decoded with compression switched off in the
    /// options falls back to DEFLATE.
    pub fn transform(&self, compressed: bool, encrypted: bool) -> FormatResult<PayloadTransform> {
        let mut transform = PayloadTransform::identity();
        if compressed {
            let plugin = self.plugins.compression(self.effective_compression())?;
            transform = transform.with_compression(plugin, self.compression.level);
        }
        if encrypted {
            let plugin = self
                .plugins
                .encryption(self.encryption.algorithm, self.key.as_ref())?;
            transform = transform.with_encryption(plugin);
        }
        Ok(transform)
    }

    /// Pipeline for encoding with this policy
    pub fn encode_transform(&self) -> FormatResult<PayloadTransform> {
        self.transform(self.compression.is_enabled(), self.encryption.enabled)
    }

    /// Algorithm that [`CodecOptions::transform`] uses for compressed sections
    pub(crate) const fn effective_compression(&self) -> CompressionAlgorithm {
        match self.compression.algorithm {
            CompressionAlgorithm::None => CompressionAlgorithm::Deflate,
            other => other,
        }
    }
}

/// A decoded container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedContainer {
    /// Parsed manifest
    pub manifest: BundleManifest,
    /// Entry bytes keyed by in-container path
    pub entries: BTreeMap<String, Vec<u8>>,
}

impl DecodedContainer {
    /// Bytes stored under `path`
    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.entries.get(path).map(Vec::as_slice)
    }

    /// Check every declared hash, see [`verify_assets`]
    pub fn verify(&self) -> FormatResult<()> {
        verify_assets(self).map(|_| ())
    }
}

/// Header-level information about a container, gathered without decoding
/// entry payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    /// Container format
    pub format: ContainerFormat,
    /// Format version (QPK only)
    pub version: Option<u32>,
    /// Whether sections are compressed
    pub compressed: bool,
    /// Whether sections are encrypted
    pub encrypted: bool,
    /// Number of entries, excluding the manifest
    pub entry_count: usize,
    /// Stored size of the manifest section
    pub manifest_size: u64,
    /// Total container size
    pub total_size: u64,
    /// Stored entry paths in container order
    pub paths: Vec<String>,
}

/// Serializes and deserializes one container format
pub trait ContainerCodec: Send + Sync {
    /// Format this codec implements
    fn format(&self) -> ContainerFormat;

    /// Encode entries and manifest into container bytes
    fn encode(
        &self,
        assets: &[AssetPayload],
        manifest: &BundleManifest,
        options: &CodecOptions,
    ) -> FormatResult<Vec<u8>>;

    /// Decode container bytes into manifest and entries
    ///
    /// No hashes are checked; use [`DecodedContainer::verify`] or
    /// [`open_container`] for that.
    fn decode(&self, data: &[u8], options: &CodecOptions) -> FormatResult<DecodedContainer>;

    /// Summarize a container without decoding its payloads
    fn inspect(&self, data: &[u8]) -> FormatResult<ContainerSummary>;

    /// Encode and write atomically to `path`, returning the bytes written
    fn write_file(
        &self,
        path: &Path,
        assets: &[AssetPayload],
        manifest: &BundleManifest,
        options: &CodecOptions,
    ) -> FormatResult<Vec<u8>> {
        let data = self.encode(assets, manifest, options)?;
        write_atomic(path, &data)?;
        debug!(
            path = %path.display(),
            format = %self.format(),
            size = data.len(),
            "Wrote container"
        );
        Ok(data)
    }

    /// Read and decode `path`
    fn read_file(&self, path: &Path, options: &CodecOptions) -> FormatResult<DecodedContainer> {
        let data = fs::read(path)?;
        self.decode(&data, options)
    }
}

impl ContainerFormat {
    /// Codec implementing this format
    pub fn codec(self) -> Box<dyn ContainerCodec> {
        match self {
            Self::Qpk => Box::new(QpkCodec),
            Self::Zip => Box::new(ZipCodec),
        }
    }

    /// Guess a format from a file name or URL, then from magic bytes
    ///
    /// Unknown input is treated as ZIP.
    pub fn detect(name: &str, data: &[u8]) -> Self {
        let without_query = name.split(['?', '#']).next().unwrap_or(name);
        if let Some(format) = without_query
            .rsplit_once('.')
            .and_then(|(_, ext)| Self::parse(ext))
        {
            return format;
        }
        Self::sniff(data).unwrap_or(Self::Zip)
    }

    /// Identify a format by its leading magic bytes
    pub fn sniff(data: &[u8]) -> Option<Self> {
        if data.starts_with(&QPK_MAGIC) {
            Some(Self::Qpk)
        } else if data.starts_with(b"PK") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

/// Decode with the codec for `format`, then verify every asset hash
pub fn open_container(
    format: ContainerFormat,
    data: &[u8],
    options: &CodecOptions,
) -> FormatResult<DecodedContainer> {
    let decoded = format.codec().decode(data, options)?;
    decoded.verify()?;
    Ok(decoded)
}

/// Write `data` to `path` through a temporary file in the same directory
///
/// Missing parent directories are created. A crash leaves either the old
/// file or the new one, never a truncated container.
pub fn write_atomic(path: &Path, data: &[u8]) -> FormatResult<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = dir.join(format!(".{file_name}.{:08x}.tmp", rand::random::<u32>()));

    if let Err(e) = write_and_rename(&temp_path, path, data) {
        if let Err(cleanup) = fs::remove_file(&temp_path) {
            warn!(path = %temp_path.display(), error = %cleanup, "Failed to remove temporary file");
        }
        return Err(FormatError::Io(e));
    }
    Ok(())
}

fn write_and_rename(temp_path: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    fs::rename(temp_path, path)
}

/// Open one stored entry, reporting undecodable payloads as integrity
/// failures against the manifest
pub(crate) fn open_entry(
    transform: &PayloadTransform,
    manifest: &BundleManifest,
    path: &str,
    stored: &[u8],
) -> FormatResult<Vec<u8>> {
    transform.open(stored).map_err(|e| {
        warn!(path, error = %e, "Stored payload could not be decoded");
        FormatError::Integrity {
            path: path.to_string(),
            expected: manifest
                .find_by_path(path)
                .map(|entry| entry.asset.hash.clone())
                .unwrap_or_default(),
            actual: sha256_hex(stored),
        }
    })
}

/// Reject manifests whose policy disagrees with how the container was read
pub(crate) fn check_manifest_policy(
    manifest: &BundleManifest,
    compressed: bool,
    encrypted: bool,
    options: &CodecOptions,
) -> FormatResult<()> {
    if manifest.compression.is_enabled() != compressed {
        return Err(FormatError::CorruptManifest(format!(
            "manifest compression {} disagrees with container flags",
            manifest.compression.algorithm
        )));
    }
    if compressed && manifest.compression.algorithm != options.effective_compression() {
        return Err(FormatError::CorruptManifest(format!(
            "manifest declares {} but sections were read as {}",
            manifest.compression.algorithm,
            options.effective_compression()
        )));
    }
    if manifest.encryption.enabled != encrypted {
        return Err(FormatError::CorruptManifest(
            "manifest encryption disagrees with container flags".to_string(),
        ));
    }
    if encrypted && manifest.encryption.algorithm != options.encryption.algorithm {
        return Err(FormatError::CorruptManifest(format!(
            "manifest declares {} but sections were read as {}",
            manifest.encryption.algorithm, options.encryption.algorithm
        )));
    }
    Ok(())
}
