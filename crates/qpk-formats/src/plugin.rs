//! Pluggable byte transforms
//!
//! Every transform is a strategy object tagged with the capability it
//! provides. A [`PluginRegistry`] keeps them in registration order; lookups
//! return the first registered match and fall back to the built-in strategy
//! for the same tag, if there is one.
//!
//! Built-ins:
//! - [`DeflateCompression`] for [`CompressionAlgorithm::Deflate`]
//! - [`Salsa20Encryption`] for [`EncryptionAlgorithm::Salsa20`], given a key
//!
//! LZMA and AES-256-GCM are recognized tags without a built-in codec and
//! report [`FormatError::UnsupportedFormat`] unless a plugin is registered.

use flate2::Compression;
use flate2::read::{ZlibDecoder, ZlibEncoder};
use salsa20::Salsa20;
use salsa20::cipher::{KeyIvInit, StreamCipher};
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use tracing::debug;

use crate::asset::AssetInfo;
use crate::container::DecodedContainer;
use crate::error::{FormatError, FormatResult};
use crate::manifest::{CompressionAlgorithm, ContainerFormat, EncryptionAlgorithm};

/// Maximum size a single decompressed section may reach (1 GB)
pub const MAX_DECOMPRESSION_SIZE: usize = 1024 * 1024 * 1024;

/// Length of the nonce prefixed to Salsa20 ciphertext
pub const SALSA20_NONCE_LEN: usize = 8;

/// Compresses and decompresses byte buffers for one algorithm
pub trait CompressionPlugin: Send + Sync {
    /// Algorithm tag this plugin serves
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Compress `data` at an algorithm-specific level
    fn compress(&self, data: &[u8], level: u32) -> FormatResult<Vec<u8>>;

    /// Reverse [`CompressionPlugin::compress`]
    fn decompress(&self, data: &[u8]) -> FormatResult<Vec<u8>>;
}

/// Encrypts and decrypts byte buffers for one algorithm
pub trait EncryptionPlugin: Send + Sync {
    /// Algorithm tag this plugin serves
    fn algorithm(&self) -> EncryptionAlgorithm;

    /// Encrypt `data`
    fn encrypt(&self, data: &[u8]) -> FormatResult<Vec<u8>>;

    /// Reverse [`EncryptionPlugin::encrypt`]
    fn decrypt(&self, data: &[u8]) -> FormatResult<Vec<u8>>;
}

/// Rewrites asset bytes before they are packed
pub trait ProcessingPlugin: Send + Sync {
    /// Plugin name, used in errors and logs
    fn name(&self) -> &str;

    /// Whether this plugin handles `asset`
    fn applies_to(&self, _asset: &AssetInfo) -> bool {
        true
    }

    /// Transform the bytes of `asset`
    fn process(&self, asset: &AssetInfo, data: Vec<u8>) -> FormatResult<Vec<u8>>;
}

/// Whole-file transform applied to a downloaded container before unpacking
pub trait DecryptionPlugin: Send + Sync {
    /// Plugin name
    fn name(&self) -> &str;

    /// Transform the downloaded bytes
    fn decrypt(&self, data: Vec<u8>) -> FormatResult<Vec<u8>>;
}

/// Alternative unpacker for one or more container formats
pub trait ContainerPlugin: Send + Sync {
    /// Plugin name
    fn name(&self) -> &str;

    /// Formats this plugin unpacks
    fn supported_formats(&self) -> &[ContainerFormat];

    /// Decode a container into its manifest and entries
    fn unpack(&self, data: &[u8]) -> FormatResult<DecodedContainer>;
}

/// Ordered collection of registered strategies
///
/// Cloning is cheap; plugins are shared.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    compression: Vec<Arc<dyn CompressionPlugin>>,
    encryption: Vec<Arc<dyn EncryptionPlugin>>,
    processing: Vec<Arc<dyn ProcessingPlugin>>,
    decryption: Vec<Arc<dyn DecryptionPlugin>>,
    containers: Vec<Arc<dyn ContainerPlugin>>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("compression", &self.compression.len())
            .field("encryption", &self.encryption.len())
            .field("processing", &self.processing.len())
            .field("decryption", &self.decryption.len())
            .field("containers", &self.containers.len())
            .finish()
    }
}

impl PluginRegistry {
    /// Empty registry; only built-ins are available
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compression plugin
    pub fn register_compression(&mut self, plugin: Arc<dyn CompressionPlugin>) {
        debug!(algorithm = %plugin.algorithm(), "Registered compression plugin");
        self.compression.push(plugin);
    }

    /// Register an encryption plugin
    pub fn register_encryption(&mut self, plugin: Arc<dyn EncryptionPlugin>) {
        debug!(algorithm = %plugin.algorithm(), "Registered encryption plugin");
        self.encryption.push(plugin);
    }

    /// Register a processing plugin; plugins run in registration order
    pub fn register_processing(&mut self, plugin: Arc<dyn ProcessingPlugin>) {
        debug!(plugin = plugin.name(), "Registered processing plugin");
        self.processing.push(plugin);
    }

    /// Register a whole-file decryption plugin; plugins run in registration order
    pub fn register_decryption(&mut self, plugin: Arc<dyn DecryptionPlugin>) {
        debug!(plugin = plugin.name(), "Registered decryption plugin");
        self.decryption.push(plugin);
    }

    /// Register a container plugin
    pub fn register_container(&mut self, plugin: Arc<dyn ContainerPlugin>) {
        debug!(plugin = plugin.name(), "Registered container plugin");
        self.containers.push(plugin);
    }

    /// Compression strategy for `algorithm`, registered plugins first
    pub fn compression(
        &self,
        algorithm: CompressionAlgorithm,
    ) -> FormatResult<Arc<dyn CompressionPlugin>> {
        if let Some(plugin) = self
            .compression
            .iter()
            .find(|p| p.algorithm() == algorithm)
        {
            return Ok(Arc::clone(plugin));
        }
        match algorithm {
            CompressionAlgorithm::Deflate => Ok(Arc::new(DeflateCompression)),
            CompressionAlgorithm::None | CompressionAlgorithm::Lzma => Err(
                FormatError::UnsupportedFormat(format!("no codec for compression {algorithm}")),
            ),
        }
    }

    /// Encryption strategy for `algorithm`, registered plugins first
    ///
    /// The built-in Salsa20 strategy is only available when `key` is given.
    pub fn encryption(
        &self,
        algorithm: EncryptionAlgorithm,
        key: Option<&EncryptionKey>,
    ) -> FormatResult<Arc<dyn EncryptionPlugin>> {
        if let Some(plugin) = self.encryption.iter().find(|p| p.algorithm() == algorithm) {
            return Ok(Arc::clone(plugin));
        }
        match (algorithm, key) {
            (EncryptionAlgorithm::Salsa20, Some(key)) => {
                Ok(Arc::new(Salsa20Encryption::new(key.clone())))
            }
            (EncryptionAlgorithm::Salsa20, None) => Err(FormatError::Encryption(
                "salsa20 requires an encryption key".to_string(),
            )),
            (EncryptionAlgorithm::Aes256Gcm, _) => Err(FormatError::UnsupportedFormat(format!(
                "no codec for encryption {algorithm}"
            ))),
        }
    }

    /// Container plugin registered for `format`, if any
    pub fn container(&self, format: ContainerFormat) -> Option<Arc<dyn ContainerPlugin>> {
        self.containers
            .iter()
            .find(|p| p.supported_formats().contains(&format))
            .cloned()
    }

    /// Fold the applicable processing plugins over `data`
    pub fn process(&self, asset: &AssetInfo, data: Vec<u8>) -> FormatResult<Vec<u8>> {
        self.processing
            .iter()
            .filter(|p| p.applies_to(asset))
            .try_fold(data, |bytes, plugin| plugin.process(asset, bytes))
    }

    /// Fold the decryption plugins over a downloaded file
    pub fn decrypt_file(&self, data: Vec<u8>) -> FormatResult<Vec<u8>> {
        self.decryption
            .iter()
            .try_fold(data, |bytes, plugin| plugin.decrypt(bytes))
    }

    /// Whether any processing plugin is registered
    pub fn has_processing(&self) -> bool {
        !self.processing.is_empty()
    }
}

/// zlib-framed DEFLATE via `flate2`
#[derive(Debug, Clone, Copy, Default)]
pub struct DeflateCompression;

impl CompressionPlugin for DeflateCompression {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Deflate
    }

    fn compress(&self, data: &[u8], level: u32) -> FormatResult<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(data, Compression::new(level.min(9)));
        let mut compressed = Vec::new();
        encoder
            .read_to_end(&mut compressed)
            .map_err(|e| FormatError::Compression(format!("deflate failed: {e}")))?;
        Ok(compressed)
    }

    fn decompress(&self, data: &[u8]) -> FormatResult<Vec<u8>> {
        let mut decoder = ZlibDecoder::new(data);
        let mut decompressed = Vec::new();

        // Read in chunks to enforce size limit
        let mut buffer = [0u8; 8192];
        loop {
            let read = decoder
                .read(&mut buffer)
                .map_err(|e| FormatError::Compression(format!("inflate failed: {e}")))?;
            if read == 0 {
                break;
            }
            if decompressed.len() + read > MAX_DECOMPRESSION_SIZE {
                return Err(FormatError::Compression(format!(
                    "decompressed size exceeds limit of {MAX_DECOMPRESSION_SIZE} bytes"
                )));
            }
            decompressed.extend_from_slice(&buffer[..read]);
        }
        Ok(decompressed)
    }
}

/// 256-bit symmetric key
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Wrap raw key bytes
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-character hex key
    pub fn from_hex(value: &str) -> FormatResult<Self> {
        let bytes = hex::decode(value.trim())
            .map_err(|e| FormatError::Encryption(format!("invalid key hex: {e}")))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            FormatError::Encryption(format!("key must be 32 bytes, got {}", v.len()))
        })?;
        Ok(Self(bytes))
    }

    /// Raw key bytes
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Salsa20 with a fresh random nonce prefixed to every ciphertext
#[derive(Debug, Clone)]
pub struct Salsa20Encryption {
    key: EncryptionKey,
}

impl Salsa20Encryption {
    /// Create the cipher strategy for `key`
    pub const fn new(key: EncryptionKey) -> Self {
        Self { key }
    }

    fn apply(&self, nonce: [u8; SALSA20_NONCE_LEN], data: &mut [u8]) -> FormatResult<()> {
        let mut cipher = Salsa20::new(self.key.as_bytes().into(), &nonce.into());
        cipher
            .try_apply_keystream(data)
            .map_err(|e| FormatError::Encryption(format!("salsa20 keystream: {e}")))
    }
}

impl EncryptionPlugin for Salsa20Encryption {
    fn algorithm(&self) -> EncryptionAlgorithm {
        EncryptionAlgorithm::Salsa20
    }

    fn encrypt(&self, data: &[u8]) -> FormatResult<Vec<u8>> {
        let nonce: [u8; SALSA20_NONCE_LEN] = rand::random();
        let mut body = data.to_vec();
        self.apply(nonce, &mut body)?;

        let mut output = Vec::with_capacity(SALSA20_NONCE_LEN + body.len());
        output.extend_from_slice(&nonce);
        output.extend_from_slice(&body);
        Ok(output)
    }

    fn decrypt(&self, data: &[u8]) -> FormatResult<Vec<u8>> {
        if data.len() < SALSA20_NONCE_LEN {
            return Err(FormatError::Encryption(format!(
                "ciphertext shorter than {SALSA20_NONCE_LEN}-byte nonce"
            )));
        }
        let (nonce, body) = data.split_at(SALSA20_NONCE_LEN);
        let mut nonce_bytes = [0u8; SALSA20_NONCE_LEN];
        nonce_bytes.copy_from_slice(nonce);

        let mut output = body.to_vec();
        self.apply(nonce_bytes, &mut output)?;
        Ok(output)
    }
}

/// Resolved compress-then-encrypt pipeline for one container
#[derive(Clone, Default)]
pub struct PayloadTransform {
    compression: Option<(Arc<dyn CompressionPlugin>, u32)>,
    encryption: Option<Arc<dyn EncryptionPlugin>>,
}

impl fmt::Debug for PayloadTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadTransform")
            .field(
                "compression",
                &self.compression.as_ref().map(|(p, level)| (p.algorithm(), *level)),
            )
            .field("encryption", &self.encryption.as_ref().map(|p| p.algorithm()))
            .finish()
    }
}

impl PayloadTransform {
    /// Identity transform
    pub fn identity() -> Self {
        Self::default()
    }

    /// Add a compression stage
    #[must_use]
    pub fn with_compression(mut self, plugin: Arc<dyn CompressionPlugin>, level: u32) -> Self {
        self.compression = Some((plugin, level));
        self
    }

    /// Add an encryption stage
    #[must_use]
    pub fn with_encryption(mut self, plugin: Arc<dyn EncryptionPlugin>) -> Self {
        self.encryption = Some(plugin);
        self
    }

    /// Whether a compression stage is present
    pub const fn compresses(&self) -> bool {
        self.compression.is_some()
    }

    /// Whether an encryption stage is present
    pub const fn encrypts(&self) -> bool {
        self.encryption.is_some()
    }

    /// Compress, then encrypt
    pub fn seal(&self, data: &[u8]) -> FormatResult<Vec<u8>> {
        let compressed = match &self.compression {
            Some((plugin, level)) => plugin.compress(data, *level)?,
            None => data.to_vec(),
        };
        match &self.encryption {
            Some(plugin) => plugin.encrypt(&compressed),
            None => Ok(compressed),
        }
    }

    /// Decrypt, then decompress
    pub fn open(&self, data: &[u8]) -> FormatResult<Vec<u8>> {
        let decrypted = match &self.encryption {
            Some(plugin) => plugin.decrypt(data)?,
            None => data.to_vec(),
        };
        match &self.compression {
            Some((plugin, _)) => plugin.decompress(&decrypted),
            None => Ok(decrypted),
        }
    }
}
