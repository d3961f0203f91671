//! Bundle builder
//!
//! Runs the producer pipeline for one bundle:
//!
//! 1. processing plugins rewrite payloads, hashes are refreshed
//! 2. the ledger assigns the version pair
//! 3. the manifest is generated, including the Merkle root
//! 4. the container is written atomically
//! 5. the build log is saved and the index updated

use chrono::{DateTime, Utc};
use qpk_formats::{
    AssetPayload, BundleManifest, CodecOptions, CompressionSettings, ContainerFormat,
    EncryptionKey, EncryptionSettings, ManifestOptions, PluginRegistry, ensure_unique_keys,
    generate_manifest, sha256_hex,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::LedgerResult;
use crate::ledger::{BuildLog, LoggedAsset, VersionInfo, VersionLedger};

/// An analyzed asset with its bytes and source modification time
#[derive(Debug, Clone)]
pub struct SourceAsset {
    /// Description and bytes
    pub payload: AssetPayload,
    /// Modification time of the source file
    pub modified: Option<DateTime<Utc>>,
}

impl SourceAsset {
    /// Wrap a payload without a modification time
    pub const fn new(payload: AssetPayload) -> Self {
        Self {
            payload,
            modified: None,
        }
    }

    /// Attach a modification time
    #[must_use]
    pub const fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }
}

/// Options for building one bundle
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Container format
    pub format: ContainerFormat,
    /// Compression policy
    pub compression: CompressionSettings,
    /// Encryption policy
    pub encryption: EncryptionSettings,
    /// Key for the built-in cipher
    pub key: Option<EncryptionKey>,
    /// Processing, compression and encryption strategies
    pub plugins: PluginRegistry,
    /// Bump the bundle version instead of reusing it
    pub increment_version: bool,
    /// Explicit default locale
    pub default_locale: Option<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            format: ContainerFormat::Qpk,
            compression: CompressionSettings::default(),
            encryption: EncryptionSettings::default(),
            key: None,
            plugins: PluginRegistry::new(),
            increment_version: true,
            default_locale: None,
        }
    }
}

/// Everything a build produced
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// Assigned version pair
    pub version: VersionInfo,
    /// Manifest packed into the container
    pub manifest: BundleManifest,
    /// Written container
    pub container_path: PathBuf,
    /// Recorded build log
    pub build_log: BuildLog,
}

/// Builds bundles into a ledger
#[derive(Debug)]
pub struct BundleBuilder<'a> {
    ledger: &'a VersionLedger,
    options: BuildOptions,
}

impl<'a> BundleBuilder<'a> {
    /// Builder writing into `ledger`
    pub const fn new(ledger: &'a VersionLedger, options: BuildOptions) -> Self {
        Self { ledger, options }
    }

    /// Container file name for a version
    pub fn container_file_name(&self, version: u32) -> String {
        format!(
            "{}-v{version}.{}",
            self.ledger.bundle_name(),
            self.options.format.extension()
        )
    }

    /// Build one bundle from analyzed assets
    pub fn build(&self, assets: Vec<SourceAsset>) -> LedgerResult<BuildOutcome> {
        let bundle = self.ledger.bundle_name();
        info!(bundle, assets = assets.len(), format = %self.options.format, "Building bundle");

        let mut payloads = Vec::with_capacity(assets.len());
        let mut logged = BTreeMap::new();
        for source in assets {
            let payload = self.process(source.payload)?;
            logged.insert(
                payload.info.path.clone(),
                LoggedAsset::from_info(&payload.info).with_mtime(source.modified),
            );
            payloads.push(payload);
        }

        let infos: Vec<_> = payloads.iter().map(|p| p.info.clone()).collect();
        ensure_unique_keys(&infos)?;

        let version = self
            .ledger
            .get_version_info(self.options.increment_version)?;

        let manifest = generate_manifest(
            bundle,
            &infos,
            &ManifestOptions {
                version: version.bundle_version,
                build_number: Some(version.build_number.clone()),
                format: self.options.format,
                compression: self.options.compression,
                encryption: self.options.encryption,
                default_locale: self.options.default_locale.clone(),
                merkle_root: true,
                created_at: Some(version.updated_at),
            },
        )?;

        let mut codec_options = CodecOptions::for_manifest(&manifest)
            .with_plugins(self.options.plugins.clone());
        codec_options.key.clone_from(&self.options.key);

        let container_path = self
            .ledger
            .bundle_dir()
            .join(self.container_file_name(version.bundle_version));
        self.options.format.codec().write_file(
            &container_path,
            &payloads,
            &manifest,
            &codec_options,
        )?;

        let build_log =
            self.ledger
                .save_build_log(&version, self.options.format, &container_path, logged)?;

        info!(
            bundle,
            version = version.bundle_version,
            build = %version.build_number,
            size = manifest.total_size,
            files = manifest.total_files,
            path = %container_path.display(),
            "Built bundle"
        );

        Ok(BuildOutcome {
            version,
            manifest,
            container_path,
            build_log,
        })
    }

    /// Fold processing plugins over one payload, refreshing its hash and size
    fn process(&self, payload: AssetPayload) -> LedgerResult<AssetPayload> {
        if !self.options.plugins.has_processing() {
            return Ok(payload);
        }
        let AssetPayload { mut info, data } = payload;
        let data = self.options.plugins.process(&info, data)?;

        let hash = sha256_hex(&data);
        if hash != info.hash {
            debug!(path = %info.path, "Processing plugins rewrote asset");
            info.hash = hash;
            info.size = data.len() as u64;
        }
        Ok(AssetPayload::new(info, data))
    }
}
