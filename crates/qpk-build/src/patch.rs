//! Patch packager
//!
//! A patch container carries only the bytes of added and modified paths plus
//! a patch manifest. It is always compressed and never encrypted, whatever
//! the policy of the base bundle.

use chrono::Utc;
use qpk_formats::{
    AssetInfo, AssetPayload, AssetType, BundleManifest, CodecOptions, CompressionSettings,
    ContainerFormat, DecodedContainer, EncryptionSettings, ManifestOptions, PatchDescriptor,
    generate_manifest, patch_version, sha256_hex,
};
use std::fs;
use std::path::PathBuf;
use tracing::info;

use crate::diff::{DiffSummary, analyze_differences};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{BuildLog, LoggedAsset, VersionLedger};

/// Supplies the current bytes of a logical path
pub trait PayloadSource {
    /// Bytes stored for `path`
    fn read(&self, path: &str) -> LedgerResult<Vec<u8>>;
}

/// Reads payloads from an asset directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    /// Source rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PayloadSource for DirectorySource {
    fn read(&self, path: &str) -> LedgerResult<Vec<u8>> {
        fs::read(self.root.join(path)).map_err(|e| LedgerError::MissingPayload {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Reads payloads from a decoded bundle
#[derive(Debug, Clone)]
pub struct ContainerSource {
    container: DecodedContainer,
}

impl ContainerSource {
    /// Source backed by `container`
    pub const fn new(container: DecodedContainer) -> Self {
        Self { container }
    }
}

impl PayloadSource for ContainerSource {
    fn read(&self, path: &str) -> LedgerResult<Vec<u8>> {
        self.container
            .get(path)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| LedgerError::MissingPayload {
                path: path.to_string(),
                reason: "not present in container".to_string(),
            })
    }
}

/// Options for patch packaging
#[derive(Debug, Clone)]
pub struct PatchOptions {
    /// Container format of the patch
    pub format: ContainerFormat,
    /// Compression policy; patches are never stored uncompressed
    pub compression: CompressionSettings,
    /// Directory the patch file is written to; the bundle directory when unset
    pub output_dir: Option<PathBuf>,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            format: ContainerFormat::Qpk,
            compression: CompressionSettings::default(),
            output_dir: None,
        }
    }
}

/// Result of packaging a patch
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    /// Patch manifest
    pub manifest: BundleManifest,
    /// Written patch file
    pub path: PathBuf,
    /// Descriptor registered in the index
    pub descriptor: PatchDescriptor,
    /// Underlying diff
    pub diff: DiffSummary,
}

/// Patch file name for a version pair
pub fn patch_file_name(bundle: &str, from: u32, to: u32, format: ContainerFormat) -> String {
    format!("{bundle}-patch-v{from}-v{to}.{}", format.extension())
}

/// Rebuild the analyzer description of a logged asset
fn logged_info(path: &str, logged: &LoggedAsset) -> AssetInfo {
    AssetInfo {
        path: path.to_string(),
        asset_type: logged
            .asset_type
            .as_deref()
            .and_then(AssetType::parse)
            .unwrap_or(AssetType::Other),
        sub_type: logged.sub_type.clone(),
        locales: Vec::new(),
        size: logged.size,
        hash: logged.hash.clone(),
        version: logged.version,
    }
    .with_locales(logged.locales.clone())
}

/// Package the changes between two builds and register the patch
///
/// Returns `Ok(None)` without writing anything when the builds are identical.
pub fn generate_patch(
    ledger: &VersionLedger,
    from: &BuildLog,
    to: &BuildLog,
    source: &dyn PayloadSource,
    options: &PatchOptions,
) -> LedgerResult<Option<PatchOutcome>> {
    if from.bundle_name != to.bundle_name {
        return Err(LedgerError::InvalidRange(format!(
            "cannot diff {} against {}",
            from.bundle_name, to.bundle_name
        )));
    }
    if to.bundle_version <= from.bundle_version {
        return Err(LedgerError::InvalidRange(format!(
            "target version {} is not after {}",
            to.bundle_version, from.bundle_version
        )));
    }

    let diff = analyze_differences(from, to);
    if diff.is_empty() {
        info!(
            bundle = %to.bundle_name,
            from = from.bundle_version,
            to = to.bundle_version,
            "No changes, skipping patch"
        );
        return Ok(None);
    }

    let mut payloads = Vec::with_capacity(diff.added.len() + diff.modified.len());
    for change in diff.added.iter().chain(&diff.modified) {
        let Some(logged) = to.assets.get(&change.path) else {
            continue;
        };
        let data = source.read(&change.path)?;
        let actual = sha256_hex(&data);
        if actual != logged.hash {
            return Err(LedgerError::PayloadMismatch {
                path: change.path.clone(),
                expected: logged.hash.clone(),
                actual,
            });
        }
        payloads.push(AssetPayload::new(logged_info(&change.path, logged), data));
    }

    let compression = if options.compression.is_enabled() {
        options.compression
    } else {
        CompressionSettings::default()
    };
    let infos: Vec<AssetInfo> = payloads.iter().map(|p| p.info.clone()).collect();
    let mut manifest = generate_manifest(
        &to.bundle_name,
        &infos,
        &ManifestOptions {
            version: to.bundle_version,
            build_number: Some(to.build_number.clone()),
            format: options.format,
            compression,
            encryption: EncryptionSettings::default(),
            ..ManifestOptions::default()
        },
    )?;
    manifest.is_patch = true;
    manifest.from_version = Some(from.bundle_version);
    manifest.to_version = Some(to.bundle_version);
    manifest.patch_version = Some(patch_version(from.bundle_version, to.bundle_version));
    manifest.changes = Some(diff.changes());
    manifest.total_changes = Some(diff.total_changes());
    manifest.change_details = diff.records();

    let file = patch_file_name(
        &to.bundle_name,
        from.bundle_version,
        to.bundle_version,
        options.format,
    );
    let dir = options
        .output_dir
        .clone()
        .unwrap_or_else(|| ledger.bundle_dir());
    let path = dir.join(&file);

    let bytes = options.format.codec().write_file(
        &path,
        &payloads,
        &manifest,
        &CodecOptions::for_manifest(&manifest),
    )?;

    let descriptor = PatchDescriptor {
        file,
        hash: sha256_hex(&bytes),
        from_version: from.bundle_version,
        to_version: to.bundle_version,
        change_count: diff.total_changes(),
        size: bytes.len() as u64,
        created_at: Utc::now(),
    };
    ledger.register_patch(descriptor.clone())?;

    info!(
        bundle = %to.bundle_name,
        from = from.bundle_version,
        to = to.bundle_version,
        added = diff.added.len(),
        modified = diff.modified.len(),
        deleted = diff.deleted.len(),
        path = %path.display(),
        "Generated patch"
    );

    Ok(Some(PatchOutcome {
        manifest,
        path,
        descriptor,
        diff,
    }))
}

/// Load both build logs from the ledger and package the patch between them
pub fn generate_patch_between(
    ledger: &VersionLedger,
    from_version: u32,
    to_version: u32,
    source: &dyn PayloadSource,
    options: &PatchOptions,
) -> LedgerResult<Option<PatchOutcome>> {
    let from = ledger.require_build_log(from_version)?;
    let to = ledger.require_build_log(to_version)?;
    generate_patch(ledger, &from, &to, source, options)
}
