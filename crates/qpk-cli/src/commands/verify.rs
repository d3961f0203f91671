use anyhow::{Context, Result, bail};
use qpk_formats::{
    BundleManifest, CodecOptions, ContainerFormat, MerkleLeaf, merkle_root, open_container,
};
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::commands::print_json;
use crate::{OutputFormat, VerifyArgs, parse_key};

/// Outcome of a successful verification
#[derive(Debug, Clone)]
pub struct Verification {
    /// Decoded manifest
    pub manifest: BundleManifest,
    /// Detected format
    pub format: ContainerFormat,
    /// Number of entries whose hash matched
    pub entries: usize,
    /// Advisory manifest warnings
    pub warnings: Vec<String>,
}

pub fn handle(args: &VerifyArgs, format: OutputFormat) -> Result<()> {
    let verification = verify(&args.file, args.key.as_deref())?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "file": args.file.display().to_string(),
            "valid": true,
            "bundle": verification.manifest.name,
            "version": verification.manifest.version,
            "patch": verification.manifest.is_patch,
            "format": verification.format,
            "entries": verification.entries,
            "warnings": verification.warnings,
        })),
        OutputFormat::Text => {
            println!(
                "OK {} v{}: {} entries verified",
                verification.manifest.name, verification.manifest.version, verification.entries
            );
            for warning in &verification.warnings {
                println!("  warning: {warning}");
            }
            Ok(())
        }
    }
}

/// Decode `path`, check every entry hash, the manifest and its Merkle root
pub fn verify(path: &Path, key: Option<&str>) -> Result<Verification> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let format = ContainerFormat::detect(&path.to_string_lossy(), &data);
    let mut options = CodecOptions::default();
    options.key = parse_key(key)?;

    let container = open_container(format, &data, &options)?;
    let manifest = container.manifest;

    let report = manifest.validate();
    if !report.valid {
        bail!("invalid manifest: {}", report.errors.join("; "));
    }
    for warning in &report.warnings {
        warn!(file = %path.display(), "{warning}");
    }

    if let Some(expected) = &manifest.merkle_root {
        let actual = merkle_root(
            manifest
                .entries()
                .map(|e| MerkleLeaf::new(e.asset.path.clone(), e.asset.hash.clone())),
        );
        if actual != *expected {
            bail!("merkle root mismatch: manifest has {expected}, entries hash to {actual}");
        }
    }

    Ok(Verification {
        format,
        entries: container.entries.len(),
        warnings: report.warnings,
        manifest,
    })
}
