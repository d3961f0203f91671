use anyhow::{Result, bail};
use qpk_build::{BuildOptions, BuildOutcome, BundleBuilder};
use qpk_formats::{EncryptionAlgorithm, EncryptionSettings};
use tracing::info;

use crate::analyze::analyze_directory;
use crate::commands::print_json;
use crate::{OutputFormat, PackArgs, parse_key};

pub fn handle(args: &PackArgs, format: OutputFormat) -> Result<()> {
    let outcome = build(args)?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "bundle": outcome.manifest.name,
            "path": outcome.container_path.display().to_string(),
            "build": outcome.build_log.descriptor(),
        })),
        OutputFormat::Text => {
            println!(
                "Built {} v{} (build {})",
                outcome.manifest.name,
                outcome.version.bundle_version,
                outcome.version.build_number
            );
            println!("  Path:        {}", outcome.container_path.display());
            println!("  Files:       {}", outcome.manifest.total_files);
            println!("  Asset bytes: {}", outcome.manifest.total_size);
            println!("  Container:   {} bytes", outcome.build_log.container_size);
            if let Some(root) = &outcome.manifest.merkle_root {
                println!("  Merkle root: {root}");
            }
            Ok(())
        }
    }
}

/// Analyze the asset directory and build the next bundle version
pub fn build(args: &PackArgs) -> Result<BuildOutcome> {
    let key = parse_key(args.key.as_deref())?;
    if args.encrypt && key.is_none() {
        bail!("--encrypt requires --key or QPK_ENCRYPTION_KEY");
    }

    let assets = analyze_directory(&args.assets)?;
    if assets.is_empty() {
        bail!("no assets found under {}", args.assets.display());
    }
    info!(
        bundle = %args.ledger.name,
        assets = assets.len(),
        dir = %args.assets.display(),
        "Analyzed asset directory"
    );

    let encryption = if args.encrypt {
        EncryptionSettings::with(EncryptionAlgorithm::Salsa20)
    } else {
        EncryptionSettings::default()
    };
    let options = BuildOptions {
        format: args.container,
        compression: args.compression.settings(args.level),
        encryption,
        key,
        increment_version: !args.no_increment,
        default_locale: args.default_locale.clone(),
        ..BuildOptions::default()
    };

    let ledger = args.ledger.ledger();
    Ok(BundleBuilder::new(&ledger, options).build(assets)?)
}
