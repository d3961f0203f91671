use anyhow::Result;
use qpk_build::patch::generate_patch_between;
use qpk_build::{ContainerSource, DirectorySource, PatchOptions, PatchOutcome, PayloadSource};
use qpk_formats::CodecOptions;
use tracing::info;

use crate::commands::print_json;
use crate::{OutputFormat, PatchArgs, parse_key};

pub fn handle(args: &PatchArgs, format: OutputFormat) -> Result<()> {
    let outcome = package(args)?;
    match (format, outcome) {
        (OutputFormat::Json, outcome) => print_json(&serde_json::json!({
            "patch": outcome.as_ref().map(|o| &o.descriptor),
        })),
        (OutputFormat::Text, None) => {
            println!("No changes between v{} and v{}", args.from, args.to);
            Ok(())
        }
        (OutputFormat::Text, Some(outcome)) => {
            let diff = &outcome.diff;
            println!(
                "Patch v{} -> v{}: {}",
                args.from,
                args.to,
                outcome.path.display()
            );
            println!("  Added:    {}", diff.added.len());
            println!("  Modified: {}", diff.modified.len());
            println!("  Deleted:  {}", diff.deleted.len());
            println!("  Size:     {} bytes", outcome.descriptor.size);
            Ok(())
        }
    }
}

/// Package and register the patch between two recorded builds
///
/// Returns `None` when the builds carry identical assets.
pub fn package(args: &PatchArgs) -> Result<Option<PatchOutcome>> {
    let ledger = args.ledger.ledger();
    let source: Box<dyn PayloadSource> = match &args.assets {
        Some(dir) => Box::new(DirectorySource::new(dir)),
        None => {
            let to = ledger.require_build_log(args.to)?;
            let path = ledger.bundle_dir().join(&to.container_file);
            let mut options = CodecOptions::default();
            options.key = parse_key(args.key.as_deref())?;
            info!(path = %path.display(), "Reading payloads from newer container");
            Box::new(ContainerSource::new(
                to.format.codec().read_file(&path, &options)?,
            ))
        }
    };

    let options = PatchOptions {
        format: args.container,
        ..PatchOptions::default()
    };
    Ok(generate_patch_between(
        &ledger,
        args.from,
        args.to,
        source.as_ref(),
        &options,
    )?)
}
