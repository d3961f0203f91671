use anyhow::{Context, Result};
use qpk_formats::{ContainerFormat, ContainerSummary};
use std::fs;
use std::path::Path;

use crate::commands::print_json;
use crate::{InspectArgs, OutputFormat};

pub fn handle(args: &InspectArgs, format: OutputFormat) -> Result<()> {
    let summary = inspect(&args.file)?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "file": args.file.display().to_string(),
            "format": summary.format,
            "version": summary.version,
            "compressed": summary.compressed,
            "encrypted": summary.encrypted,
            "entryCount": summary.entry_count,
            "manifestSize": summary.manifest_size,
            "totalSize": summary.total_size,
            "paths": summary.paths,
        })),
        OutputFormat::Text => {
            println!("{}", args.file.display());
            println!("  Format:     {}", summary.format);
            if let Some(version) = summary.version {
                println!("  Version:    {version}");
            }
            println!("  Compressed: {}", summary.compressed);
            println!("  Encrypted:  {}", summary.encrypted);
            println!("  Entries:    {}", summary.entry_count);
            println!("  Manifest:   {} bytes", summary.manifest_size);
            println!("  Total:      {} bytes", summary.total_size);
            for path in &summary.paths {
                println!("    {path}");
            }
            Ok(())
        }
    }
}

/// Summarize the container at `path`
pub fn inspect(path: &Path) -> Result<ContainerSummary> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let format = ContainerFormat::detect(&path.to_string_lossy(), &data);
    Ok(format.codec().inspect(&data)?)
}
