use anyhow::Result;
use qpk_build::{DiffSummary, analyze_differences};

use crate::commands::print_json;
use crate::{DiffArgs, OutputFormat};

pub fn handle(args: &DiffArgs, format: OutputFormat) -> Result<()> {
    let summary = diff(args)?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "fromVersion": summary.from_version,
            "toVersion": summary.to_version,
            "changes": summary.records(),
            "payloadSize": summary.payload_size(),
        })),
        OutputFormat::Text => {
            println!(
                "v{} -> v{}: {} added, {} modified, {} deleted",
                summary.from_version,
                summary.to_version,
                summary.added.len(),
                summary.modified.len(),
                summary.deleted.len()
            );
            for record in summary.records() {
                println!("  {:<8} {}", record.operation, record.path);
            }
            Ok(())
        }
    }
}

/// Compare two recorded builds
pub fn diff(args: &DiffArgs) -> Result<DiffSummary> {
    let ledger = args.ledger.ledger();
    let from = ledger.require_build_log(args.from)?;
    let to = ledger.require_build_log(args.to)?;
    Ok(analyze_differences(&from, &to))
}
