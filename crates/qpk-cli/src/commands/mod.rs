//! Command handlers

pub mod diff;
pub mod inspect;
pub mod pack;
pub mod patch;
pub mod verify;

use anyhow::Result;
use serde_json::Value;

use crate::{Commands, OutputFormat};

/// Run one parsed command
pub fn handle(command: Commands, format: OutputFormat) -> Result<()> {
    match command {
        Commands::Pack(args) => pack::handle(&args, format),
        Commands::Diff(args) => diff::handle(&args, format),
        Commands::Patch(args) => patch::handle(&args, format),
        Commands::Inspect(args) => inspect::handle(&args, format),
        Commands::Verify(args) => verify::handle(&args, format),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
