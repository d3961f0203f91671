//! QPK command-line library
//!
//! Argument definitions and handlers behind the `qpk` binary. Handlers take
//! parsed arguments and an [`OutputFormat`], so they can be driven from
//! tests without spawning a process.

pub mod analyze;
pub mod commands;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use qpk_build::VersionLedger;
use qpk_formats::{CompressionAlgorithm, CompressionSettings, ContainerFormat, EncryptionKey};
use std::path::PathBuf;

pub use crate::commands::handle;

/// Top-level arguments of the `qpk` binary
#[derive(Parser, Debug)]
#[command(
    name = "qpk",
    about = "Build, diff, patch and inspect QPK asset bundles",
    version,
    long_about = "A command-line tool for producing versioned asset bundles, packaging minimal patches between recorded builds and checking containers."
)]
pub struct Cli {
    /// Output format
    #[arg(short = 'o', long, value_enum, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for command results
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Text,
    /// JSON output
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a new bundle version from an asset directory
    Pack(PackArgs),

    /// Show the changes between two recorded builds
    Diff(DiffArgs),

    /// Package a patch between two recorded builds and register it
    Patch(PatchArgs),

    /// Show container header information without decoding payloads
    Inspect(InspectArgs),

    /// Decode a container and check every asset hash
    Verify(VerifyArgs),
}

/// Location of a bundle's ledger
#[derive(Args, Debug, Clone)]
pub struct LedgerArgs {
    /// Bundle name
    #[arg(short, long, default_value = "main")]
    pub name: String,

    /// Output directory holding containers, build logs and indices
    #[arg(short = 'd', long, env = "QPK_OUTPUT_DIR", default_value = "dist")]
    pub output: PathBuf,

    /// Keep the bundle under <output>/<name> and maintain the workspace index
    #[arg(short, long)]
    pub workspace: bool,
}

impl LedgerArgs {
    /// Ledger these arguments point at
    pub fn ledger(&self) -> VersionLedger {
        if self.workspace {
            VersionLedger::workspace(&self.output, &self.name)
        } else {
            VersionLedger::new(&self.output, &self.name)
        }
    }
}

/// Compression choice on the command line
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompressionChoice {
    /// Store payloads as-is
    None,
    /// DEFLATE
    #[default]
    Deflate,
}

impl CompressionChoice {
    /// Settings for this choice at `level`
    pub const fn settings(self, level: u32) -> CompressionSettings {
        match self {
            Self::None => CompressionSettings::none(),
            Self::Deflate => CompressionSettings {
                algorithm: CompressionAlgorithm::Deflate,
                level,
            },
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct PackArgs {
    /// Asset directory; the first path segment selects the asset type
    pub assets: PathBuf,

    #[command(flatten)]
    pub ledger: LedgerArgs,

    /// Container format
    #[arg(short = 'F', long = "container", value_parser = parse_container_format, default_value = "qpk")]
    pub container: ContainerFormat,

    /// Payload compression
    #[arg(short, long, value_enum, default_value = "deflate")]
    pub compression: CompressionChoice,

    /// DEFLATE level (0-9)
    #[arg(short, long, default_value_t = 6, value_parser = clap::value_parser!(u32).range(0..=9))]
    pub level: u32,

    /// Encrypt payloads with the built-in Salsa20 cipher
    #[arg(short, long)]
    pub encrypt: bool,

    /// Hex encoded 32-byte encryption key
    #[arg(short, long, env = "QPK_ENCRYPTION_KEY", hide_env_values = true)]
    pub key: Option<String>,

    /// Rebuild the current version instead of allocating the next one
    #[arg(long)]
    pub no_increment: bool,

    /// Locale served when no better match exists
    #[arg(long)]
    pub default_locale: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DiffArgs {
    #[command(flatten)]
    pub ledger: LedgerArgs,

    /// Older build version
    #[arg(long)]
    pub from: u32,

    /// Newer build version
    #[arg(long)]
    pub to: u32,
}

#[derive(Args, Debug, Clone)]
pub struct PatchArgs {
    #[command(flatten)]
    pub ledger: LedgerArgs,

    /// Older build version
    #[arg(long)]
    pub from: u32,

    /// Newer build version
    #[arg(long)]
    pub to: u32,

    /// Read changed payloads from this directory instead of the newer container
    #[arg(short, long)]
    pub assets: Option<PathBuf>,

    /// Container format of the patch
    #[arg(short = 'F', long = "container", value_parser = parse_container_format, default_value = "qpk")]
    pub container: ContainerFormat,

    /// Hex encoded key for reading an encrypted newer container
    #[arg(short, long, env = "QPK_ENCRYPTION_KEY", hide_env_values = true)]
    pub key: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    /// Container file
    pub file: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct VerifyArgs {
    /// Container file
    pub file: PathBuf,

    /// Hex encoded key for encrypted containers
    #[arg(short, long, env = "QPK_ENCRYPTION_KEY", hide_env_values = true)]
    pub key: Option<String>,
}

fn parse_container_format(value: &str) -> Result<ContainerFormat, String> {
    ContainerFormat::parse(value).ok_or_else(|| format!("unknown container format '{value}'"))
}

/// Parse an optional hex key from the command line
pub fn parse_key(value: Option<&str>) -> anyhow::Result<Option<EncryptionKey>> {
    value
        .map(|hex| EncryptionKey::from_hex(hex).context("invalid encryption key"))
        .transpose()
}
