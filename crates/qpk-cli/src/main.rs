//! `qpk` binary entry point
//!
//! Parses arguments, initializes logging on stderr and dispatches to the
//! command handlers in the `qpk_cli` library. `RUST_LOG` overrides the
//! default `info` filter.

use anyhow::Result;
use clap::Parser;
use qpk_cli::{Cli, handle};

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    handle(cli.command, cli.format)
}
