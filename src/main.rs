//! # EMAP Runner CLI
//!
//! This is the binary entry point for the `emap` command-line tool.
//!
//! Its primary responsibilities are:
//! - Parsing command-line arguments using `clap`.
//! - Loading the global configuration and dispatching to a subcommand.
//! - Turning any error into a message and a non-zero exit code.
//!
//! Everything else lives in the `emap_runner` library crate.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli.execute()
}
