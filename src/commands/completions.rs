//! # Completions Command Implementation
//!
//! Shell completion for `emap`, including the flags of every subcommand such
//! as `setup --only-update-config` and the `validation --use-*`/`--no-use-*`
//! pairs. `-f/--filename` completes as a file path. Nothing is read from the
//! global configuration, so this works outside a project directory.
//!
//! ```bash
//! emap completions bash > ~/.local/share/bash-completion/completions/emap
//! emap completions zsh > ~/.zfunc/_emap
//! ```

use std::io::{self, Write};

use anyhow::Result;
use clap::{Args, CommandFactory};
use clap_complete::{generate, Shell};

use crate::cli::Cli;

/// Name the scripts register completions for.
const BIN_NAME: &str = "emap";

/// Generate shell completion scripts
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// The shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Write the completion script for `shell` to `out`.
pub fn write_completions(shell: Shell, out: &mut dyn Write) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, BIN_NAME, out);
}

pub fn execute(args: CompletionsArgs) -> Result<()> {
    let mut stdout = io::stdout().lock();
    write_completions(args.shell, &mut stdout);
    stdout.flush()?;
    Ok(())
}
