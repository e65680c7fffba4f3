//! CLI argument parsing and command dispatch

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueHint};
use emap_runner::config::{GlobalConfiguration, DEFAULT_CONFIG_FILENAME};

use crate::commands;

/// EMAP runner - Setup, update and run an instance of EMAP
#[derive(Parser, Debug)]
#[command(name = "emap")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Path to the .yaml file containing the global configuration
    #[arg(
        short,
        long,
        global = true,
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        env = "EMAP_CONFIG",
        default_value = DEFAULT_CONFIG_FILENAME
    )]
    filename: PathBuf,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialise, update or clean the repository directories
    Setup(commands::setup::SetupArgs),

    /// Run docker compose over the enabled services, e.g. `emap docker ps`
    Docker(commands::docker::DockerArgs),

    /// Run a validation of the full pipeline
    Validation(commands::validation::ValidationArgs),

    /// Print login details from the configuration
    Config(commands::config::ConfigArgs),

    /// Generate shell completion scripts
    Completions(commands::completions::CompletionsArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        init_logging(&self.log_level);

        if let Commands::Completions(args) = self.command {
            return commands::completions::execute(args);
        }

        let config = GlobalConfiguration::from_file(&self.filename)?;
        let project_dir =
            std::env::current_dir().context("Failed to determine the current directory")?;

        match self.command {
            Commands::Setup(args) => commands::setup::execute(args, &config, &project_dir),
            Commands::Docker(args) => commands::docker::execute(args, &config, &project_dir),
            Commands::Validation(args) => {
                commands::validation::execute(args, &config, &project_dir)
            }
            Commands::Config(args) => commands::config::execute(args, &config),
            Commands::Completions(_) => Ok(()),
        }
    }
}

/// `RUST_LOG` wins over `--log-level` when set.
fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    // a second init (e.g. in tests) is harmless
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .try_init();
}
