//! Setup command implementation
//!
//! Clones, updates or removes the repositories named in the global
//! configuration, then rewrites the shared `config/` directory from their
//! environment templates.

use std::path::Path;

use anyhow::Result;
use clap::{ArgGroup, Args};
use emap_runner::config::GlobalConfiguration;
use emap_runner::repository::DefaultGitOperations;
use log::info;

/// Branch every repository falls back to.
pub const DEFAULT_BRANCH: &str = "develop";

/// Arguments for the setup command
#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .args(["init", "update", "clean", "only_update_config"])
))]
pub struct SetupArgs {
    /// Clone repositories and create the config dir
    #[arg(short, long)]
    pub init: bool,

    /// Update repositories and config files
    #[arg(short, long)]
    pub update: bool,

    /// Remove the local repositories
    #[arg(short, long)]
    pub clean: bool,

    /// Only update the config dir from the global configuration
    #[arg(short = 'g', long, alias = "only-update-config-from-global")]
    pub only_update_config: bool,

    /// Branch to clone or update to, overriding the global configuration.
    /// Falls back to develop if the branch does not exist
    #[arg(short, long, value_name = "NAME")]
    pub branch: Option<String>,

    /// Clone over ssh instead of https
    #[arg(long, requires = "init")]
    pub ssh: bool,
}

/// Execute the setup command
pub fn execute(args: SetupArgs, config: &GlobalConfiguration, project_dir: &Path) -> Result<()> {
    let repos = config.extract_repositories(
        project_dir,
        Box::new(DefaultGitOperations),
        args.branch.as_deref(),
        DEFAULT_BRANCH,
    )?;

    if args.init {
        repos.clean(false)?;
        repos.clone_all(args.ssh)?;
    } else if args.update {
        repos.update()?;
    } else if args.clean {
        repos.clean(true)?;
        return Ok(());
    }

    config.create_or_update_config_dir_from(&repos)?;
    info!("All done");
    Ok(())
}
