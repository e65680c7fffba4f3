//! Docker command implementation
//!
//! Passes its arguments through to `docker compose` with every enabled
//! service's compose file and the project name filled in.

use std::path::Path;

use anyhow::Result;
use clap::Args;
use emap_runner::config::GlobalConfiguration;
use emap_runner::docker::{setup_glowroot_password, ComposeOperations, DockerRunner, Output};

/// Arguments for the docker command
#[derive(Args, Debug)]
pub struct DockerArgs {
    /// Arguments to pass to docker compose, e.g. up, ps, down
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub docker_compose_args: Vec<String>,
}

/// Execute the docker command
pub fn execute(args: DockerArgs, config: &GlobalConfiguration, project_dir: &Path) -> Result<()> {
    let runner = DockerRunner::new(project_dir, config)?;
    run(&runner, config, &args.docker_compose_args)
}

/// Bringing services up password protects glowroot first, unless it is
/// already running.
fn run(
    compose: &dyn ComposeOperations,
    config: &GlobalConfiguration,
    compose_args: &[String],
) -> Result<()> {
    if compose_args.iter().any(|arg| arg == "up") && !compose.service_is_up("glowroot-central")? {
        setup_glowroot_password(compose, config)?;
    }

    compose.run(&compose_args.join(" "), Output::Console)?;
    Ok(())
}
