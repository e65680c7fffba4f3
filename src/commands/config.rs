//! Config command implementation

use anyhow::Result;
use clap::Args;
use emap_runner::config::GlobalConfiguration;

/// Arguments for the config command
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Print the RabbitMQ configuration for quick login
    #[arg(short = 'r', long)]
    pub print_rabbitmq: bool,

    /// Print the glowroot configuration for quick login
    #[arg(short = 'g', long)]
    pub print_glowroot: bool,
}

/// Execute the config command
pub fn execute(args: ConfigArgs, config: &GlobalConfiguration) -> Result<()> {
    if args.print_rabbitmq {
        println!("{}", config.rabbitmq_config_string());
    }

    if args.print_glowroot {
        println!("{}", config.glowroot_config_string());
    }

    Ok(())
}
