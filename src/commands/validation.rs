//! Validation command implementation
//!
//! Rebuilds EMAP from scratch over a time window and waits for every message
//! to be processed. See [`emap_runner::validation`] for the sequence.

use std::path::Path;

use anyhow::Result;
use clap::Args;
use emap_runner::config::GlobalConfiguration;
use emap_runner::docker::DockerRunner;
use emap_runner::time_window::{TimeWindow, DEFAULT_END, DEFAULT_START};
use emap_runner::validation::{
    SourceSelection, ValidationOptions, ValidationRunner, ValidationTimings,
};
use log::info;

/// Arguments for the validation command
#[derive(Args, Debug)]
pub struct ValidationArgs {
    /// Date at which to start parsing messages. Default: 7 days ago
    #[arg(short, long, value_name = "DATE", default_value = DEFAULT_START)]
    pub start_date: String,

    /// Date at which to stop parsing messages. Default: today
    #[arg(short, long, value_name = "DATE", default_value = DEFAULT_END)]
    pub end_date: String,

    /// Skip building the docker images
    #[arg(long)]
    pub skip_build: bool,

    /// Run the hl7 reader (default)
    #[arg(long, overrides_with = "no_use_hl7_reader")]
    pub use_hl7_reader: bool,

    /// Do not run the hl7 reader
    #[arg(long, overrides_with = "use_hl7_reader")]
    pub no_use_hl7_reader: bool,

    /// Run hoover (default if hoover is in the configured repositories)
    #[arg(long, overrides_with = "no_use_hoover")]
    pub use_hoover: bool,

    /// Do not run hoover
    #[arg(long, overrides_with = "use_hoover")]
    pub no_use_hoover: bool,

    /// Run the waveform synthesiser
    #[arg(long, overrides_with = "no_use_waveform_synth")]
    pub use_waveform_synth: bool,

    /// Do not run the waveform synthesiser (default)
    #[arg(long, overrides_with = "use_waveform_synth")]
    pub no_use_waveform_synth: bool,
}

impl ValidationArgs {
    fn sources(&self) -> SourceSelection {
        SourceSelection {
            hl7_reader: flag_pair(self.use_hl7_reader, self.no_use_hl7_reader),
            hoover: flag_pair(self.use_hoover, self.no_use_hoover),
            waveform_synth: flag_pair(self.use_waveform_synth, self.no_use_waveform_synth),
        }
    }
}

fn flag_pair(yes: bool, no: bool) -> Option<bool> {
    match (yes, no) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

/// Execute the validation command
pub fn execute(
    args: ValidationArgs,
    config: &GlobalConfiguration,
    project_dir: &Path,
) -> Result<()> {
    let options = ValidationOptions {
        time_window: TimeWindow::new(&args.start_date, &args.end_date)?,
        should_build: !args.skip_build,
        sources: args.sources(),
        timings: ValidationTimings::default(),
    };

    // sources are checked before the compose files, so a bad request fails
    // without needing a checkout
    let sources = options.sources.resolve(config)?;
    info!(
        "Validating {} to {} with {:?}",
        options.time_window.start.date(),
        options.time_window.end.date(),
        sources
    );

    let compose = DockerRunner::new(project_dir, config)?;
    let mut runner = ValidationRunner::new(&compose, config, project_dir, options)?;
    runner.run()?;

    info!("Validation run finished");
    Ok(())
}
