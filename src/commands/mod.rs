//! # CLI Command Implementations
//!
//! Each subcommand of `emap` lives in its own file with:
//! - An `Args` struct that defines the command-specific arguments and options,
//!   derived using `clap`.
//! - An `execute` function that takes the parsed `Args` (and, for everything
//!   but `completions`, the loaded configuration) and calls into the
//!   `emap_runner` library.

pub mod completions;
pub mod config;
pub mod docker;
pub mod setup;
pub mod validation;
