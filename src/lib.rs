//! # EMAP Runner Library
//!
//! This library sets up and runs a multi-repository EMAP deployment. It backs
//! the `emap` command-line tool but can be driven directly, for example from
//! a test harness that wants to run a validation with a fake compose backend.
//!
//! ## Quick Example
//!
//! ```
//! use emap_runner::config::GlobalConfiguration;
//! use emap_runner::env_file::EnvironmentFile;
//!
//! let config = GlobalConfiguration::from_yaml_str(
//!     "ids:\n  IDS_SCHEMA: star\nglobal:\n  EMAP_TIMEZONE: Europe/London\n",
//!     "global-configuration.yaml",
//! )
//! .unwrap();
//!
//! let mut env_file = EnvironmentFile::from_content(
//!     "config/ids-config-envs".into(),
//!     "IDS_SCHEMA=\nEMAP_TIMEZONE=\nUNSET=keep\n",
//! );
//! config.substitute_vars(&mut env_file);
//!
//! assert_eq!(env_file.unchanged_lines(), vec!["UNSET=keep\n"]);
//! ```
//!
//! ## Core Concepts
//!
//! - **Global configuration (`config`)**: one YAML document holding the
//!   repositories to check out and the values of every environment variable,
//!   grouped in sections named after the services.
//! - **Environment files (`env_file`)**: `KEY=value` templates shipped as
//!   `*-envs.EXAMPLE` files in each repository, filled from the configuration
//!   into a shared `config/` directory.
//! - **Repositories (`repository`, `git`)**: cloning, updating and cleaning
//!   the checkouts, with a fallback branch when a requested one is missing.
//! - **Compose (`docker`)**: runs `docker compose` over the files of the
//!   enabled services.
//! - **Validation runs (`validation`, `time_window`)**: a from-scratch rebuild
//!   over a time window that waits for RabbitMQ to drain, then saves logs and
//!   restores the config directory.

pub mod config;
pub mod docker;
pub mod env_file;
pub mod error;
pub mod git;
pub mod repository;
pub mod time_window;
pub mod validation;
