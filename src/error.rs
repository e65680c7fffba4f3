//! # Error Handling
//!
//! This module defines the centralized error type for the `emap-runner`
//! library. It uses `thiserror` to build a single `Error` enum covering every
//! failure mode of setting up and running EMAP:
//!
//! - **`Configuration`**: the global configuration file is missing or
//!   malformed, or an environment template has an unexpected name.
//! - **`ConfigKey`**: a lookup exhausted every section of the configuration.
//! - **`RepoOperation`**: cloning, updating, cleaning or resolving the branch
//!   of a repository failed.
//! - **`DockerRunner`**: a compose file is missing or `docker compose`
//!   exited with a non-zero code.
//! - **`ValidationRunner`**: the queues did not drain in time, or an
//!   ingestion source was requested that the configuration does not define.
//!
//! I/O, YAML and regex errors are wrapped transparently. The binary turns any of
//! these into a non-zero exit with the `Display` message.

use thiserror::Error;

/// Main error type for emap-runner operations
#[derive(Error, Debug)]
pub enum Error {
    /// The configuration file could not be used as given.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A key was not found anywhere in the global configuration.
    #[error("Configuration key error: failed to find {key} in any part of {filename}")]
    ConfigKey { key: String, filename: String },

    /// A git operation on a repository failed.
    #[error("Repository operation error for {repo}: {message}")]
    RepoOperation { repo: String, message: String },

    /// Running `docker compose` failed.
    #[error("Docker runner error: {message}")]
    DockerRunner { message: String },

    /// A validation run could not be started or did not finish.
    #[error("Validation runner error: {message}")]
    ValidationRunner { message: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML parsing error, wrapped from `serde_yaml::Error`.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
