//! Shared test utilities for integration and E2E tests.
//!
//! ## Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! #[test]
//! fn test_example() {
//!     let fixture = TestFixture::new().with_config(configs::MINIMAL);
//!     fixture.command().args(["config", "-g"]).assert().success();
//! }
//! ```

use assert_fs::prelude::*;
use std::path::{Path, PathBuf};

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use assert_fs::TempDir;
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::configs;
    pub use super::TestFixture;
}

/// Global configuration snippets for testing.
#[allow(dead_code)]
pub mod configs {
    /// Two repositories and values for every section the templates use.
    pub const MINIMAL: &str = r#"
EMAP_PROJECT_NAME: emaptest
git_org_url: https://github.com/inform
repositories:
  emap:
    branch: develop
  hoover:
    repo_name: hoover
global:
  RABBITMQ_ADMIN_PORT: 5674
ids:
  IDS_SCHEMA: foo
  IDS_PASSWORD: secret
rabbitmq:
  RABBITMQ_DEFAULT_USER: emap
  RABBITMQ_DEFAULT_PASS: rabbit
glowroot:
  DOMAIN: localhost
  GLOWROOT_ADMIN_PORT: 4000
  GLOWROOT_USERNAME: glow
  GLOWROOT_PASSWORD: root
dates:
  start: 2020-01-01
  end: 2020-01-02
"#;

    /// A configuration without a hoover repository.
    pub const WITHOUT_HOOVER: &str = r#"
EMAP_PROJECT_NAME: emaptest
git_org_url: https://github.com/inform
repositories:
  emap:
ids:
  IDS_SCHEMA: foo
"#;

    /// Top level is a list, not a mapping.
    pub const NOT_A_MAPPING: &str = "- just\n- a list\n";
}

/// A project directory with an optional global configuration and files.
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
}

impl TestFixture {
    /// Create a new test fixture with an empty temporary directory.
    pub fn new() -> Self {
        Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Write `global-configuration.yaml` with the given content.
    pub fn with_config(self, content: &str) -> Self {
        self.with_file("global-configuration.yaml", content)
    }

    /// Add a file with the given path and content.
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.temp_dir
            .child(path)
            .write_str(content)
            .expect("Failed to write file");
        self
    }

    /// Get the path to the temporary directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Get the path to the config file.
    #[allow(dead_code)]
    pub fn config_path(&self) -> PathBuf {
        self.temp_dir.path().join("global-configuration.yaml")
    }

    /// Create a child path in the temp directory.
    #[allow(dead_code)]
    pub fn child(&self, path: &str) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child(path)
    }

    /// Create a command configured to run in this fixture's directory.
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("emap");
        cmd.current_dir(self.path()).env_remove("EMAP_CONFIG");
        cmd
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
