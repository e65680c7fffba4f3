//! # Repositories
//!
//! EMAP is assembled from several git repositories cloned side by side into
//! one project directory, next to the generated `config/` directory:
//!
//! ```text
//! project/
//! ├── global-configuration.yaml
//! ├── config/            <- materialised environment files
//! ├── emap/
//! └── hoover/
//! ```
//!
//! A [`Repository`] moves through `absent -> cloned -> updated -> removed`.
//! Cloning onto an existing directory is refused rather than skipped.
//!
//! ## Design
//!
//! All git access goes through the [`GitOperations`] trait so tests can
//! replace the system `git` binary with a mock. [`DefaultGitOperations`]
//! forwards to the functions in [`crate::git`].

use std::fs;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use url::Url;
use walkdir::WalkDir;

use crate::env_file::{is_template_name, EnvironmentFile};
use crate::error::{Error, Result};

/// Name of the generated directory of environment files.
pub const CONFIG_DIR_NAME: &str = "config";

const TEMPLATE_SEARCH_DEPTH: usize = 3;

/// Trait for git operations - allows mocking in tests
pub trait GitOperations: Send + Sync {
    /// Clone `url` at `branch` into `target_dir`.
    fn clone_branch(&self, url: &str, branch: &str, target_dir: &Path) -> Result<()>;

    /// Check out `branch` in an existing clone.
    fn checkout(&self, repo_dir: &Path, branch: &str) -> Result<()>;

    /// Pull the checked out branch of an existing clone.
    fn pull(&self, repo_dir: &Path) -> Result<()>;

    /// Names of all branches on the remote.
    fn list_remote_branches(&self, url: &str) -> Result<Vec<String>>;
}

/// The default implementation of `GitOperations`, which uses the system's
/// `git` command.
pub struct DefaultGitOperations;

impl GitOperations for DefaultGitOperations {
    fn clone_branch(&self, url: &str, branch: &str, target_dir: &Path) -> Result<()> {
        crate::git::clone_branch(url, branch, target_dir)
    }

    fn checkout(&self, repo_dir: &Path, branch: &str) -> Result<()> {
        crate::git::checkout(repo_dir, branch)
    }

    fn pull(&self, repo_dir: &Path) -> Result<()> {
        crate::git::pull(repo_dir)
    }

    fn list_remote_branches(&self, url: &str) -> Result<Vec<String>> {
        crate::git::list_remote_branches(url)
    }
}

/// One git repository of the project.
#[derive(Debug, PartialEq, Eq)]
pub struct Repository {
    name: String,
    branch: String,
    host: String,
    org_path: String,
    main_dir: PathBuf,
}

impl Repository {
    /// Create a repository and resolve the branch to use.
    ///
    /// `main_git_url` is the https URL of the organisation, e.g.
    /// `https://github.com/inform`. If `branch` does not exist on the remote
    /// but `fallback_branch` does, the fallback is used. If the remote cannot
    /// be listed at all the branch is assumed to exist.
    pub fn new(
        name: &str,
        main_git_url: &str,
        main_dir: &Path,
        branch: &str,
        fallback_branch: &str,
        git_ops: &dyn GitOperations,
    ) -> Result<Self> {
        let (host, org_path) = parse_org_url(main_git_url)?;
        let mut repo = Self {
            name: name.to_string(),
            branch: branch.to_string(),
            host,
            org_path,
            main_dir: main_dir.to_path_buf(),
        };
        repo.branch = repo.branch_or_fallback_branch(branch, fallback_branch, git_ops)?;
        Ok(repo)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Local checkout directory.
    pub fn path(&self) -> PathBuf {
        self.main_dir.join(&self.name)
    }

    pub fn local_version_exists(&self) -> bool {
        self.path().exists()
    }

    /// e.g. `https://github.com/inform/emap`
    pub fn https_git_url(&self) -> String {
        if self.org_path.is_empty() {
            format!("https://{}/{}", self.host, self.name)
        } else {
            format!("https://{}/{}/{}", self.host, self.org_path, self.name)
        }
    }

    /// e.g. `git@github.com:inform/emap.git`
    pub fn ssh_git_url(&self) -> String {
        if self.org_path.is_empty() {
            format!("git@{}:{}.git", self.host, self.name)
        } else {
            format!("git@{}:{}/{}.git", self.host, self.org_path, self.name)
        }
    }

    /// Clone this repository. Refuses to touch an existing directory.
    pub fn clone(&self, git_ops: &dyn GitOperations, ssh: bool) -> Result<()> {
        if self.local_version_exists() {
            return Err(Error::RepoOperation {
                repo: self.name.clone(),
                message: format!("Cannot clone as {} already existed", self.path().display()),
            });
        }

        info!("Cloning {:20} on branch {:15}", self.name, self.branch);
        let url = if ssh {
            self.ssh_git_url()
        } else {
            self.https_git_url()
        };

        git_ops
            .clone_branch(&url, &self.branch, &self.path())
            .map_err(|e| Error::RepoOperation {
                repo: self.name.clone(),
                message: format!("Repos could not be cloned: {}", e),
            })
    }

    /// Check out the configured branch and pull it.
    pub fn update(&self, git_ops: &dyn GitOperations) -> Result<()> {
        info!("Checking out {}", self);
        let path = self.path();

        git_ops
            .checkout(&path, &self.branch)
            .and_then(|_| git_ops.pull(&path))
            .map_err(|e| Error::RepoOperation {
                repo: self.name.clone(),
                message: format!("Cannot checkout branch {}: {}", self.branch, e),
            })
    }

    /// Remove the local checkout, if there is one.
    pub fn clean(&self, print_warnings: bool) -> Result<()> {
        if self.local_version_exists() {
            fs::remove_dir_all(self.path())?;
        } else if print_warnings {
            warn!("Failed to remove {:30} as it did not exist", self.name);
        }
        Ok(())
    }

    /// Environment templates shipped in this repository, in path order.
    pub fn environment_files(&self) -> Result<Vec<EnvironmentFile>> {
        let path = self.path();
        if !path.exists() {
            return Err(Error::RepoOperation {
                repo: self.name.clone(),
                message: "Cannot obtain a set of environment files as it did not exist"
                    .to_string(),
            });
        }

        let mut templates: Vec<PathBuf> = WalkDir::new(&path)
            .max_depth(TEMPLATE_SEARCH_DEPTH)
            .into_iter()
            .filter_entry(|entry| entry.file_name() != ".git")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| entry.file_name().to_str().is_some_and(is_template_name))
            .map(|entry| entry.into_path())
            .collect();
        templates.sort();

        templates
            .iter()
            .map(EnvironmentFile::from_example_file)
            .collect()
    }

    fn branch_or_fallback_branch(
        &self,
        branch: &str,
        fallback_branch: &str,
        git_ops: &dyn GitOperations,
    ) -> Result<String> {
        let remote_branches = match git_ops.list_remote_branches(&self.https_git_url()) {
            Ok(branches) => branches,
            Err(e) => {
                error!("{}\nFailed to check remotes. Assuming branch exists", e);
                return Ok(branch.to_string());
            }
        };

        if remote_branches.iter().any(|b| b == branch) {
            Ok(branch.to_string())
        } else if remote_branches.iter().any(|b| b == fallback_branch) {
            warn!("Falling back to {} for {}", fallback_branch, self.name);
            Ok(fallback_branch.to_string())
        } else {
            Err(Error::RepoOperation {
                repo: self.name.clone(),
                message: format!(
                    "Failed to find either {} or {} on remote",
                    branch, fallback_branch
                ),
            })
        }
    }
}

impl std::fmt::Display for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Repository({}, branch={})", self.name, self.branch)
    }
}

/// Split an https organisation URL into host and organisation path.
fn parse_org_url(main_git_url: &str) -> Result<(String, String)> {
    let invalid = || Error::Configuration {
        message: format!(
            "Failed to parse {} as a git URL. Expecting it to start with https://",
            main_git_url
        ),
    };

    let url = Url::parse(main_git_url).map_err(|_| invalid())?;
    if url.scheme() != "https" {
        return Err(invalid());
    }
    let host = url.host_str().ok_or_else(invalid)?.to_string();
    let org_path = url.path().trim_matches('/').to_string();

    Ok((host, org_path))
}

/// All repositories of the project plus the directory they live in.
pub struct Repositories {
    repos: Vec<Repository>,
    main_dir: PathBuf,
    git_ops: Box<dyn GitOperations>,
}

impl Repositories {
    pub fn new(repos: Vec<Repository>, main_dir: &Path, git_ops: Box<dyn GitOperations>) -> Self {
        Self {
            repos,
            main_dir: main_dir.to_path_buf(),
            git_ops,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Repository> {
        self.repos.iter()
    }

    pub fn len(&self) -> usize {
        self.repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }

    /// The `config/` directory next to the repositories.
    pub fn config_dir_path(&self) -> PathBuf {
        self.main_dir.join(CONFIG_DIR_NAME)
    }

    pub fn clone_all(&self, ssh: bool) -> Result<()> {
        self.repos
            .iter()
            .try_for_each(|repo| repo.clone(self.git_ops.as_ref(), ssh))
    }

    pub fn update(&self) -> Result<()> {
        self.repos
            .iter()
            .try_for_each(|repo| repo.update(self.git_ops.as_ref()))
    }

    pub fn clean(&self, print_warnings: bool) -> Result<()> {
        self.repos
            .iter()
            .try_for_each(|repo| repo.clean(print_warnings))
    }

    /// Environment templates of every repository, repository by repository.
    pub fn environment_files(&self) -> Result<Vec<EnvironmentFile>> {
        let mut files = Vec::new();
        for repo in &self.repos {
            files.extend(repo.environment_files()?);
        }
        Ok(files)
    }
}
