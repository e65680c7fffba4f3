//! Thin wrappers over the system `git` binary.
//!
//! Using the command line rather than a library means SSH keys, credential
//! helpers and anything else configured in `~/.gitconfig` just work.
//! `GIT_TERMINAL_PROMPT=0` stops git from hanging on a credentials prompt.

use std::path::Path;
use std::process::{Command, Output};

use crate::error::{Error, Result};

fn git() -> Command {
    let mut command = Command::new("git");
    command.env("GIT_TERMINAL_PROMPT", "0");
    command
}

fn run(repo: &str, mut command: Command, description: &str) -> Result<Output> {
    let output = command.output().map_err(|e| Error::RepoOperation {
        repo: repo.to_string(),
        message: format!("Failed to run git {}: {}", description, e),
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::RepoOperation {
            repo: repo.to_string(),
            message: format!("git {} failed: {}", description, stderr.trim()),
        });
    }

    Ok(output)
}

/// Clone `url` at `branch` into `target_dir`.
///
/// Progress is written straight to the terminal. Fails if git does, which
/// includes `target_dir` already existing and not being empty.
pub fn clone_branch(url: &str, branch: &str, target_dir: &Path) -> Result<()> {
    if let Some(parent) = target_dir.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut command = git();
    command
        .args(["clone", "--branch", branch, url])
        .arg(target_dir);

    let status = command.status().map_err(|e| Error::RepoOperation {
        repo: url.to_string(),
        message: format!("Failed to run git clone: {}", e),
    })?;

    if !status.success() {
        let message = format!(
            "Repos could not be cloned. Make sure you have access to the repository \
            (SSH key in ssh-agent, git credentials or a personal access token). \
            git exited with {}",
            status
        );
        return Err(Error::RepoOperation {
            repo: url.to_string(),
            message,
        });
    }

    Ok(())
}

/// Check out `branch` in the repository at `repo_dir`.
pub fn checkout(repo_dir: &Path, branch: &str) -> Result<()> {
    let mut command = git();
    command.arg("-C").arg(repo_dir).args(["checkout", branch]);
    run(&repo_dir.display().to_string(), command, "checkout").map(|_| ())
}

/// Pull the current branch of the repository at `repo_dir`.
pub fn pull(repo_dir: &Path) -> Result<()> {
    let mut command = git();
    command.arg("-C").arg(repo_dir).arg("pull");
    run(&repo_dir.display().to_string(), command, "pull").map(|_| ())
}

/// List the branch names (heads) of a remote repository.
pub fn list_remote_branches(url: &str) -> Result<Vec<String>> {
    let mut command = git();
    command.args(["ls-remote", "--heads", url]);
    let output = run(url, command, "ls-remote --heads")?;

    Ok(parse_ls_remote_heads(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse `git ls-remote --heads` output.
///
/// Each line looks like `<hash>\trefs/heads/<branch>`; the branch is the last
/// `/`-separated component.
pub fn parse_ls_remote_heads(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| line.rsplit('/').next())
        .map(|branch| branch.trim().to_string())
        .collect()
}
