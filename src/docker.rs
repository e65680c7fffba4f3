//! # Docker Compose Runner
//!
//! EMAP's services are defined across several `docker-compose.yml` files, one
//! per repository or optional bundle. [`DockerRunner`] layers them into a
//! single invocation:
//!
//! ```text
//! docker compose -f emap/core/docker-compose.yml -f emap/hl7-reader/docker-compose.yml ... -p <project> <args>
//! ```
//!
//! Later files override earlier ones, so the order of
//! [`docker_compose_paths`] matters. Every file must exist before anything is
//! run.
//!
//! The validation runner talks to compose through the [`ComposeOperations`]
//! trait so that tests can script its output.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use log::{error, info};
use regex::Regex;

use crate::config::GlobalConfiguration;
use crate::error::{Error, Result};

/// Where the stdout of a compose call goes.
pub enum Output<'a> {
    /// Echo each line to our own stdout.
    Console,
    /// Stream into a file, created or truncated.
    File(&'a Path),
    /// Append each line to a caller-owned list.
    Lines(&'a mut Vec<String>),
}

/// Trait for compose operations - allows mocking in tests
pub trait ComposeOperations {
    /// Run `docker compose <args>` to completion.
    ///
    /// `args` is split on whitespace and surrounding double quotes are
    /// dropped, so it reads the way it would be typed, e.g.
    /// `"up -d glowroot-central"`.
    fn run(&self, args: &str, output: Output<'_>) -> Result<()>;

    /// Start `docker compose <args>` and return without waiting for it.
    fn start_detached(&self, args: &str) -> Result<()>;

    /// Whether `ps` reports `service` as running. No running services is
    /// simply `false`.
    fn service_is_up(&self, service: &str) -> Result<bool> {
        let mut lines = Vec::new();
        self.run("ps", Output::Lines(&mut lines))?;
        service_running_in(&lines, service)
    }
}

/// Whether any `ps` line names `service` and marks it as running.
pub fn service_running_in(lines: &[String], service: &str) -> Result<bool> {
    let service = Regex::new(&format!(r"(^|[\s_-]){}([\s_-]|$)", regex::escape(service)))?;
    let running = Regex::new(r"(?i)\b(running|up)\b")?;

    Ok(lines
        .iter()
        .any(|line| service.is_match(line) && running.is_match(line)))
}

/// Compose files for this project, in override order.
///
/// The core services and the hl7 reader are always present; the rest are
/// added when their feature flag or repository is configured. Hoover lives in
/// the checkout named by its `repo_name`.
pub fn docker_compose_paths(project_dir: &Path, config: &GlobalConfiguration) -> Vec<PathBuf> {
    let emap = project_dir.join("emap");
    let mut paths = vec![
        emap.join("core").join("docker-compose.yml"),
        emap.join("hl7-reader").join("docker-compose.yml"),
    ];

    if config.feature_enabled("fake_uds") {
        paths.push(emap.join("core").join("docker-compose.fake_services.yml"));
    }
    if config.feature_enabled("waveform") {
        paths.push(emap.join("waveform-reader").join("docker-compose.yml"));
    }
    if config.feature_enabled("waveform_synth") {
        paths.push(emap.join("waveform-generator").join("docker-compose.yml"));
    }
    if config.has_repository("hoover") {
        let dir = config
            .get_string(&["repositories", "hoover", "repo_name"])
            .unwrap_or_else(|_| "hoover".to_string());
        paths.push(project_dir.join(dir).join("docker-compose.yml"));
    }

    paths
}

/// Runs `docker compose` over all of the project's compose files.
#[derive(Debug, Clone)]
pub struct DockerRunner {
    project_dir: PathBuf,
    project_name: String,
    compose_paths: Vec<PathBuf>,
    program: Vec<String>,
}

impl DockerRunner {
    /// Create a runner for the project checked out in `project_dir`.
    pub fn new(project_dir: &Path, config: &GlobalConfiguration) -> Result<Self> {
        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            project_name: config.project_name()?,
            compose_paths: docker_compose_paths(project_dir, config),
            program: vec!["docker".to_string(), "compose".to_string()],
        })
    }

    /// Use another program in place of `docker compose`.
    pub fn with_program<I, S>(mut self, program: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.program = program.into_iter().map(Into::into).collect();
        self
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn docker_compose_paths(&self) -> &[PathBuf] {
        &self.compose_paths
    }

    /// The full command line for `args`, for logging and spawning.
    pub fn command_line(&self, args: &str) -> Vec<String> {
        let mut cmd = self.program.clone();
        for path in &self.compose_paths {
            cmd.push("-f".to_string());
            cmd.push(path.display().to_string());
        }
        cmd.push("-p".to_string());
        cmd.push(self.project_name.clone());
        cmd.extend(split_args(args));
        cmd
    }

    fn command(&self, args: &str) -> Result<Command> {
        let missing: Vec<String> = self
            .compose_paths
            .iter()
            .filter(|path| !path.exists())
            .map(|path| path.display().to_string())
            .collect();

        if !missing.is_empty() {
            return Err(Error::DockerRunner {
                message: format!(
                    "Cannot run docker compose {}. At least one path did not exist:\n {}",
                    args,
                    missing.join("\n ")
                ),
            });
        }

        let cmd = self.command_line(args);
        let (program, rest) = cmd.split_first().ok_or_else(|| Error::DockerRunner {
            message: "No compose program configured".to_string(),
        })?;

        let mut command = Command::new(program);
        command.args(rest).current_dir(&self.project_dir);
        Ok(command)
    }
}

fn split_args(args: &str) -> impl Iterator<Item = String> + '_ {
    args.split_whitespace().map(|arg| arg.trim_matches('"').to_string())
}

impl ComposeOperations for DockerRunner {
    fn run(&self, args: &str, output: Output<'_>) -> Result<()> {
        let mut command = self.command(args)?;
        info!("Running:\n {}\n", self.command_line(args).join(" "));

        let mut child = command
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| Error::DockerRunner {
                message: format!("Failed to start docker compose {}: {}", args, e),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| Error::DockerRunner {
            message: "Failed to capture docker compose output".to_string(),
        })?;
        // the reader is dropped before waiting, so a child still writing
        // after a failed read gets a broken pipe rather than blocking
        let forwarded = forward_output(BufReader::new(stdout), output);
        let status = child.wait()?;
        forwarded?;

        match status.code() {
            Some(0) | None => Ok(()),
            Some(code) => Err(Error::DockerRunner {
                message: format!("Process failed with error code: {}", code),
            }),
        }
    }

    fn start_detached(&self, args: &str) -> Result<()> {
        let mut command = self.command(args)?;
        let line = self.command_line(args).join(" ");
        info!("Starting:\n {}\n", line);

        let mut child = command
            .stdout(Stdio::null())
            .spawn()
            .map_err(|e| Error::DockerRunner {
                message: format!("Failed to start docker compose {}: {}", args, e),
            })?;

        // Reaps the child; nothing joins this thread.
        thread::Builder::new()
            .name("compose-detached".to_string())
            .spawn(move || match child.wait() {
                Ok(status) if status.success() => info!("Finished {}", line),
                Ok(status) => error!("{} exited with {}", line, status),
                Err(e) => error!("Failed to wait for {}: {}", line, e),
            })?;

        Ok(())
    }
}

/// Read one line, replacing bytes that are not UTF-8. `None` at the end.
fn read_lossy_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<String>> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf);
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

fn forward_output<R: BufRead>(mut reader: R, output: Output<'_>) -> Result<()> {
    let mut buf = Vec::new();
    match output {
        Output::Console => {
            while let Some(line) = read_lossy_line(&mut reader, &mut buf)? {
                println!("{}", line);
            }
        }
        Output::File(path) => {
            let mut file = BufWriter::new(File::create(path)?);
            while let Some(line) = read_lossy_line(&mut reader, &mut buf)? {
                writeln!(file, "{}", line)?;
            }
            file.flush()?;
        }
        Output::Lines(lines) => {
            while let Some(line) = read_lossy_line(&mut reader, &mut buf)? {
                lines.push(line);
            }
        }
    }
    Ok(())
}

/// Password protect the glowroot admin console.
pub fn setup_glowroot_password(
    compose: &dyn ComposeOperations,
    config: &GlobalConfiguration,
) -> Result<()> {
    let username = config.get_string(&["glowroot", "GLOWROOT_USERNAME"])?;
    let password = config.get_string(&["glowroot", "GLOWROOT_PASSWORD"])?;

    compose
        .run(
            &format!(
                "run glowroot-central java -jar \"glowroot-central.jar\" setup-admin-user {} {}",
                username, password
            ),
            Output::Console,
        )
        .map_err(|e| Error::DockerRunner {
            message: format!(
                "{}\n\nFailed to password protect glowroot. Check that the docker \
                containers have enough available RAM",
                e
            ),
        })
}
