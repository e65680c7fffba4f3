//! # Validation Runs
//!
//! A validation run rebuilds the star schema from scratch over a time window
//! and waits for every message to be processed:
//!
//! 1. Snapshot the config directory; it is restored when the run ends,
//!    whatever the outcome.
//! 2. Write the time window into the environment files.
//! 3. Start the services: storage and messaging, glowroot, then after a
//!    fixed delay the core processor in the background, then each enabled
//!    ingestion source to completion.
//! 4. Poll RabbitMQ until every queue is empty, or give up after a timeout.
//! 5. Save the logs and stop everything.
//!
//! The fixed delay before starting `emapstar` is a workaround for it failing
//! fast when RabbitMQ is not yet accepting connections. It is not a readiness
//! probe. A hung compose call hangs the run; only the drain wait has a
//! timeout.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};

use crate::config::GlobalConfiguration;
use crate::docker::{setup_glowroot_password, ComposeOperations, Output};
use crate::env_file::{is_env_file_name, EnvironmentFile};
use crate::error::{Error, Result};
use crate::repository::CONFIG_DIR_NAME;
use crate::time_window::TimeWindow;

/// Directory, under the project directory, that collects run logs.
pub const LOGS_DIR_NAME: &str = "validation_logs";

const START_DATE_KEYS: [&str; 2] = ["IDS_CFG_DEFAULT_START_DATETIME", "HOOVER_DATE_FROM"];
const END_DATE_KEYS: [&str; 2] = ["IDS_CFG_END_DATETIME", "HOOVER_DATE_UNTIL"];

const CORE_SERVICE: &str = "emapstar";
const GLOWROOT_SERVICE: &str = "glowroot-central";
const LOGGED_SERVICES: [&str; 2] = [CORE_SERVICE, "rabbitmq"];

/// Source of time for the drain wait.
pub trait Clock {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

/// Wall-clock time with real sleeps.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// A clock that only moves when slept on.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sleep(&self, duration: Duration) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) += duration;
    }
}

/// Durations that govern a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationTimings {
    /// Give up waiting for the queues after this long.
    pub timeout: Duration,
    /// Time between queue checks.
    pub poll_interval: Duration,
    /// Extra wait once the queues first read empty; they have been seen
    /// to empty briefly before a last burst of messages.
    pub settle_delay: Duration,
    /// Wait before starting the core processor in the background.
    pub core_start_delay: Duration,
}

impl Default for ValidationTimings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10 * 60 * 60),
            poll_interval: Duration::from_secs(120),
            settle_delay: Duration::from_secs(600),
            core_start_delay: Duration::from_secs(180),
        }
    }
}

/// A service that feeds messages into EMAP and exits when done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IngestionSource {
    Hl7Reader,
    Hoover,
    WaveformSynth,
}

impl IngestionSource {
    /// Compose service name.
    pub fn service(&self) -> &'static str {
        match self {
            IngestionSource::Hl7Reader => "hl7source",
            IngestionSource::Hoover => "hoover",
            IngestionSource::WaveformSynth => "waveform-generator",
        }
    }
}

/// Which ingestion sources the caller asked for. `None` means "use the
/// default for this configuration".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceSelection {
    pub hl7_reader: Option<bool>,
    pub hoover: Option<bool>,
    pub waveform_synth: Option<bool>,
}

impl SourceSelection {
    /// Resolve the selection against the configuration.
    ///
    /// The hl7 reader is on unless disabled. Hoover defaults to whether the
    /// configuration declares a `hoover` repository, and the waveform
    /// synthesiser is off unless asked for. Asking for a source the
    /// configuration cannot provide is an error.
    pub fn resolve(&self, config: &GlobalConfiguration) -> Result<Vec<IngestionSource>> {
        let hoover_available = config.has_repository("hoover");
        let synth_available = config.feature_enabled("waveform_synth");

        if self.hoover == Some(true) && !hoover_available {
            return Err(Error::ValidationRunner {
                message: format!(
                    "Hoover was requested but no hoover repository is defined in {}",
                    config.filename().display()
                ),
            });
        }
        if self.waveform_synth == Some(true) && !synth_available {
            return Err(Error::ValidationRunner {
                message: format!(
                    "The waveform synthesiser was requested but features.waveform_synth \
                    is not enabled in {}",
                    config.filename().display()
                ),
            });
        }

        let mut sources = Vec::new();
        if self.hl7_reader.unwrap_or(true) {
            sources.push(IngestionSource::Hl7Reader);
        }
        if self.hoover.unwrap_or(hoover_available) {
            sources.push(IngestionSource::Hoover);
        }
        if self.waveform_synth.unwrap_or(false) {
            sources.push(IngestionSource::WaveformSynth);
        }

        if sources.is_empty() {
            warn!("No ingestion sources are enabled. Nothing will be sent to EMAP");
        }
        Ok(sources)
    }
}

/// Options for one run.
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    pub time_window: TimeWindow,
    pub should_build: bool,
    pub sources: SourceSelection,
    pub timings: ValidationTimings,
}

/// Where a run has got to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    EnvSnapshotted,
    TimeWindowInjected,
    ServicesStarting,
    WaitingForDrain,
    LoggingAndStopped,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Drives a validation run through compose.
pub struct ValidationRunner<'a> {
    compose: &'a dyn ComposeOperations,
    config: &'a GlobalConfiguration,
    clock: Box<dyn Clock>,
    project_dir: PathBuf,
    time_window: TimeWindow,
    should_build: bool,
    sources: Vec<IngestionSource>,
    timings: ValidationTimings,
    today: NaiveDate,
    state: RunState,
}

impl<'a> ValidationRunner<'a> {
    /// Prepare a run. Fails if a requested ingestion source is not
    /// configured; nothing has been started at that point.
    pub fn new(
        compose: &'a dyn ComposeOperations,
        config: &'a GlobalConfiguration,
        project_dir: &Path,
        options: ValidationOptions,
    ) -> Result<Self> {
        let sources = options.sources.resolve(config)?;

        Ok(Self {
            compose,
            config,
            clock: Box::new(SystemClock::new()),
            project_dir: project_dir.to_path_buf(),
            today: chrono::Local::now().date_naive(),
            time_window: options.time_window,
            should_build: options.should_build,
            sources,
            timings: options.timings,
            state: RunState::Idle,
        })
    }

    /// Replace the wall clock, e.g. with a [`ManualClock`].
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Date used in log file names.
    pub fn with_log_date(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn sources(&self) -> &[IngestionSource] {
        &self.sources
    }

    pub fn env_dir_path(&self) -> PathBuf {
        self.project_dir.join(CONFIG_DIR_NAME)
    }

    pub fn logs_directory(&self) -> PathBuf {
        self.project_dir.join(LOGS_DIR_NAME)
    }

    /// Log file for a source or service, e.g.
    /// `validation_logs/rebuild_log_2024-01-10_hoover.txt`.
    pub fn log_file_path(&self, name: &str) -> PathBuf {
        self.logs_directory()
            .join(format!("rebuild_log_{}_{}.txt", self.today, name))
    }

    /// Run the whole pipeline.
    ///
    /// The config directory is restored on every exit path. If startup
    /// fails the logs are still saved and the services stopped, as far as
    /// that is possible.
    pub fn run(&mut self) -> Result<()> {
        let _snapshot = TemporaryEnvironmentState::capture(&self.env_dir_path())?;
        self.transition(RunState::EnvSnapshotted);

        let result = self.run_in_snapshot();
        self.transition(RunState::Idle);
        result
    }

    fn run_in_snapshot(&mut self) -> Result<()> {
        self.set_time_window_in_envs()?;
        self.transition(RunState::TimeWindowInjected);

        if let Err(e) = self.run_emap() {
            error!("Failed to start EMAP: {}", e);
            if let Err(stop_error) = self.save_logs_and_stop() {
                error!("Failed to save logs and stop: {}", stop_error);
            }
            return Err(e);
        }

        self.wait_for_queues_to_empty()?;
        self.save_logs_and_stop()
    }

    fn transition(&mut self, next: RunState) {
        debug!("Validation run: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Write the time window into every environment file of the config
    /// directory.
    pub fn set_time_window_in_envs(&self) -> Result<()> {
        let dir = self.env_dir_path();
        let mut names: Vec<String> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| is_env_file_name(name))
            .collect();
        names.sort();

        for name in names {
            let mut file = EnvironmentFile::open(dir.join(&name))?;
            self.set_time_window_in_env_file(&mut file);
            file.write(None)?;
        }
        Ok(())
    }

    /// Overwrite the date keys of one file.
    ///
    /// An explicit date always wins. A default date only fills keys the
    /// configuration left blank.
    pub fn set_time_window_in_env_file(&self, file: &mut EnvironmentFile) {
        let current = file.environment_variables();
        let window = [
            (START_DATE_KEYS, &self.time_window.start),
            (END_DATE_KEYS, &self.time_window.end),
        ];

        for (keys, date) in window {
            for key in keys {
                if !date.is_default() || is_blank(&current, key) {
                    file.replace_value_of(key, &date.stamp());
                }
            }
        }
    }

    fn run_emap(&mut self) -> Result<()> {
        self.transition(RunState::ServicesStarting);
        fs::create_dir_all(self.logs_directory())?;

        self.compose.run("down", Output::Console)?;
        if self.should_build {
            self.compose.run("build", Output::Console)?;
        }
        self.compose.run("up -d cassandra rabbitmq", Output::Console)?;

        if !self.compose.service_is_up(GLOWROOT_SERVICE)? {
            setup_glowroot_password(self.compose, self.config)?;
        }
        self.compose
            .run(&format!("up -d {}", GLOWROOT_SERVICE), Output::Console)?;
        self.compose.run("ps", Output::Console)?;

        info!("Starting {} in {:?}", CORE_SERVICE, self.timings.core_start_delay);
        self.clock.sleep(self.timings.core_start_delay);
        self.compose
            .start_detached(&format!("up -d {}", CORE_SERVICE))?;

        for source in &self.sources {
            let service = source.service();
            let log_file = self.log_file_path(service);
            self.compose.run(
                &format!("up --exit-code-from {service} {service}"),
                Output::File(&log_file),
            )?;
        }

        self.compose.run("ps", Output::Console)
    }

    /// Poll until every queue is empty, then wait the settle delay.
    ///
    /// On timeout the logs are saved and the services stopped before the
    /// error is returned.
    pub fn wait_for_queues_to_empty(&mut self) -> Result<()> {
        self.transition(RunState::WaitingForDrain);
        let start = self.clock.now();
        let spinner = drain_spinner();

        loop {
            let queued = self.queued_messages()?;
            if queued == 0 {
                break;
            }
            spinner.set_message(format!("{} messages queued", queued));

            self.clock.sleep(self.timings.poll_interval);
            let elapsed = self.clock.now().saturating_sub(start);

            if elapsed >= self.timings.timeout {
                spinner.finish_and_clear();
                if let Err(e) = self.save_logs_and_stop() {
                    error!("Failed to save logs and stop after the timeout: {}", e);
                }
                return Err(Error::ValidationRunner {
                    message: format!(
                        "Waiting for queue timed out. Elapsed time ({:?}) > timeout ({:?})",
                        elapsed, self.timings.timeout
                    ),
                });
            }
        }

        spinner.finish_and_clear();
        info!("Queues are empty. Waiting {:?} for stragglers", self.timings.settle_delay);
        self.clock.sleep(self.timings.settle_delay);
        Ok(())
    }

    fn queued_messages(&self) -> Result<u64> {
        let mut lines = Vec::new();
        self.compose
            .run("exec rabbitmq rabbitmqctl -q list_queues", Output::Lines(&mut lines))?;
        Ok(queued_message_count(&lines))
    }

    /// Dump status and logs, then stop all services. Safe to call twice.
    ///
    /// Every step is attempted, so the services are stopped even when saving
    /// a log fails. The first failure is returned.
    pub fn save_logs_and_stop(&mut self) -> Result<()> {
        let mut first_error: Option<Error> = None;
        let mut attempt = |step: &str, result: Result<()>| {
            if let Err(e) = result {
                error!("Failed to {}: {}", step, e);
                first_error.get_or_insert(e);
            }
        };

        attempt(
            "create the logs directory",
            fs::create_dir_all(self.logs_directory()).map_err(Error::from),
        );
        attempt("list services", self.compose.run("ps", Output::Console));
        for name in LOGGED_SERVICES {
            let log_file = self.log_file_path(name);
            attempt(
                "save logs",
                self.compose.run(&format!("logs {}", name), Output::File(&log_file)),
            );
        }
        attempt("stop services", self.compose.run("down", Output::Console));
        attempt("list services", self.compose.run("ps", Output::Console));

        self.transition(RunState::LoggingAndStopped);
        first_error.map_or(Ok(()), Err)
    }
}

fn is_blank(variables: &BTreeMap<String, String>, key: &str) -> bool {
    variables.get(key).is_some_and(|value| value.trim().is_empty())
}

fn drain_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} [{elapsed_precise}] {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message("waiting for queues to drain");
    spinner.enable_steady_tick(Duration::from_millis(250));
    spinner
}

/// Total messages in `rabbitmqctl list_queues` output.
///
/// Each data line ends in a message count; the header and blank lines are
/// skipped.
pub fn queued_message_count(lines: &[String]) -> u64 {
    lines
        .iter()
        .filter_map(|line| line.split_whitespace().last())
        .filter_map(|count| count.parse::<u64>().ok())
        .sum()
}

/// Whether every queue in `rabbitmqctl list_queues` output is empty.
pub fn all_queues_empty(lines: &[String]) -> bool {
    queued_message_count(lines) == 0
}

/// Snapshot of every file in a directory, written back when dropped.
///
/// Files created after the snapshot are left alone.
pub struct TemporaryEnvironmentState {
    files: Vec<(PathBuf, Vec<u8>)>,
}

impl TemporaryEnvironmentState {
    pub fn capture(dir: &Path) -> Result<Self> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() {
                let content = fs::read(&path)?;
                files.push((path, content));
            }
        }
        debug!("Snapshotted {} files in {}", files.len(), dir.display());
        Ok(Self { files })
    }

    /// Snapshotted paths and their content.
    pub fn files(&self) -> &[(PathBuf, Vec<u8>)] {
        &self.files
    }
}

impl Drop for TemporaryEnvironmentState {
    fn drop(&mut self) {
        for (path, content) in &self.files {
            if let Err(e) = fs::write(path, content) {
                error!("Failed to restore {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
EMAP_PROJECT_NAME: emaptest
repositories:
  emap:
  hoover:
glowroot:
  GLOWROOT_USERNAME: glow
  GLOWROOT_PASSWORD: root
features:
  waveform_synth: true
ids:
  IDS_SCHEMA: star
dates:
  start: 2020-01-01
  end: null
"#;

    /// Records every compose call and replays scripted queue listings.
    #[derive(Default)]
    struct MockCompose {
        calls: Arc<Mutex<Vec<String>>>,
        queue_listings: Arc<Mutex<VecDeque<Vec<String>>>>,
        ps_lines: Vec<String>,
        fail_on: Option<String>,
    }

    impl MockCompose {
        fn with_queue_feed(nonzero_polls: usize) -> Self {
            let mut feed = VecDeque::new();
            for _ in 0..nonzero_polls {
                feed.push_back(to_lines(&["name messages", "hl7Queue 4", "databaseExtracts 0"]));
            }
            feed.push_back(to_lines(&["name messages", "hl7Queue 0", "databaseExtracts 0"]));
            Self {
                queue_listings: Arc::new(Mutex::new(feed)),
                ..Self::default()
            }
        }

        fn count(&self, args: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| c.as_str() == args).count()
        }
    }

    impl ComposeOperations for MockCompose {
        fn run(&self, args: &str, output: Output<'_>) -> Result<()> {
            self.calls.lock().unwrap().push(args.to_string());
            if self.fail_on.as_deref() == Some(args) {
                return Err(Error::DockerRunner {
                    message: "Process failed with error code: 1".to_string(),
                });
            }
            match output {
                Output::Lines(lines) if args.contains("list_queues") => {
                    let mut feed = self.queue_listings.lock().unwrap();
                    let next = if feed.len() > 1 {
                        feed.pop_front().unwrap_or_default()
                    } else {
                        feed.front().cloned().unwrap_or_default()
                    };
                    lines.extend(next);
                }
                Output::Lines(lines) => lines.extend(self.ps_lines.iter().cloned()),
                Output::File(path) => fs::write(path, format!("{}\n", args))?,
                Output::Console => {}
            }
            Ok(())
        }

        fn start_detached(&self, args: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("detached {}", args));
            Ok(())
        }
    }

    /// A [`ManualClock`] that logs its sleeps next to the compose calls.
    struct RecordingClock {
        inner: ManualClock,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Clock for RecordingClock {
        fn now(&self) -> Duration {
            self.inner.now()
        }

        fn sleep(&self, duration: Duration) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("sleep {}s", duration.as_secs()));
            self.inner.sleep(duration);
        }
    }

    fn to_lines(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn config() -> GlobalConfiguration {
        GlobalConfiguration::from_yaml_str(CONFIG, "global-configuration.yaml").unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn options(start: &str, end: &str) -> ValidationOptions {
        ValidationOptions {
            time_window: TimeWindow::new_at(start, end, day(2024, 1, 10)).unwrap(),
            should_build: true,
            sources: SourceSelection::default(),
            timings: ValidationTimings {
                timeout: Duration::from_secs(600),
                poll_interval: Duration::from_secs(120),
                settle_delay: Duration::from_secs(30),
                core_start_delay: Duration::from_secs(180),
            },
        }
    }

    fn project() -> TempDir {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(CONFIG_DIR_NAME);
        fs::create_dir(&config_dir).unwrap();
        fs::write(
            config_dir.join("ids-config-envs"),
            "IDS_SCHEMA=star\nIDS_CFG_DEFAULT_START_DATETIME=2020-01-01T00:00:00.00Z\nIDS_CFG_END_DATETIME= \n",
        )
        .unwrap();
        fs::write(
            config_dir.join("hoover-config-envs"),
            "HOOVER_DATE_FROM=2020-01-01T00:00:00.00Z\nHOOVER_DATE_UNTIL= \n",
        )
        .unwrap();
        fs::write(config_dir.join("notes.txt"), "IDS_CFG_END_DATETIME= \n").unwrap();
        temp
    }

    fn runner<'a>(
        compose: &'a MockCompose,
        config: &'a GlobalConfiguration,
        dir: &Path,
        options: ValidationOptions,
    ) -> ValidationRunner<'a> {
        ValidationRunner::new(compose, config, dir, options)
            .unwrap()
            .with_clock(Box::new(RecordingClock {
                inner: ManualClock::default(),
                calls: Arc::clone(&compose.calls),
            }))
            .with_log_date(day(2024, 1, 10))
    }

    #[test]
    fn test_queue_listing() {
        assert!(all_queues_empty(&to_lines(&[
            "name messages",
            "hl7Queue 0",
            "databaseExtracts 0"
        ])));
        assert!(!all_queues_empty(&to_lines(&[
            "name messages",
            "hl7Queue 0",
            "databaseExtracts 3"
        ])));
        assert!(all_queues_empty(&to_lines(&["", "name\tmessages", ""])));
        assert!(all_queues_empty(&[]));
    }

    #[test]
    fn test_source_resolution_defaults() {
        let config = config();
        let sources = SourceSelection::default().resolve(&config).unwrap();
        assert_eq!(sources, vec![IngestionSource::Hl7Reader, IngestionSource::Hoover]);

        let only_synth = SourceSelection {
            hl7_reader: Some(false),
            hoover: Some(false),
            waveform_synth: Some(true),
        };
        assert_eq!(
            only_synth.resolve(&config).unwrap(),
            vec![IngestionSource::WaveformSynth]
        );
    }

    #[test]
    fn test_requested_but_absent_source_fails_before_any_compose_call() {
        let config =
            GlobalConfiguration::from_yaml_str("EMAP_PROJECT_NAME: e\nrepositories:\n  emap:\n", "g.yaml")
                .unwrap();
        let compose = MockCompose::default();
        let temp = project();
        let mut opts = options("default", "default");
        opts.sources.hoover = Some(true);

        let result = ValidationRunner::new(&compose, &config, temp.path(), opts);

        assert!(matches!(result, Err(Error::ValidationRunner { .. })));
        assert!(compose.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_default_window_only_fills_blank_dates() {
        let config = config();
        let compose = MockCompose::default();
        let temp = project();
        let runner = runner(&compose, &config, temp.path(), options("default", "default"));

        runner.set_time_window_in_envs().unwrap();

        let ids = fs::read_to_string(temp.path().join("config/ids-config-envs")).unwrap();
        assert!(ids.contains("IDS_CFG_DEFAULT_START_DATETIME=2020-01-01T00:00:00.00Z\n"));
        assert!(ids.contains("IDS_CFG_END_DATETIME=2024-01-10T00:00:00.00Z\n"));
        let hoover = fs::read_to_string(temp.path().join("config/hoover-config-envs")).unwrap();
        assert!(hoover.contains("HOOVER_DATE_UNTIL=2024-01-10T00:00:00.00Z\n"));
        // not an env file
        let notes = fs::read_to_string(temp.path().join("config/notes.txt")).unwrap();
        assert_eq!(notes, "IDS_CFG_END_DATETIME= \n");
    }

    #[test]
    fn test_explicit_window_overrides_configured_dates() {
        let config = config();
        let compose = MockCompose::default();
        let temp = project();
        let runner = runner(&compose, &config, temp.path(), options("2023-12-25", "2023-12-31"));

        runner.set_time_window_in_envs().unwrap();

        let ids = fs::read_to_string(temp.path().join("config/ids-config-envs")).unwrap();
        assert!(ids.contains("IDS_CFG_DEFAULT_START_DATETIME=2023-12-25T00:00:00.00Z\n"));
        assert!(ids.contains("IDS_CFG_END_DATETIME=2023-12-31T00:00:00.00Z\n"));
        assert!(ids.starts_with("IDS_SCHEMA=star\n"));
    }

    #[test]
    fn test_drain_succeeds_when_queues_empty_in_time() {
        let config = config();
        // 4 polls * 120s = 480s < 600s
        let compose = MockCompose::with_queue_feed(4);
        let temp = project();
        let mut runner = runner(&compose, &config, temp.path(), options("default", "default"));

        runner.wait_for_queues_to_empty().unwrap();

        assert_eq!(compose.count("exec rabbitmq rabbitmqctl -q list_queues"), 5);
        assert_eq!(compose.count("down"), 0);
        assert_eq!(runner.state(), RunState::WaitingForDrain);
    }

    #[test]
    fn test_drain_times_out_and_stops_once() {
        let config = config();
        // 5 polls * 120s = 600s, not < 600s
        let compose = MockCompose::with_queue_feed(5);
        let temp = project();
        let mut runner = runner(&compose, &config, temp.path(), options("default", "default"));

        let err = runner.wait_for_queues_to_empty().unwrap_err();

        assert!(matches!(err, Error::ValidationRunner { .. }));
        assert!(err.to_string().contains("timed out"));
        assert_eq!(compose.count("down"), 1);
        assert_eq!(compose.count("logs emapstar"), 1);
        assert_eq!(compose.count("logs rabbitmq"), 1);
        assert_eq!(runner.state(), RunState::LoggingAndStopped);
    }

    #[test]
    fn test_drain_property_over_poll_counts() {
        let config = config();
        for nonzero in 0..8usize {
            let compose = MockCompose::with_queue_feed(nonzero);
            let temp = project();
            let mut runner = runner(&compose, &config, temp.path(), options("default", "default"));

            let result = runner.wait_for_queues_to_empty();

            let expect_success = (nonzero as u64) * 120 < 600;
            assert_eq!(result.is_ok(), expect_success, "nonzero polls: {}", nonzero);
            assert_eq!(compose.count("down"), if expect_success { 0 } else { 1 });
        }
    }

    #[test]
    fn test_full_run_sequence_and_restore() {
        let config = config();
        let compose = MockCompose::with_queue_feed(1);
        let temp = project();
        let before = fs::read_to_string(temp.path().join("config/ids-config-envs")).unwrap();
        let mut runner = runner(&compose, &config, temp.path(), options("2023-12-25", "today"));

        runner.run().unwrap();

        let calls = compose.calls.lock().unwrap().clone();
        let expected = vec![
            "down",
            "build",
            "up -d cassandra rabbitmq",
            "ps",
            "run glowroot-central java -jar \"glowroot-central.jar\" setup-admin-user glow root",
            "up -d glowroot-central",
            "ps",
            "sleep 180s",
            "detached up -d emapstar",
            "up --exit-code-from hl7source hl7source",
            "up --exit-code-from hoover hoover",
            "ps",
            "exec rabbitmq rabbitmqctl -q list_queues",
            "sleep 120s",
            "exec rabbitmq rabbitmqctl -q list_queues",
            "sleep 30s",
            "ps",
            "logs emapstar",
            "logs rabbitmq",
            "down",
            "ps",
        ];
        assert_eq!(calls, expected);

        let logs = temp.path().join(LOGS_DIR_NAME);
        assert!(logs.join("rebuild_log_2024-01-10_hl7source.txt").exists());
        assert!(logs.join("rebuild_log_2024-01-10_hoover.txt").exists());
        assert!(logs.join("rebuild_log_2024-01-10_emapstar.txt").exists());

        let after = fs::read_to_string(temp.path().join("config/ids-config-envs")).unwrap();
        assert_eq!(before, after);
        assert_eq!(runner.state(), RunState::Idle);
    }

    #[test]
    fn test_core_delay_elapses_before_sources_start() {
        let config = config();
        let compose = MockCompose::with_queue_feed(0);
        let temp = project();
        let mut runner = runner(&compose, &config, temp.path(), options("default", "default"));

        runner.run().unwrap();

        let calls = compose.calls.lock().unwrap().clone();
        let position = |call: &str| calls.iter().position(|c| c == call).unwrap();
        let core_wait = position("sleep 180s");
        assert!(core_wait < position("detached up -d emapstar"));
        assert!(core_wait < position("up --exit-code-from hl7source hl7source"));
        assert!(core_wait < position("up --exit-code-from hoover hoover"));
        // nothing else has waited yet
        assert!(calls[..core_wait].iter().all(|c| !c.starts_with("sleep")));
    }

    #[test]
    fn test_save_logs_and_stop_tries_every_step() {
        let config = config();
        let compose = MockCompose {
            fail_on: Some("logs emapstar".to_string()),
            ..MockCompose::default()
        };
        let temp = project();
        let mut runner = runner(&compose, &config, temp.path(), options("default", "default"));

        let err = runner.save_logs_and_stop().unwrap_err();

        assert!(matches!(err, Error::DockerRunner { .. }));
        assert_eq!(
            compose.calls.lock().unwrap().clone(),
            vec!["ps", "logs emapstar", "logs rabbitmq", "down", "ps"]
        );
        assert_eq!(runner.state(), RunState::LoggingAndStopped);
    }

    #[test]
    fn test_save_logs_and_stop_returns_first_failure() {
        let config = config();
        let compose = MockCompose {
            fail_on: Some("ps".to_string()),
            ..MockCompose::default()
        };
        let temp = project();
        let mut runner = runner(&compose, &config, temp.path(), options("default", "default"));

        let err = runner.save_logs_and_stop().unwrap_err();

        assert!(err.to_string().contains("error code: 1"));
        assert_eq!(compose.count("down"), 1);
        assert_eq!(compose.count("ps"), 2);
    }

    #[test]
    fn test_timeout_reported_even_when_cleanup_fails() {
        let config = config();
        let compose = MockCompose {
            fail_on: Some("logs emapstar".to_string()),
            ..MockCompose::with_queue_feed(5)
        };
        let temp = project();
        let mut runner = runner(&compose, &config, temp.path(), options("default", "default"));

        let err = runner.wait_for_queues_to_empty().unwrap_err();

        assert!(matches!(err, Error::ValidationRunner { .. }));
        assert!(err.to_string().contains("timed out"));
        assert_eq!(compose.count("logs rabbitmq"), 1);
        assert_eq!(compose.count("down"), 1);
    }

    #[test]
    fn test_glowroot_setup_skipped_when_running() {
        let config = config();
        let mut compose = MockCompose::with_queue_feed(0);
        compose.ps_lines = to_lines(&["emaptest-glowroot-central-1  running"]);
        let temp = project();
        let mut opts = options("default", "default");
        opts.should_build = false;
        let mut runner = runner(&compose, &config, temp.path(), opts);

        runner.run().unwrap();

        let calls = compose.calls.lock().unwrap();
        assert!(!calls.iter().any(|c| c.contains("setup-admin-user")));
        assert!(!calls.iter().any(|c| c == "build"));
    }

    #[test]
    fn test_startup_failure_restores_config_and_stops() {
        let config = config();
        let compose = MockCompose {
            fail_on: Some("up --exit-code-from hoover hoover".to_string()),
            ..MockCompose::with_queue_feed(0)
        };
        let temp = project();
        let before = fs::read_to_string(temp.path().join("config/hoover-config-envs")).unwrap();
        let mut runner = runner(&compose, &config, temp.path(), options("2023-01-01", "today"));

        assert!(runner.run().is_err());

        let after = fs::read_to_string(temp.path().join("config/hoover-config-envs")).unwrap();
        assert_eq!(before, after);
        assert_eq!(compose.count("logs emapstar"), 1);
        assert_eq!(compose.count("exec rabbitmq rabbitmqctl -q list_queues"), 0);
    }

    #[test]
    fn test_temporary_environment_state_restores_on_panic() {
        let temp = project();
        let dir = temp.path().join(CONFIG_DIR_NAME);
        let file = dir.join("ids-config-envs");
        let before = fs::read(&file).unwrap();

        let result = std::panic::catch_unwind(|| {
            let _state = TemporaryEnvironmentState::capture(&dir).unwrap();
            fs::write(&file, "CLOBBERED=1\n").unwrap();
            panic!("boom");
        });

        assert!(result.is_err());
        assert_eq!(fs::read(&file).unwrap(), before);
    }

    #[test]
    fn test_temporary_environment_state_restores_every_file() {
        let temp = project();
        let dir = temp.path().join(CONFIG_DIR_NAME);
        let originals: Vec<(PathBuf, Vec<u8>)> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .map(|p| {
                let content = fs::read(&p).unwrap();
                (p, content)
            })
            .collect();

        {
            let state = TemporaryEnvironmentState::capture(&dir).unwrap();
            assert_eq!(state.files().len(), 3);
            for (path, _) in &originals {
                fs::write(path, "changed").unwrap();
            }
        }

        for (path, content) in originals {
            assert_eq!(fs::read(&path).unwrap(), content);
        }
    }
}
