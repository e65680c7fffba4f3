//! # Global Configuration
//!
//! Everything needed to set up and run EMAP comes from one YAML document,
//! conventionally `global-configuration.yaml`:
//!
//! ```yaml
//! EMAP_PROJECT_NAME: emap
//! git_org_url: https://github.com/inform-health-informatics
//! repositories:
//!   emap:
//!     branch: develop
//!   hoover:
//! global:
//!   RABBITMQ_PORT: 5672
//! ids:
//!   IDS_SCHEMA: star
//! dates:
//!   start: 2020-06-04
//!   end: null
//! ```
//!
//! [`GlobalConfiguration`] is built once per command and never changes
//! afterwards; there is no way to set a key on it. The only values that are
//! not read verbatim are the date stamps derived from the `dates` section,
//! which are injected into `ids` and `global` while the object is built.
//!
//! Environment templates are filled with [`GlobalConfiguration::get_first`],
//! which looks a key up in a section guessed from the template name, then in
//! each known section in a fixed order, then at the top level.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use log::{info, warn};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::env_file::EnvironmentFile;
use crate::error::{Error, Result};
use crate::repository::{GitOperations, Repositories, Repository};
use crate::time_window::java_timestamp;

/// Known sections, in the order [`GlobalConfiguration::get_first`] searches them.
pub const POSSIBLE_SECTIONS: [&str; 9] = [
    "rabbitmq", "ids", "uds", "omop", "dates", "global", "glowroot", "common", "features",
];

/// Placeholder for a missing date. A single space keeps `KEY= ` lines from
/// collapsing into an empty value.
pub const EMPTY_DATE: &str = " ";

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_FILENAME: &str = "global-configuration.yaml";

/// One entry under `repositories`.
#[derive(Debug, Default, Deserialize)]
struct RepositoryEntry {
    repo_name: Option<String>,
    branch: Option<String>,
}

/// Immutable view of the global configuration document.
#[derive(Debug, Clone)]
pub struct GlobalConfiguration {
    root: Mapping,
    filename: PathBuf,
}

impl GlobalConfiguration {
    /// Load the configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::Configuration {
                message: format!("Configuration file {} not found", path.display()),
            });
        }
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content, path)
    }

    /// Parse a configuration from YAML text. `filename` is only used in messages.
    pub fn from_yaml_str<P: AsRef<Path>>(content: &str, filename: P) -> Result<Self> {
        let filename = filename.as_ref().to_path_buf();
        let root = match serde_yaml::from_str::<Value>(content)? {
            Value::Mapping(mapping) => mapping,
            Value::Null => Mapping::new(),
            _ => {
                return Err(Error::Configuration {
                    message: format!(
                        "{} must contain a mapping at the top level",
                        filename.display()
                    ),
                })
            }
        };

        let mut root = root;
        update_dates(&mut root, &filename)?;

        Ok(Self { root, filename })
    }

    /// File the configuration was read from.
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// Whether a top-level key exists.
    pub fn contains(&self, key: &str) -> bool {
        self.root.contains_key(key)
    }

    /// A top-level section, if present and a mapping.
    pub fn section(&self, name: &str) -> Option<&Mapping> {
        self.root.get(name).and_then(Value::as_mapping)
    }

    /// Descend through one to three keys, e.g. `["repositories", "emap", "branch"]`.
    pub fn get(&self, keys: &[&str]) -> Result<&Value> {
        if keys.is_empty() || keys.len() > 3 {
            return Err(Error::Configuration {
                message: format!("Expecting between 1 and 3 keys. Had: {:?}", keys),
            });
        }

        let mut current = self.root.get(keys[0]);
        for key in &keys[1..] {
            current = current.and_then(|value| value.get(*key));
        }

        current.ok_or_else(|| self.key_error(&keys.join(".")))
    }

    /// [`get`](Self::get) rendered as an environment value.
    pub fn get_string(&self, keys: &[&str]) -> Result<String> {
        self.get(keys).map(render_value)
    }

    /// Find `key` in `section`, then in the known sections in order, then at
    /// the top level.
    pub fn get_first(&self, key: &str, section: &str) -> Result<String> {
        if let Some(value) = self.section(section).and_then(|s| s.get(key)) {
            return Ok(render_value(value));
        }

        for name in POSSIBLE_SECTIONS {
            if let Some(value) = self.section(name).and_then(|s| s.get(key)) {
                return Ok(render_value(value));
            }
        }

        self.root
            .get(key)
            .map(render_value)
            .ok_or_else(|| self.key_error(key))
    }

    /// Whether `features.<name>` is set to true.
    pub fn feature_enabled(&self, name: &str) -> bool {
        self.section("features")
            .and_then(|features| features.get(name))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Whether `repositories` declares `name`.
    pub fn has_repository(&self, name: &str) -> bool {
        self.section("repositories")
            .is_some_and(|repos| repos.contains_key(name))
    }

    /// Project name passed to `docker compose -p`.
    pub fn project_name(&self) -> Result<String> {
        self.get_string(&["EMAP_PROJECT_NAME"])
    }

    /// Build a [`Repository`] for every entry under `repositories`.
    ///
    /// An entry without `repo_name` uses its key as the name. `branch_name`
    /// overrides every per-repository branch; otherwise entries without a
    /// branch use `default_branch_name`, which is also the fallback when a
    /// branch does not exist on the remote.
    pub fn extract_repositories(
        &self,
        main_dir: &Path,
        git_ops: Box<dyn GitOperations>,
        branch_name: Option<&str>,
        default_branch_name: &str,
    ) -> Result<Repositories> {
        let git_org_url = self.get_string(&["git_org_url"])?;
        let entries = self.section("repositories").ok_or_else(|| self.key_error("repositories"))?;

        let mut repos = Vec::with_capacity(entries.len());
        for (key, data) in entries {
            let key = key.as_str().ok_or_else(|| Error::Configuration {
                message: format!("Repository names must be strings. Had: {:?}", key),
            })?;
            let entry: RepositoryEntry = match data {
                Value::Null => RepositoryEntry::default(),
                other => serde_yaml::from_value(other.clone())?,
            };

            let branch = branch_name
                .map(str::to_string)
                .or(entry.branch)
                .unwrap_or_else(|| default_branch_name.to_string());

            repos.push(Repository::new(
                entry.repo_name.as_deref().unwrap_or(key),
                &git_org_url,
                main_dir,
                &branch,
                default_branch_name,
                git_ops.as_ref(),
            )?);
        }

        Ok(Repositories::new(repos, main_dir, git_ops))
    }

    /// Fill every environment template of `repositories` from this
    /// configuration and write the results into the config directory.
    ///
    /// Lines the configuration has no value for are kept as in the template
    /// and reported as warnings.
    pub fn create_or_update_config_dir_from(&self, repositories: &Repositories) -> Result<()> {
        let config_dir = repositories.config_dir_path();

        if config_dir.exists() {
            info!("Updating config directory");
        } else {
            info!("Creating {}", config_dir.display());
            fs::create_dir_all(&config_dir)?;
        }

        for mut env_file in repositories.environment_files()? {
            self.substitute_vars(&mut env_file);
            env_file.write(Some(&config_dir))?;

            for line in env_file.unchanged_lines() {
                warn!(
                    "{:30} in {:11} was not updated from {}",
                    truncate(line.trim(), 29),
                    truncate(&env_file.section(), 10),
                    self.filename.display()
                );
            }
        }

        Ok(())
    }

    /// Substitute every key of `env_file` that can be found with
    /// [`get_first`](Self::get_first), using the file's section guess.
    pub fn substitute_vars(&self, env_file: &mut EnvironmentFile) {
        let section = env_file.section();
        env_file.substitute_with(|key| self.get_first(key, &section).ok());
    }

    /// Login details of the RabbitMQ admin console, or `Unknown`.
    pub fn rabbitmq_config_string(&self) -> String {
        // the admin console is served from the same domain as glowroot
        self.login_string([
            &["glowroot", "DOMAIN"],
            &["global", "RABBITMQ_ADMIN_PORT"],
            &["rabbitmq", "RABBITMQ_DEFAULT_USER"],
            &["rabbitmq", "RABBITMQ_DEFAULT_PASS"],
        ])
    }

    /// Login details of the glowroot admin console, or `Unknown`.
    pub fn glowroot_config_string(&self) -> String {
        self.login_string([
            &["glowroot", "DOMAIN"],
            &["glowroot", "GLOWROOT_ADMIN_PORT"],
            &["glowroot", "GLOWROOT_USERNAME"],
            &["glowroot", "GLOWROOT_PASSWORD"],
        ])
    }

    fn login_string(&self, keys: [&[&str]; 4]) -> String {
        let values: Result<Vec<String>> = keys.iter().map(|k| self.get_string(k)).collect();
        match values.as_deref() {
            Ok([domain, port, username, password]) => format!(
                "Domain:    http://{domain}:{port}\nUsername:  {username}\nPassword:  {password}"
            ),
            _ => "Unknown".to_string(),
        }
    }

    fn key_error(&self, key: &str) -> Error {
        Error::ConfigKey {
            key: key.to_string(),
            filename: self.filename.display().to_string(),
        }
    }
}

/// Render a YAML value the way it should appear after `KEY=`.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Sequence(items) => {
            let items: Vec<String> = items.iter().map(render_value).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Mapping(mapping) => {
            let entries: Vec<String> = mapping
                .iter()
                .map(|(k, v)| format!("{}: {}", render_value(k), render_value(v)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
        Value::Tagged(tagged) => render_value(&tagged.value),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Derive the start/end stamps from `dates` and inject them into the keys
/// the services read them from.
fn update_dates(root: &mut Mapping, filename: &Path) -> Result<()> {
    if !root.contains_key("ids") {
        warn!("Failed to find ids in {}", filename.display());
        return Ok(());
    }

    let (start, end) = match root.get("dates") {
        Some(dates) => (
            date_or_placeholder(dates.get("start"))?,
            date_or_placeholder(dates.get("end"))?,
        ),
        None => {
            warn!("Failed to find any dates in {}", filename.display());
            (EMPTY_DATE.to_string(), EMPTY_DATE.to_string())
        }
    };

    insert_into_section(root, "ids", "IDS_CFG_DEFAULT_START_DATETIME", &start)?;
    insert_into_section(root, "ids", "IDS_CFG_END_DATETIME", &end)?;
    insert_into_section(root, "global", "HOOVER_DATE_FROM", &start)?;
    insert_into_section(root, "global", "HOOVER_DATE_UNTIL", &end)?;

    Ok(())
}

fn insert_into_section(root: &mut Mapping, section: &str, key: &str, value: &str) -> Result<()> {
    let entry = root
        .entry(Value::from(section))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if entry.is_null() {
        *entry = Value::Mapping(Mapping::new());
    }
    let mapping = entry.as_mapping_mut().ok_or_else(|| Error::Configuration {
        message: format!("Section {} must be a mapping", section),
    })?;
    mapping.insert(Value::from(key), Value::from(value));
    Ok(())
}

fn date_or_placeholder(value: Option<&Value>) -> Result<String> {
    match value {
        None | Some(Value::Null) => Ok(EMPTY_DATE.to_string()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(EMPTY_DATE.to_string()),
        Some(Value::String(s)) => parse_datetime(s.trim()).map(java_timestamp),
        Some(other) => Err(Error::Configuration {
            message: format!("Cannot interpret {:?} as a date", other),
        }),
    }
}

fn parse_datetime(s: &str) -> Result<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s.trim_end_matches('Z'), format) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|date| date.and_time(NaiveTime::MIN))
        .map_err(|e| Error::Configuration {
            message: format!("Cannot parse date '{}': {}", s, e),
        })
}
