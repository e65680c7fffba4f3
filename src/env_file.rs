//! # Environment Files
//!
//! An environment file is a list of `KEY=VALUE` lines read by docker compose
//! through `env_file:`. Each repository ships templates named
//! `<prefix>-envs.EXAMPLE`; materialising the config directory copies those
//! templates with the marker stripped and the values filled in from the
//! global configuration.
//!
//! Lines are kept verbatim, including their terminators, and tagged with a
//! [`LineKind`] so that after substitution we can report which lines the
//! configuration had nothing for. Substitution only ever rewrites the value
//! part of a line: the number of lines and every key stay the same.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::warn;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Suffix marking a template that must not be used directly.
pub const TEMPLATE_MARKER: &str = ".EXAMPLE";

/// Suffix shared by every materialised environment file.
pub const ENV_FILE_SUFFIX: &str = "-envs";

const SECTION_MARKER: &str = "-config";

/// Whether `file_name` names an environment template, e.g. `ids-config-envs.EXAMPLE`.
pub fn is_template_name(file_name: &str) -> bool {
    file_name.ends_with(&format!("{ENV_FILE_SUFFIX}{TEMPLATE_MARKER}"))
}

/// Whether `file_name` names a materialised environment file in the config directory.
pub fn is_env_file_name(file_name: &str) -> bool {
    !file_name.starts_with('.') && file_name.ends_with(ENV_FILE_SUFFIX)
}

/// Configuration section an environment file most likely takes its values from.
///
/// The guess is the part of the file name before `-config`, so
/// `rabbitmq-config-envs` maps to `rabbitmq`. Names without the marker fall
/// back to the name minus `-envs` and any template marker.
pub fn section_name(file_name: &str) -> &str {
    let name = file_name.strip_suffix(TEMPLATE_MARKER).unwrap_or(file_name);
    match name.find(SECTION_MARKER) {
        Some(idx) => &name[..idx],
        None => name.strip_suffix(ENV_FILE_SUFFIX).unwrap_or(name),
    }
}

/// How a line has been treated so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Not yet touched by substitution.
    Original,
    /// Whitespace only. Never substituted.
    Blank,
    /// Starts with optional whitespace then `#`. Never substituted.
    Comment,
    /// The value was replaced.
    Rewritten,
}

/// A single line of an environment file, terminator included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    text: String,
    kind: LineKind,
}

impl Line {
    fn classify(text: &str) -> Self {
        let trimmed = text.trim_start();
        let kind = if trimmed.is_empty() {
            LineKind::Blank
        } else if trimmed.starts_with('#') {
            LineKind::Comment
        } else {
            LineKind::Original
        };
        Self {
            text: text.to_string(),
            kind,
        }
    }

    /// The raw line, terminator included.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> LineKind {
        self.kind
    }

    /// Key of a `KEY=VALUE` line, or `None` for comments, blanks and lines
    /// without `=`.
    pub fn key(&self) -> Option<&str> {
        match self.kind {
            LineKind::Blank | LineKind::Comment => None,
            _ => self.text.split_once('=').map(|(key, _)| key),
        }
    }

    fn terminator(&self) -> &str {
        if self.text.ends_with("\r\n") {
            "\r\n"
        } else {
            "\n"
        }
    }

    /// Replace the value, keeping the key and terminator. A value that
    /// would split the line is refused and the line stays as it was.
    fn set_value(&mut self, value: &str) -> bool {
        let Some(key) = self.key() else {
            return false;
        };
        let value = value.trim_end_matches(['\r', '\n']);
        if value.contains(['\r', '\n']) {
            warn!("Not setting {} to a value spanning several lines", key);
            return false;
        }
        self.text = format!("{key}={value}{}", self.terminator());
        self.kind = LineKind::Rewritten;
        true
    }
}

/// An environment file held in memory as tagged lines.
#[derive(Debug, Clone)]
pub struct EnvironmentFile {
    path: PathBuf,
    lines: Vec<Line>,
}

impl EnvironmentFile {
    /// Read an existing environment file, e.g. one in the config directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        Ok(Self::from_content(path.to_path_buf(), &content))
    }

    /// Read a `*.EXAMPLE` template.
    ///
    /// The returned file's path is the template path with the marker
    /// stripped, so writing it without a directory produces the real file
    /// next to the template.
    pub fn from_example_file<P: AsRef<Path>>(example_path: P) -> Result<Self> {
        let example_path = example_path.as_ref();
        let stripped = example_path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_suffix(TEMPLATE_MARKER))
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::Configuration {
                message: format!(
                    "Cannot create an environment file. {} did not have a {} extension",
                    example_path.display(),
                    TEMPLATE_MARKER
                ),
            })?;

        let content = fs::read_to_string(example_path)?;
        Ok(Self::from_content(example_path.with_file_name(stripped), &content))
    }

    /// Build a file from in-memory content. Nothing is read from `path`.
    pub fn from_content(path: PathBuf, content: &str) -> Self {
        let lines = content.split_inclusive('\n').map(Line::classify).collect();
        Self { path, lines }
    }

    /// Where the file will be written when no directory is given.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name of the materialised file, e.g. `ids-config-envs`.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Section this file most likely takes its values from. See [`section_name`].
    pub fn section(&self) -> String {
        section_name(&self.file_name()).to_string()
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Rewrite every `KEY=VALUE` line for which `lookup` returns a value.
    ///
    /// Comment and blank lines are never passed to `lookup`.
    pub fn substitute_with<F>(&mut self, mut lookup: F)
    where
        F: FnMut(&str) -> Option<String>,
    {
        for line in self.lines.iter_mut() {
            let Some(key) = line.key() else {
                continue;
            };
            if let Some(value) = lookup(key) {
                line.set_value(&value);
            }
        }
    }

    /// Set the value of every line whose key is exactly `key`.
    pub fn replace_value_of(&mut self, key: &str, value: &str) {
        for line in self.lines.iter_mut() {
            if line.key() == Some(key) {
                line.set_value(value);
            }
        }
    }

    /// Lines that are neither comments, blank, nor rewritten.
    pub fn unchanged_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|line| line.kind == LineKind::Original)
            .map(|line| line.text.as_str())
            .collect()
    }

    /// Parse all non-comment lines into a key to value map.
    ///
    /// Values are everything after the first `=`, trimmed. Lines without `=`
    /// are logged and skipped.
    pub fn environment_variables(&self) -> BTreeMap<String, String> {
        let mut variables = BTreeMap::new();

        for line in &self.lines {
            if matches!(line.kind, LineKind::Blank | LineKind::Comment) {
                continue;
            }
            match line.text.split_once('=') {
                Some((key, value)) => {
                    variables.insert(key.to_string(), value.trim().to_string());
                }
                None => warn!(
                    "{} was not a valid env variable pair in: {}",
                    line.text.trim_end(),
                    self.path.display()
                ),
            }
        }

        variables
    }

    /// Serialise the file.
    ///
    /// With a `directory` the file is written there under its own file name
    /// and that becomes its new path. The content goes to a temporary file in
    /// the same directory first and is renamed over the target, so a failed
    /// write never leaves a truncated file behind.
    pub fn write(&mut self, directory: Option<&Path>) -> Result<PathBuf> {
        if let Some(directory) = directory {
            self.path = directory.join(self.file_name());
        }

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut temp = NamedTempFile::new_in(&parent)?;
        for line in &self.lines {
            temp.write_all(line.text.as_bytes())?;
        }
        temp.flush()?;
        temp.persist(&self.path).map_err(|e| e.error)?;

        Ok(self.path.clone())
    }
}
