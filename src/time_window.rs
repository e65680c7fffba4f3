//! # Time Windows
//!
//! A validation run replays messages between a start and an end date. Each
//! end is given on the command line as an explicit `YYYY-MM-DD` date,
//! `N days ago`, or `today`. A value with a `_default` suffix, or the bare
//! word `default`, marks the date as a default: it is used only where the
//! configuration has no date of its own.

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};

use crate::error::{Error, Result};

/// Suffix the CLI appends to its default values.
pub const DEFAULT_SUFFIX: &str = "_default";

/// Default start of a validation window.
pub const DEFAULT_START: &str = "7 days ago_default";

/// Default end of a validation window.
pub const DEFAULT_END: &str = "today_default";

/// Format a timestamp the way the Java services parse it, e.g.
/// `2020-06-04T00:00:00.00Z`. Fractions of a second are truncated to
/// centiseconds.
pub fn java_timestamp(datetime: NaiveDateTime) -> String {
    let centis = (datetime.nanosecond() / 10_000_000).min(99);
    format!("{}.{:02}Z", datetime.format("%Y-%m-%dT%H:%M:%S"), centis)
}

/// How a date was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSpec {
    Explicit(NaiveDate),
    DaysAgo(u32),
    Today,
}

impl DateSpec {
    /// Parse `YYYY-MM-DD`, `N days ago`, `N day ago` or `today`.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();

        if value.eq_ignore_ascii_case("today") {
            return Ok(DateSpec::Today);
        }

        let words: Vec<&str> = value.split_whitespace().collect();
        if let [n, unit, "ago"] = words.as_slice() {
            if matches!(*unit, "day" | "days") {
                let n = n.parse::<u32>().map_err(|_| invalid_date(value))?;
                return Ok(DateSpec::DaysAgo(n));
            }
        }

        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(DateSpec::Explicit)
            .map_err(|_| invalid_date(value))
    }

    /// Calendar date relative to `today`.
    pub fn resolve(&self, today: NaiveDate) -> NaiveDate {
        match self {
            DateSpec::Explicit(date) => *date,
            DateSpec::Today => today,
            DateSpec::DaysAgo(n) => today - TimeDelta::days(i64::from(*n)),
        }
    }
}

fn invalid_date(value: &str) -> Error {
    Error::Configuration {
        message: format!(
            "Cannot parse '{}' as a date. Expecting YYYY-MM-DD, 'N days ago' or 'today'",
            value
        ),
    }
}

/// One end of a [`TimeWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDate {
    date: NaiveDate,
    is_default: bool,
}

impl WindowDate {
    /// Parse a CLI value. `fallback` is used for the bare word `default`.
    pub fn parse(value: &str, fallback: DateSpec, today: NaiveDate) -> Result<Self> {
        let value = value.trim();

        if value.eq_ignore_ascii_case("default") {
            return Ok(Self {
                date: fallback.resolve(today),
                is_default: true,
            });
        }

        let (spec, is_default) = match value.strip_suffix(DEFAULT_SUFFIX) {
            Some(stripped) => (stripped, true),
            None => (value, false),
        };

        Ok(Self {
            date: DateSpec::parse(spec)?.resolve(today),
            is_default,
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Whether the configured value should win over this date.
    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// Midnight of this date as a Java timestamp.
    pub fn stamp(&self) -> String {
        java_timestamp(self.date.and_time(NaiveTime::MIN))
    }
}

/// Start and end dates of a validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: WindowDate,
    pub end: WindowDate,
}

impl TimeWindow {
    /// Build a window from CLI strings relative to the local date.
    pub fn new(start: &str, end: &str) -> Result<Self> {
        Self::new_at(start, end, Local::now().date_naive())
    }

    /// Build a window from CLI strings relative to `today`.
    pub fn new_at(start: &str, end: &str, today: NaiveDate) -> Result<Self> {
        let window = Self {
            start: WindowDate::parse(start, DateSpec::DaysAgo(7), today)?,
            end: WindowDate::parse(end, DateSpec::Today, today)?,
        };
        if window.end.date < window.start.date {
            log::warn!(
                "Time window ends ({}) before it starts ({})",
                window.end.date,
                window.start.date
            );
        }
        Ok(window)
    }

    pub fn start_stamp(&self) -> String {
        self.start.stamp()
    }

    pub fn end_stamp(&self) -> String {
        self.end.stamp()
    }
}
