//! `MTRACK_*` environment overrides.
//!
//! [`EnvParser`] collects every bad variable instead of stopping at the
//! first one, so a misconfigured CI job reports all of them at once. Each
//! value comes back as a [`Sourced`] so `mtrack config show` can say where
//! it came from.

use super::source::Sourced;
use std::env;
use std::ops::RangeInclusive;
use thiserror::Error;

const PREFIX: &str = "MTRACK_";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// A single rejected environment variable.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("{var}='{value}' is not a whole number of seconds")]
    NotSeconds { var: String, value: String },

    #[error("{var}={value} is outside {min}..={max} seconds")]
    OutOfRange {
        var: String,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("{var}='{value}' is not a log level (expected one of {})", LOG_LEVELS.join(", "))]
    InvalidLogLevel { var: String, value: String },
}

/// Reads prefixed variables and remembers what was wrong with them.
#[derive(Debug, Default)]
pub struct EnvParser {
    errors: Vec<EnvError>,
}

impl EnvParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// Full variable name and its value, when set.
    fn lookup(name: &str) -> (String, Option<String>) {
        let var = format!("{PREFIX}{name}");
        let value = env::var(&var).ok();
        (var, value)
    }

    /// Free-form text such as a binary name.
    pub fn string(&mut self, name: &str, current: &str) -> Sourced<String> {
        match Self::lookup(name) {
            (var, Some(value)) => Sourced::from_env(value, var),
            (_, None) => Sourced::default_value(current.to_string()),
        }
    }

    /// A duration in whole seconds within `range`.
    ///
    /// On a bad value the error is recorded and `current` is kept.
    pub fn seconds(&mut self, name: &str, current: u64, range: RangeInclusive<u64>) -> Sourced<u64> {
        let (var, Some(raw)) = Self::lookup(name) else {
            return Sourced::default_value(current);
        };
        match raw.trim().parse::<u64>() {
            Ok(secs) if range.contains(&secs) => Sourced::from_env(secs, var),
            Ok(secs) => {
                self.errors.push(EnvError::OutOfRange {
                    var,
                    value: secs,
                    min: *range.start(),
                    max: *range.end(),
                });
                Sourced::default_value(current)
            }
            Err(_) => {
                self.errors.push(EnvError::NotSeconds { var, value: raw });
                Sourced::default_value(current)
            }
        }
    }

    /// A tracing level name, lowercased.
    pub fn log_level(&mut self, name: &str, current: &str) -> Sourced<String> {
        let (var, Some(raw)) = Self::lookup(name) else {
            return Sourced::default_value(current.to_string());
        };
        let level = raw.to_lowercase();
        if LOG_LEVELS.contains(&level.as_str()) {
            Sourced::from_env(level, var)
        } else {
            self.errors.push(EnvError::InvalidLogLevel { var, value: raw });
            Sourced::default_value(current.to_string())
        }
    }

    /// Set and non-empty, or nothing. An empty variable counts as unset.
    pub fn non_empty(&mut self, name: &str) -> Option<Sourced<String>> {
        match Self::lookup(name) {
            (var, Some(value)) if !value.is_empty() => Some(Sourced::from_env(value, var)),
            _ => None,
        }
    }
}
