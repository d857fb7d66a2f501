//! Configuration for the harness.
//!
//! Values come from (highest priority first) `MTRACK_*` environment
//! variables, a TOML file, and built-in defaults.
//! - Environment parsing with source tracking
//! - TOML file loading with `~` expansion
//! - Validation that reports warnings instead of failing

pub mod env;
pub mod file;
pub mod source;

pub use env::{EnvError, EnvParser};
pub use file::{
    ConvergenceConfig, EndpointConfig, GeneralConfig, HarnessConfig, LoadedFrom, PathsConfig,
    TimeoutsConfig,
};
pub use source::{ConfigSource, Sourced};

use crate::errors::ErrorCode;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while locating, reading or parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },

    #[error("invalid environment override(s): {}", format_env_errors(.0))]
    Env(Vec<EnvError>),

    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("endpoint '{0}' is not defined in the configuration")]
    UnknownEndpoint(String),
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::ConfigNotFound,
            Self::Read { .. } => ErrorCode::ConfigReadError,
            Self::Parse { .. } => ErrorCode::ConfigParseError,
            Self::Env(_) => ErrorCode::ConfigEnvError,
            Self::InvalidValue { .. } => ErrorCode::ConfigValidationError,
            Self::UnknownEndpoint(_) => ErrorCode::ConfigUnknownEndpoint,
        }
    }
}

fn format_env_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Warning severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A problem found by [`HarnessConfig::validate`].
#[derive(Debug, Clone, Serialize)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: Severity,
}

impl ConfigWarning {
    pub fn new(field: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity,
        }
    }
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
