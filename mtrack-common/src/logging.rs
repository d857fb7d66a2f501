//! Tracing subscriber setup shared by the CLI and long test runs.

use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{filter}': {detail}")]
    Filter { filter: String, detail: String },

    #[error("failed to create log directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Where and how log lines are written.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
    pub stderr: bool,
    /// Directory for a daily-rotated log file.
    pub file_dir: Option<PathBuf>,
}

impl LogConfig {
    /// Start from `MTRACK_LOG` / `RUST_LOG`, falling back to `default_level`.
    pub fn from_env(default_level: &str) -> Self {
        let level = std::env::var("MTRACK_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| default_level.to_string());
        let json = matches!(
            std::env::var("MTRACK_LOG_FORMAT").as_deref(),
            Ok("json" | "JSON")
        );
        Self {
            level,
            json,
            stderr: false,
            file_dir: None,
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }

    #[must_use]
    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    #[must_use]
    pub fn with_file(mut self, dir: impl Into<PathBuf>) -> Self {
        self.file_dir = Some(dir.into());
        self
    }

    /// Filter directive. A bare level is scoped to the mtrack crates so
    /// dependency chatter stays at `warn`.
    fn filter(&self) -> Result<EnvFilter, LoggingError> {
        let directive = if self.level.contains('=') || self.level.contains(',') {
            self.level.clone()
        } else {
            format!("warn,mtrack={lvl},mtrack_common={lvl}", lvl = self.level)
        };
        EnvFilter::try_new(&directive).map_err(|e| LoggingError::Filter {
            filter: directive,
            detail: e.to_string(),
        })
    }
}

/// Keeps non-blocking writers flushing until dropped.
#[must_use = "dropping the guards stops log flushing"]
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

/// Install the global subscriber described by `config`.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards, LoggingError> {
    let filter = config.filter()?;
    let mut guards = Vec::new();

    let console = if config.stderr {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
        guards.push(guard);
        Some(writer)
    } else {
        None
    };

    let file = match &config.file_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|source| LoggingError::Directory {
                path: dir.clone(),
                source,
            })?;
            let appender = tracing_appender::rolling::daily(dir, "mtrack.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);
            Some(writer)
        }
        None => None,
    };

    let console_json = console
        .clone()
        .filter(|_| config.json)
        .map(|w| tracing_subscriber::fmt::layer().json().with_writer(w));
    let console_text = console
        .filter(|_| !config.json)
        .map(|w| tracing_subscriber::fmt::layer().compact().with_target(false).with_writer(w));
    let file_layer = file.map(|w| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(w)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_json)
        .with(console_text)
        .with(file_layer)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    Ok(LoggingGuards { _guards: guards })
}
