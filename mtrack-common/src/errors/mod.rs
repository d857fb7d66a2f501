//! Error types and the error catalog for mtrack.
//!
//! # Error Code Ranges
//!
//! | Range      | Category  | Description                                  |
//! |------------|-----------|----------------------------------------------|
//! | E001-E099  | Config    | Configuration and environment errors         |
//! | E100-E199  | Transport | SSH round-trip failures                      |
//! | E200-E299  | Model     | Model command rejections and bad ledger data |
//! | E300-E399  | Plan      | Plan polling, stopping and waiting           |
//! | E400-E499  | Cleanup   | End-of-test reversal failures                |
//! | E500-E599  | Internal  | Internal/unexpected errors                   |

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};

use crate::cleanup::CleanupReport;
use crate::config::ConfigError;
use crate::plan::PlanState;
use crate::types::EndpointId;
use std::time::Duration;
use thiserror::Error;

/// The remote round-trip itself could not be completed.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("endpoint '{0}' is not configured")]
    UnknownEndpoint(EndpointId),

    #[error("failed to start ssh for {endpoint}: {source}")]
    Spawn {
        endpoint: EndpointId,
        #[source]
        source: std::io::Error,
    },

    #[error("command on {endpoint} timed out after {timeout:?}")]
    Timeout {
        endpoint: EndpointId,
        timeout: Duration,
    },

    #[error("ssh connection to {endpoint} failed: {detail}")]
    Connection { endpoint: EndpointId, detail: String },
}

impl TransportError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownEndpoint(_) => ErrorCode::ConfigUnknownEndpoint,
            Self::Spawn { .. } => ErrorCode::SshSpawnFailed,
            Self::Timeout { .. } => ErrorCode::SshTimeout,
            Self::Connection { .. } => ErrorCode::SshConnectionFailed,
        }
    }
}

/// Top-level error for tracked operations and cleanup.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("command failed on {endpoint} (exit {exit_code}): {command}: {stderr}")]
    Command {
        endpoint: EndpointId,
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("ordering violation on {endpoint} for '{command}': {detail}")]
    OrderingViolation {
        endpoint: EndpointId,
        command: String,
        detail: String,
    },

    #[error("plan on {endpoint} did not reach {target} (last observed {last})")]
    Timeout {
        endpoint: EndpointId,
        target: PlanState,
        last: PlanState,
    },

    #[error("plan on {endpoint} reached {observed} while waiting for {target}")]
    UnexpectedPlanState {
        endpoint: EndpointId,
        target: PlanState,
        observed: PlanState,
    },

    #[error("cleanup finished with {} failure(s)", report.failures.len())]
    AggregateCleanupFailure { report: Box<CleanupReport> },

    #[error("invalid ledger entry: {0}")]
    InvalidEntry(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TrackerError {
    /// Catalog code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Transport(err) => err.code(),
            Self::Command { .. } => ErrorCode::ModelCommandFailed,
            Self::OrderingViolation { .. } => ErrorCode::ModelOrderingViolation,
            Self::Timeout { .. } => ErrorCode::PlanWaitTimeout,
            Self::UnexpectedPlanState { .. } => ErrorCode::PlanUnexpectedState,
            Self::AggregateCleanupFailure { .. } => ErrorCode::CleanupAggregateFailure,
            Self::InvalidEntry(_) => ErrorCode::ModelInvalidEntry,
            Self::Config(err) => err.code(),
        }
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;
