//! Error catalog for mtrack.
//!
//! Every error the harness can surface maps to a stable code in the
//! `MTR-Exxx` format together with a category and remediation hints, so a
//! failed cleanup report can be triaged without reading the source.
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

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering all mtrack error scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Config Errors (E001-E099)
    // =========================================================================
    /// Configuration file not found
    ConfigNotFound,
    /// Configuration file could not be read
    ConfigReadError,
    /// Configuration file contains invalid TOML syntax
    ConfigParseError,
    /// Configuration contains invalid values
    ConfigValidationError,
    /// Environment variable has invalid value
    ConfigEnvError,
    /// Endpoint referenced by a command is not configured
    ConfigUnknownEndpoint,

    // =========================================================================
    // Transport Errors (E100-E199)
    // =========================================================================
    /// SSH connection failed
    SshConnectionFailed,
    /// SSH command execution timed out
    SshTimeout,
    /// Local ssh process could not be started
    SshSpawnFailed,

    // =========================================================================
    // Model Errors (E200-E299)
    // =========================================================================
    /// Model command returned a non-zero exit code
    ModelCommandFailed,
    /// Model rejected a change because of an unresolved dependency
    ModelOrderingViolation,
    /// Ledger entry could not be recorded
    ModelInvalidEntry,
    /// Model output could not be parsed
    ModelUnparsableOutput,

    // =========================================================================
    // Plan Errors (E300-E399)
    // =========================================================================
    /// Plan did not reach the awaited state in time
    PlanWaitTimeout,
    /// Plan reached a terminal state other than the awaited one
    PlanUnexpectedState,
    /// Plan status output could not be mapped to a state
    PlanStatusUnreadable,
    /// Plan could not be stopped
    PlanStopFailed,
    /// Create/run/remove plan cycle failed
    PlanCycleFailed,

    // =========================================================================
    // Cleanup Errors (E400-E499)
    // =========================================================================
    /// Cleanup finished with one or more recorded failures
    CleanupAggregateFailure,
    /// A service stopped by the test could not be restarted
    CleanupServiceRestartFailed,
    /// Backed-up properties could not be restored
    CleanupPropertyRestoreFailed,
    /// A created model item could not be removed
    CleanupRemovalFailed,
    /// A tracked user or loose file could not be deleted
    CleanupSideEffectFailed,
    /// A relocated file could not be moved back
    CleanupFileRestoreFailed,
    /// A snapshot could not be removed
    CleanupSnapshotFailed,
    /// A path that must not survive cleanup still exists
    CleanupLeftoverArtifact,
    /// A tracked package could not be uninstalled
    CleanupPackageFailed,

    // =========================================================================
    // Internal Errors (E500-E599)
    // =========================================================================
    /// Logging subsystem could not be initialised
    InternalLoggingError,
    /// Serialization failed
    InternalSerdeError,
}

impl ErrorCode {
    /// Returns the numeric portion of the error code.
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            // Config (001-099)
            Self::ConfigNotFound => 1,
            Self::ConfigReadError => 2,
            Self::ConfigParseError => 3,
            Self::ConfigValidationError => 4,
            Self::ConfigEnvError => 5,
            Self::ConfigUnknownEndpoint => 6,

            // Transport (100-199)
            Self::SshConnectionFailed => 100,
            Self::SshTimeout => 101,
            Self::SshSpawnFailed => 102,

            // Model (200-299)
            Self::ModelCommandFailed => 200,
            Self::ModelOrderingViolation => 201,
            Self::ModelInvalidEntry => 202,
            Self::ModelUnparsableOutput => 203,

            // Plan (300-399)
            Self::PlanWaitTimeout => 300,
            Self::PlanUnexpectedState => 301,
            Self::PlanStatusUnreadable => 302,
            Self::PlanStopFailed => 303,
            Self::PlanCycleFailed => 304,

            // Cleanup (400-499)
            Self::CleanupAggregateFailure => 400,
            Self::CleanupServiceRestartFailed => 401,
            Self::CleanupPropertyRestoreFailed => 402,
            Self::CleanupRemovalFailed => 403,
            Self::CleanupSideEffectFailed => 404,
            Self::CleanupFileRestoreFailed => 405,
            Self::CleanupSnapshotFailed => 406,
            Self::CleanupLeftoverArtifact => 407,
            Self::CleanupPackageFailed => 408,

            // Internal (500-599)
            Self::InternalLoggingError => 500,
            Self::InternalSerdeError => 501,
        }
    }

    /// Returns the formatted error code string (e.g., "MTR-E001").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("MTR-E{:03}", self.code_number())
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::Config,
            100..=199 => ErrorCategory::Transport,
            200..=299 => ErrorCategory::Model,
            300..=399 => ErrorCategory::Plan,
            400..=499 => ErrorCategory::Cleanup,
            _ => ErrorCategory::Internal,
        }
    }

    /// Returns the full error entry with all metadata.
    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Returns the error message template.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::ConfigNotFound => "Configuration file not found",
            Self::ConfigReadError => "Failed to read configuration file",
            Self::ConfigParseError => "Configuration file contains invalid TOML syntax",
            Self::ConfigValidationError => "Configuration contains invalid values",
            Self::ConfigEnvError => "Environment variable has invalid value",
            Self::ConfigUnknownEndpoint => "Endpoint is not present in the configuration",

            Self::SshConnectionFailed => "SSH connection to endpoint failed",
            Self::SshTimeout => "SSH command execution timed out",
            Self::SshSpawnFailed => "Failed to start the local ssh process",

            Self::ModelCommandFailed => "Model command returned a non-zero exit code",
            Self::ModelOrderingViolation => {
                "Model rejected the change because of an unresolved dependency"
            }
            Self::ModelInvalidEntry => "Ledger entry is missing a target path",
            Self::ModelUnparsableOutput => "Model output could not be parsed",

            Self::PlanWaitTimeout => "Plan did not reach the awaited state before the deadline",
            Self::PlanUnexpectedState => "Plan reached a state other than the awaited one",
            Self::PlanStatusUnreadable => "Plan status output could not be mapped to a state",
            Self::PlanStopFailed => "Plan could not be stopped",
            Self::PlanCycleFailed => "Create/run/remove plan cycle failed",

            Self::CleanupAggregateFailure => "Cleanup finished with recorded failures",
            Self::CleanupServiceRestartFailed => "Service stopped by the test could not be restarted",
            Self::CleanupPropertyRestoreFailed => "Backed-up properties could not be restored",
            Self::CleanupRemovalFailed => "Model item created by the test could not be removed",
            Self::CleanupSideEffectFailed => "Tracked user or file could not be deleted",
            Self::CleanupFileRestoreFailed => "Relocated file could not be moved back",
            Self::CleanupSnapshotFailed => "Snapshot could not be removed",
            Self::CleanupLeftoverArtifact => "Path marked as must-not-exist survived cleanup",
            Self::CleanupPackageFailed => "Tracked package could not be uninstalled",

            Self::InternalLoggingError => "Logging could not be initialised",
            Self::InternalSerdeError => "Serialization failed",
        }
    }

    /// Returns remediation steps for the error.
    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::ConfigNotFound => &[
                "Create ~/.config/mtrack/config.toml",
                "Set MTRACK_CONFIG to point at a configuration file",
            ],
            Self::ConfigReadError => &["Check file permissions on the configuration file"],
            Self::ConfigParseError => &[
                "Run 'mtrack config validate' to identify syntax errors",
                "Check TOML syntax at the indicated line",
            ],
            Self::ConfigValidationError => &[
                "Run 'mtrack config validate' for detailed diagnostics",
                "Verify timeouts are non-zero and endpoint ids are unique",
            ],
            Self::ConfigEnvError => &[
                "Check the environment variable value format",
                "Unset the variable to use config file defaults",
            ],
            Self::ConfigUnknownEndpoint => &[
                "Add an [[endpoints]] entry with a matching id",
                "Check the endpoint name for typos",
            ],
            Self::SshConnectionFailed => &[
                "Verify the host is reachable: ssh <user>@<host> true",
                "Check the identity file and the selected address family",
            ],
            Self::SshTimeout => &[
                "Increase timeouts.command_secs or timeouts.privileged_secs",
                "Check whether the remote command is blocked on input",
            ],
            Self::SshSpawnFailed => &[
                "Ensure ssh (and sshpass when using passwords) is installed locally",
            ],
            Self::ModelCommandFailed => &[
                "Inspect stderr in the error for the model's validation message",
            ],
            Self::ModelOrderingViolation => &[
                "Remove inherited items before their sources",
                "Stop any running plan before removing items",
            ],
            Self::ModelInvalidEntry => &["Only record commands that address a model path"],
            Self::ModelUnparsableOutput => &[
                "Run the show command manually and compare its output format",
            ],
            Self::PlanWaitTimeout => &[
                "Increase timeouts.plan_secs",
                "Inspect the full plan listing captured in the log",
            ],
            Self::PlanUnexpectedState => &[
                "Inspect the plan listing for failed tasks",
            ],
            Self::PlanStatusUnreadable => &[
                "Run 'litp show_plan -a' manually and check the status line",
            ],
            Self::PlanStopFailed => &["Check whether the plan was already stopping"],
            Self::PlanCycleFailed => &[
                "Inspect the failed plan tasks on the endpoint",
                "Remove the plan manually before rerunning the suite",
            ],
            Self::CleanupAggregateFailure => &[
                "Review every failure listed in the cleanup report",
                "Clean the remaining artifacts manually before the next run",
            ],
            Self::CleanupServiceRestartFailed => &["Start the service manually"],
            Self::CleanupPropertyRestoreFailed => &[
                "Compare the item's properties against the logged backup",
            ],
            Self::CleanupRemovalFailed => &[
                "Check for items still inheriting from the path",
                "Remove the item manually and run a plan",
            ],
            Self::CleanupSideEffectFailed => &["Delete the user or file manually"],
            Self::CleanupFileRestoreFailed => &[
                "Move the file back from the holding directory manually",
            ],
            Self::CleanupSnapshotFailed => &["Remove the snapshot manually"],
            Self::CleanupLeftoverArtifact => &["Remove the leftover path manually"],
            Self::CleanupPackageFailed => &["Uninstall the package manually"],
            Self::InternalLoggingError => &["Check the log file path is writable"],
            Self::InternalSerdeError => &["Report this as a bug"],
        }
    }

    /// All codes, for uniqueness checks.
    #[must_use]
    pub fn all() -> &'static [ErrorCode] {
        &[
            Self::ConfigNotFound,
            Self::ConfigReadError,
            Self::ConfigParseError,
            Self::ConfigValidationError,
            Self::ConfigEnvError,
            Self::ConfigUnknownEndpoint,
            Self::SshConnectionFailed,
            Self::SshTimeout,
            Self::SshSpawnFailed,
            Self::ModelCommandFailed,
            Self::ModelOrderingViolation,
            Self::ModelInvalidEntry,
            Self::ModelUnparsableOutput,
            Self::PlanWaitTimeout,
            Self::PlanUnexpectedState,
            Self::PlanStatusUnreadable,
            Self::PlanStopFailed,
            Self::PlanCycleFailed,
            Self::CleanupAggregateFailure,
            Self::CleanupServiceRestartFailed,
            Self::CleanupPropertyRestoreFailed,
            Self::CleanupRemovalFailed,
            Self::CleanupSideEffectFailed,
            Self::CleanupFileRestoreFailed,
            Self::CleanupSnapshotFailed,
            Self::CleanupLeftoverArtifact,
            Self::CleanupPackageFailed,
            Self::InternalLoggingError,
            Self::InternalSerdeError,
        ]
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code_string(), self.message())
    }
}

/// Error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Configuration and environment errors (E001-E099)
    Config,
    /// SSH round-trip failures (E100-E199)
    Transport,
    /// Model command rejections (E200-E299)
    Model,
    /// Plan lifecycle errors (E300-E399)
    Plan,
    /// End-of-test reversal failures (E400-E499)
    Cleanup,
    /// Internal/unexpected errors (E500-E599)
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable name for the category.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Config => "Configuration",
            Self::Transport => "Transport",
            Self::Model => "Model",
            Self::Plan => "Plan",
            Self::Cleanup => "Cleanup",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Complete error entry with all metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Error code string (e.g., "MTR-E001")
    pub code: String,
    /// Error category
    pub category: ErrorCategory,
    /// Human-readable error message
    pub message: String,
    /// Steps to remediate the error
    pub remediation: Vec<String>,
}

impl ErrorEntry {
    /// Formats the error for display with full remediation steps.
    #[must_use]
    pub fn format_full(&self) -> String {
        let mut output = format!("[{}] {}\n\n", self.code, self.message);

        if !self.remediation.is_empty() {
            output.push_str("Remediation steps:\n");
            for (i, step) in self.remediation.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }

        output
    }

    /// Formats the error as a single line.
    #[must_use]
    pub fn format_brief(&self) -> String {
        format!("[{}] {}", self.code, self.message)
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_brief())
    }
}
