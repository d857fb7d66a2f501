//! mtrack common library
//!
//! Tracks every state-changing command a test issues against a remote
//! hierarchical model over SSH, and undoes all of it afterwards in an
//! order the model accepts.

pub mod backup;
pub mod cleanup;
pub mod command;
pub mod config;
pub mod errors;
pub mod executor;
pub mod ledger;
pub mod logging;
pub mod plan;
pub mod properties;
pub mod session;
pub mod testing;
pub mod types;
pub mod util;

pub use backup::{FileBackup, PathBackup, RestoreOp, RestorePlan, RestoreTiming};
pub use cleanup::{
    Artifact, CleanupFailure, CleanupOrchestrator, CleanupRegistry, CleanupReport,
    CleanupSettings, CleanupStep,
};
pub use command::{
    DEFAULT_CLI_BINARY, Kind, ModelCommand, ModelPath, PLAN_PATH, is_ancestor_command,
    snapshot_path,
};
pub use config::{ConfigError, ConfigSource, ConfigWarning, HarnessConfig, Severity, Sourced};
pub use errors::{ErrorCategory, ErrorCode, TrackerError, TrackerResult, TransportError};
pub use executor::{RemoteExecutor, ScriptedExecutor, ScriptedReply, SshExecutor};
pub use ledger::{Ledger, LedgerEntry, UndoStep, plan_removals, prune_redundant_ancestors};
pub use logging::{LogConfig, LoggingError, LoggingGuards, init_logging};
pub use plan::{PlanMonitor, PlanState, WaitOutcome, WaitPolicy};
pub use properties::{PropertyMap, PropertyValue, parse_show_output};
pub use session::{RunOptions, TestSession};
pub use types::{Credentials, EndpointId, ExecOutput, ExecRequest, Transport};
pub use util::mask_sensitive_command;
