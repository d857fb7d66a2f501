//! Remote command execution.
//!
//! [`RemoteExecutor`] is the seam between the tracker and the network:
//! [`SshExecutor`] drives the system `ssh` client, [`ScriptedExecutor`]
//! replays canned responses for tests.

mod mock;
mod ssh;

pub use mock::{RecordedCall, ScriptedExecutor, ScriptedReply};
pub use ssh::SshExecutor;

use crate::errors::TransportError;
use crate::types::{ExecOutput, ExecRequest};
use std::future::Future;
use std::sync::Arc;

/// Runs one command on one endpoint and returns its captured output.
///
/// A non-zero exit code is a successful round-trip; only failures to
/// complete the round-trip are errors.
pub trait RemoteExecutor: Send + Sync {
    fn execute(
        &self,
        request: &ExecRequest,
    ) -> impl Future<Output = Result<ExecOutput, TransportError>> + Send;
}

impl<T: RemoteExecutor> RemoteExecutor for Arc<T> {
    fn execute(
        &self,
        request: &ExecRequest,
    ) -> impl Future<Output = Result<ExecOutput, TransportError>> + Send {
        (**self).execute(request)
    }
}

impl<T: RemoteExecutor> RemoteExecutor for &T {
    fn execute(
        &self,
        request: &ExecRequest,
    ) -> impl Future<Output = Result<ExecOutput, TransportError>> + Send {
        (**self).execute(request)
    }
}
