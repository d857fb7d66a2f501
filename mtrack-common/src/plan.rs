//! Plan state polling.
//!
//! The deployment plan runs asynchronously on the management node; its
//! state is only ever observed by polling `show_plan`. [`WaitTracker`]
//! holds the wait rules as a pure state machine and [`PlanMonitor`]
//! drives it against a [`RemoteExecutor`] on the tokio clock.

use crate::command::ModelCommand;
use crate::config::TimeoutsConfig;
use crate::errors::{TrackerError, TrackerResult};
use crate::executor::RemoteExecutor;
use crate::properties::is_do_nothing_plan;
use crate::types::{EndpointId, ExecOutput, ExecRequest};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// Times `NotRunning` is tolerated while waiting for another state; covers
/// the window between `run_plan` returning and the plan actually starting.
pub const NOT_RUNNING_RETRIES: u32 = 3;

/// Observed plan state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    NotRunning,
    InProgress,
    Stopping,
    Stopped,
    Complete,
    Failed,
    Invalid,
    /// The status query itself failed or returned unreadable output.
    CommandError,
}

impl PlanState {
    /// Map the status line of `show_plan` output.
    pub fn from_status_text(text: &str) -> Self {
        let lower = text.to_lowercase();
        if lower.contains("initial") {
            Self::NotRunning
        } else if lower.contains("running") {
            Self::InProgress
        } else if lower.contains("stopping") {
            Self::Stopping
        } else if lower.contains("stopped") {
            Self::Stopped
        } else if lower.contains("successful") {
            Self::Complete
        } else if lower.contains("failed") {
            Self::Failed
        } else if lower.contains("invalid") {
            Self::Invalid
        } else {
            Self::CommandError
        }
    }

    /// Map full `show_plan` output using its last non-empty line.
    pub fn from_output(stdout: &[String]) -> Self {
        stdout
            .iter()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map_or(Self::CommandError, |line| Self::from_status_text(line))
    }

    /// A plan in this state blocks model removals.
    pub fn is_active(self) -> bool {
        matches!(self, Self::InProgress | Self::Stopping)
    }
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotRunning => "not_running",
            Self::InProgress => "in_progress",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Invalid => "invalid",
            Self::CommandError => "command_error",
        };
        f.write_str(name)
    }
}

/// How long to wait and how often to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3600),
            poll_interval: Duration::from_secs(3),
        }
    }
}

impl WaitPolicy {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    pub fn from_config(timeouts: &TimeoutsConfig) -> Self {
        Self::new(timeouts.plan(), timeouts.poll_interval())
    }
}

/// Decision after one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Reached,
    Unexpected(PlanState),
}

/// Result of [`PlanMonitor::wait_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WaitOutcome {
    Reached,
    Unexpected { state: PlanState },
    TimedOut { last: PlanState },
}

impl WaitOutcome {
    pub fn is_reached(&self) -> bool {
        matches!(self, Self::Reached)
    }

    /// Convert a non-`Reached` outcome into an error.
    pub fn into_result(self, endpoint: &EndpointId, target: PlanState) -> TrackerResult<()> {
        match self {
            Self::Reached => Ok(()),
            Self::Unexpected { state } => Err(TrackerError::UnexpectedPlanState {
                endpoint: endpoint.clone(),
                target,
                observed: state,
            }),
            Self::TimedOut { last } => Err(TrackerError::Timeout {
                endpoint: endpoint.clone(),
                target,
                last,
            }),
        }
    }
}

/// Wait rules for one `wait_for` call.
///
/// - target observed: reached
/// - `CommandError` or `InProgress`: keep polling
/// - `Stopping` while waiting for `Stopped` or `Complete`: keep polling
/// - `NotRunning` while waiting for anything else: keep polling up to
///   [`NOT_RUNNING_RETRIES`] times
/// - anything else: unexpected, no retry
#[derive(Debug, Clone)]
pub struct WaitTracker {
    target: PlanState,
    not_running_seen: u32,
    polls: u32,
    last: PlanState,
}

impl WaitTracker {
    pub fn new(target: PlanState) -> Self {
        Self {
            target,
            not_running_seen: 0,
            polls: 0,
            last: PlanState::CommandError,
        }
    }

    pub fn observe(&mut self, state: PlanState) -> Step {
        self.polls += 1;
        self.last = state;

        if state == self.target {
            return Step::Reached;
        }

        match state {
            PlanState::CommandError | PlanState::InProgress => Step::Continue,
            PlanState::Stopping
                if matches!(self.target, PlanState::Stopped | PlanState::Complete) =>
            {
                Step::Continue
            }
            PlanState::NotRunning => {
                self.not_running_seen += 1;
                if self.not_running_seen <= NOT_RUNNING_RETRIES {
                    Step::Continue
                } else {
                    Step::Unexpected(state)
                }
            }
            other => Step::Unexpected(other),
        }
    }

    pub fn last(&self) -> PlanState {
        self.last
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }
}

/// Issues plan commands and polls plan state on an endpoint.
#[derive(Debug, Clone)]
pub struct PlanMonitor {
    binary: String,
    command_timeout: Duration,
}

impl PlanMonitor {
    pub fn new(binary: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            command_timeout,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    async fn model<E: RemoteExecutor>(
        &self,
        exec: &E,
        endpoint: &EndpointId,
        cmd: &ModelCommand,
    ) -> TrackerResult<ExecOutput> {
        let request = ExecRequest::new(
            endpoint.clone(),
            cmd.render(&self.binary),
            self.command_timeout,
        );
        Ok(exec.execute(&request).await?)
    }

    /// One `show_plan -a` poll. Never fails; problems map to `CommandError`.
    pub async fn current_state<E: RemoteExecutor>(
        &self,
        exec: &E,
        endpoint: &EndpointId,
    ) -> PlanState {
        let output = match self
            .model(exec, endpoint, &ModelCommand::ShowPlan { all: true })
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "plan status poll failed");
                return PlanState::CommandError;
            }
        };

        if !output.success() {
            debug!(
                endpoint = %endpoint,
                exit_code = output.exit_code,
                stderr = %output.stderr_text(),
                "plan status query returned non-zero"
            );
            return PlanState::CommandError;
        }

        let state = PlanState::from_output(&output.stdout);
        if state == PlanState::CommandError {
            warn!(
                endpoint = %endpoint,
                output = ?output.stdout.last(),
                "unrecognised plan status"
            );
        }
        state
    }

    /// Poll until `target` is observed, an unexpected state is seen, or the
    /// policy timeout passes.
    pub async fn wait_for<E: RemoteExecutor>(
        &self,
        exec: &E,
        endpoint: &EndpointId,
        target: PlanState,
        policy: WaitPolicy,
    ) -> WaitOutcome {
        let deadline = Instant::now() + policy.timeout;
        let mut tracker = WaitTracker::new(target);

        let outcome = loop {
            let state = self.current_state(exec, endpoint).await;
            match tracker.observe(state) {
                Step::Reached => break WaitOutcome::Reached,
                Step::Unexpected(state) => break WaitOutcome::Unexpected { state },
                Step::Continue => {}
            }

            let now = Instant::now();
            if now >= deadline {
                self.log_full_plan(exec, endpoint).await;
                break WaitOutcome::TimedOut {
                    last: tracker.last(),
                };
            }
            sleep(policy.poll_interval.min(deadline - now)).await;
        };

        debug!(
            endpoint = %endpoint,
            target = %target,
            polls = tracker.polls(),
            outcome = ?outcome,
            "plan wait finished"
        );
        outcome
    }

    /// Diagnostic dump of the full plan after a timeout.
    async fn log_full_plan<E: RemoteExecutor>(&self, exec: &E, endpoint: &EndpointId) {
        match self
            .model(exec, endpoint, &ModelCommand::ShowPlan { all: false })
            .await
        {
            Ok(output) => warn!(
                endpoint = %endpoint,
                plan = %output.stdout.join("\n"),
                "plan wait timed out"
            ),
            Err(e) => warn!(endpoint = %endpoint, error = %e, "plan wait timed out; plan unreadable"),
        }
    }

    /// Stop a running plan and wait for it to settle.
    ///
    /// `stop_plan` is issued only when the plan is `InProgress`; a plan
    /// already `Stopping` is waited on without a second stop. Returns `None`
    /// when no plan was active.
    pub async fn stop<E: RemoteExecutor>(
        &self,
        exec: &E,
        endpoint: &EndpointId,
        policy: WaitPolicy,
    ) -> TrackerResult<Option<WaitOutcome>> {
        match self.current_state(exec, endpoint).await {
            PlanState::InProgress => {
                info!(endpoint = %endpoint, "stopping running plan");
                let output = self.model(exec, endpoint, &ModelCommand::StopPlan).await?;
                if !output.success() {
                    return Err(self.command_error(endpoint, &ModelCommand::StopPlan, &output));
                }
            }
            PlanState::Stopping => {
                info!(endpoint = %endpoint, "plan already stopping");
            }
            state => {
                debug!(endpoint = %endpoint, state = %state, "no active plan to stop");
                return Ok(None);
            }
        }

        Ok(Some(
            self.wait_for(exec, endpoint, PlanState::Stopped, policy)
                .await,
        ))
    }

    /// `create_plan`, `run_plan`, wait for `Complete`, `remove_plan`.
    ///
    /// A plan with nothing to do counts as success.
    pub async fn run_plan_cycle<E: RemoteExecutor>(
        &self,
        exec: &E,
        endpoint: &EndpointId,
        policy: WaitPolicy,
    ) -> TrackerResult<()> {
        let created = self.model(exec, endpoint, &ModelCommand::CreatePlan).await?;
        if !created.success() {
            if is_do_nothing_plan(&created.stderr) {
                info!(endpoint = %endpoint, "nothing to apply; skipping plan run");
                return Ok(());
            }
            return Err(self.command_error(endpoint, &ModelCommand::CreatePlan, &created));
        }

        let run = self.model(exec, endpoint, &ModelCommand::RunPlan).await?;
        if !run.success() {
            return Err(self.command_error(endpoint, &ModelCommand::RunPlan, &run));
        }

        self.wait_for(exec, endpoint, PlanState::Complete, policy)
            .await
            .into_result(endpoint, PlanState::Complete)?;

        let removed = self.model(exec, endpoint, &ModelCommand::RemovePlan).await?;
        if !removed.success() {
            return Err(self.command_error(endpoint, &ModelCommand::RemovePlan, &removed));
        }
        Ok(())
    }

    fn command_error(
        &self,
        endpoint: &EndpointId,
        cmd: &ModelCommand,
        output: &ExecOutput,
    ) -> TrackerError {
        TrackerError::Command {
            endpoint: endpoint.clone(),
            command: cmd.render(&self.binary),
            exit_code: output.exit_code,
            stderr: output.stderr_text(),
        }
    }
}
