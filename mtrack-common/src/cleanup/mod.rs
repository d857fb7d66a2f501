//! Reverse-order cleanup of everything a test changed.
//!
//! [`CleanupOrchestrator::run`] drains a [`CleanupRegistry`] in a fixed
//! sequence of [`CleanupStep`]s. A failing step never stops later steps;
//! failures are collected into the [`CleanupReport`] and surfaced once as
//! [`TrackerError::AggregateCleanupFailure`].

mod registry;
mod report;

pub use registry::{Artifact, CleanupRegistry};
pub use report::{CleanupFailure, CleanupReport, CleanupStep};

use crate::backup::{FileBackup, PathBackup, RestoreTiming};
use crate::command::{DEFAULT_CLI_BINARY, Kind, ModelCommand};
use crate::config::HarnessConfig;
use crate::errors::{ErrorCode, TrackerError, TrackerResult, TransportError};
use crate::executor::RemoteExecutor;
use crate::ledger::{UndoStep, plan_removals, prune_redundant_ancestors};
use crate::plan::{PlanMonitor, PlanState, WaitOutcome, WaitPolicy};
use crate::properties::{is_absent_error, is_ordering_violation, parse_show_output};
use crate::types::{EndpointId, ExecOutput, ExecRequest};
use crate::util::{mask_sensitive_command, shell_quote};
use registry::push_unique;
use std::time::Duration;
use tracing::{debug, info, warn};

/// `userdel` exit status for a user that does not exist.
const USERDEL_NO_SUCH_USER: i32 = 6;

/// Knobs cleanup needs from the harness configuration.
#[derive(Debug, Clone)]
pub struct CleanupSettings {
    pub binary: String,
    pub command_timeout: Duration,
    pub privileged_timeout: Duration,
    pub plan_policy: WaitPolicy,
    /// Sleep applied when a convergence cycle was requested.
    pub convergence_wait: Duration,
    /// Command re-enabling the convergence agent.
    pub resume_command: String,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self::from_config(&HarnessConfig::default())
    }
}

impl CleanupSettings {
    pub fn from_config(config: &HarnessConfig) -> Self {
        let binary = if config.general.cli_binary.is_empty() {
            DEFAULT_CLI_BINARY.to_string()
        } else {
            config.general.cli_binary.clone()
        };
        Self {
            binary,
            command_timeout: config.timeouts.command(),
            privileged_timeout: config.timeouts.privileged(),
            plan_policy: WaitPolicy::from_config(&config.timeouts),
            convergence_wait: config.convergence.wait_duration(),
            resume_command: config.convergence.resume_command.clone(),
        }
    }
}

/// Runs the cleanup sequence against one executor.
pub struct CleanupOrchestrator<'a, E> {
    exec: &'a E,
    monitor: &'a PlanMonitor,
    settings: CleanupSettings,
    report: CleanupReport,
}

impl<'a, E: RemoteExecutor> CleanupOrchestrator<'a, E> {
    pub fn new(exec: &'a E, monitor: &'a PlanMonitor, settings: CleanupSettings) -> Self {
        Self {
            exec,
            monitor,
            settings,
            report: CleanupReport::default(),
        }
    }

    /// Undo everything in `registry`, leaving it empty.
    ///
    /// Returns the report when no step failed. Unsettled waits are listed
    /// in [`CleanupReport::unstable`] without failing the run.
    pub async fn run(mut self, registry: &mut CleanupRegistry) -> TrackerResult<CleanupReport> {
        info!(
            entries = registry.ledger.len(),
            inherited = registry.ledger.inherited().len(),
            path_backups = registry.path_backups.len(),
            file_backups = registry.file_backups.len(),
            "starting cleanup"
        );

        let plan_endpoints = registry.ledger.endpoints_with(&[Kind::PlanRun, Kind::Snapshot]);
        let snapshot_work: Vec<(EndpointId, Vec<String>)> = registry
            .ledger
            .endpoints_with(&[Kind::Snapshot])
            .into_iter()
            .map(|endpoint| {
                let tags = registry.ledger.outstanding_tagged_snapshots(&endpoint);
                (endpoint, tags)
            })
            .collect();
        let mut touched: Vec<EndpointId> = Vec::new();

        self.begin(CleanupStep::RestartServices);
        for (endpoint, service) in std::mem::take(&mut registry.stopped_services) {
            self.restart_service(&endpoint, &service).await;
        }

        self.begin(CleanupStep::PruneLedger);
        let (main, inherited) = registry.ledger.take();
        let pruned_main = prune_redundant_ancestors(&main);
        let pruned_inherited = prune_redundant_ancestors(&inherited);
        debug!(
            main_before = main.len(),
            main_after = pruned_main.len(),
            inherited_before = inherited.len(),
            inherited_after = pruned_inherited.len(),
            "pruned redundant descendants"
        );

        self.begin(CleanupStep::RestoreProperties);
        for backup in std::mem::take(&mut registry.path_backups) {
            if self.restore_properties(&backup).await {
                push_unique(&mut touched, backup.endpoint.clone());
            }
        }

        self.begin(CleanupStep::StopPlans);
        for endpoint in &plan_endpoints {
            self.stop_plan(endpoint).await;
        }

        self.begin(CleanupStep::RemoveItems);
        for step in plan_removals(&pruned_main, &pruned_inherited) {
            if self.undo(&step).await {
                push_unique(&mut touched, step.endpoint.clone());
            }
        }

        self.begin(CleanupStep::DeleteUsersAndFiles);
        for (endpoint, user) in std::mem::take(&mut registry.users) {
            self.delete_user(&endpoint, &user).await;
        }
        for (endpoint, path) in std::mem::take(&mut registry.files) {
            self.delete_file(&endpoint, &path).await;
        }

        self.begin(CleanupStep::RestoreFilesBeforePlan);
        for backup in registry.take_file_backups(RestoreTiming::BeforeCleanupPlan) {
            self.restore_file(CleanupStep::RestoreFilesBeforePlan, &backup).await;
        }

        self.begin(CleanupStep::RunCleanupPlans);
        for endpoint in &touched {
            self.run_plan_cycle(endpoint).await;
        }

        self.begin(CleanupStep::RemoveSnapshots);
        for (endpoint, tags) in &snapshot_work {
            self.remove_snapshots(endpoint, tags).await;
        }

        self.begin(CleanupStep::AwaitConvergence);
        if std::mem::take(&mut registry.convergence_pending) {
            info!(
                wait_secs = self.settings.convergence_wait.as_secs(),
                "waiting for a convergence cycle"
            );
            tokio::time::sleep(self.settings.convergence_wait).await;
        }

        self.begin(CleanupStep::RestoreFilesAfterPlan);
        for backup in registry.take_file_backups(RestoreTiming::AfterCleanupPlan) {
            self.restore_file(CleanupStep::RestoreFilesAfterPlan, &backup).await;
        }

        self.begin(CleanupStep::CheckLeftovers);
        for (endpoint, artifact) in std::mem::take(&mut registry.must_not_exist) {
            self.check_absent(&endpoint, &artifact).await;
        }

        self.begin(CleanupStep::UninstallPackages);
        let packages = std::mem::take(&mut registry.packages);
        let mut paused = std::mem::take(&mut registry.paused_convergence);
        let mut package_endpoints: Vec<EndpointId> = Vec::new();
        for (endpoint, _) in &packages {
            push_unique(&mut package_endpoints, endpoint.clone());
        }
        for endpoint in &package_endpoints {
            if let Some(index) = paused.iter().position(|e| e == endpoint) {
                paused.remove(index);
                self.resume_convergence(endpoint).await;
            }
            let names: Vec<&str> = packages
                .iter()
                .filter(|(e, _)| e == endpoint)
                .map(|(_, name)| name.as_str())
                .collect();
            self.uninstall_packages(endpoint, &names).await;
        }
        for endpoint in &paused {
            self.resume_convergence(endpoint).await;
        }

        let report = self.report;
        if report.is_clean() {
            info!(
                commands = report.commands_issued,
                unstable = report.unstable.len(),
                "cleanup finished"
            );
            Ok(report)
        } else {
            warn!(
                failures = report.failures.len(),
                "cleanup finished with failures:\n{}",
                report.summary()
            );
            Err(TrackerError::AggregateCleanupFailure {
                report: Box::new(report),
            })
        }
    }

    fn begin(&mut self, step: CleanupStep) {
        debug!(step = %step, "cleanup step");
        self.report.steps_run.push(step);
    }

    fn fail(
        &mut self,
        step: CleanupStep,
        endpoint: Option<&EndpointId>,
        code: ErrorCode,
        detail: impl Into<String>,
    ) {
        let detail = detail.into();
        warn!(
            step = %step,
            endpoint = endpoint.map(EndpointId::as_str).unwrap_or("-"),
            code = %code.code_string(),
            "{detail}"
        );
        self.report.failures.push(CleanupFailure {
            step,
            endpoint: endpoint.cloned(),
            code,
            detail,
        });
    }

    fn unstable(&mut self, note: String) {
        warn!("{note}");
        self.report.unstable.push(note);
    }

    async fn send(&mut self, request: ExecRequest) -> Result<ExecOutput, TransportError> {
        self.report.commands_issued += 1;
        debug!(
            endpoint = %request.endpoint,
            command = %mask_sensitive_command(&request.command),
            privileged = request.privileged,
            "cleanup command"
        );
        self.exec.execute(&request).await
    }

    async fn model(&mut self, endpoint: &EndpointId, cmd: &ModelCommand) -> Result<ExecOutput, TransportError> {
        let request = ExecRequest::new(
            endpoint.clone(),
            cmd.render(&self.settings.binary),
            self.settings.command_timeout,
        );
        self.send(request).await
    }

    async fn shell(&mut self, endpoint: &EndpointId, command: String) -> Result<ExecOutput, TransportError> {
        let request = ExecRequest::new(endpoint.clone(), command, self.settings.privileged_timeout)
            .privileged(true);
        self.send(request).await
    }

    /// Run a privileged command; any failure is recorded under `step`.
    async fn shell_checked(
        &mut self,
        step: CleanupStep,
        code: ErrorCode,
        endpoint: &EndpointId,
        command: String,
    ) -> bool {
        match self.shell(endpoint, command.clone()).await {
            Ok(output) if output.success() => true,
            Ok(output) => {
                self.fail(
                    step,
                    Some(endpoint),
                    code,
                    format!(
                        "'{}' exited {}: {}",
                        mask_sensitive_command(&command),
                        output.exit_code,
                        output.stderr_text()
                    ),
                );
                false
            }
            Err(e) => {
                self.fail(step, Some(endpoint), e.code(), e.to_string());
                false
            }
        }
    }

    async fn restart_service(&mut self, endpoint: &EndpointId, service: &str) {
        info!(endpoint = %endpoint, service, "restarting stopped service");
        self.shell_checked(
            CleanupStep::RestartServices,
            ErrorCode::CleanupServiceRestartFailed,
            endpoint,
            format!("service {} start", shell_quote(service)),
        )
        .await;
    }

    /// Returns `true` when at least one property was changed.
    async fn restore_properties(&mut self, backup: &PathBackup) -> bool {
        let endpoint = &backup.endpoint;
        let current = match self.model(endpoint, &ModelCommand::show(backup.path.clone())).await {
            Ok(output) if output.success() => parse_show_output(&output.stdout),
            Ok(output) => {
                warn!(
                    endpoint = %endpoint,
                    path = %backup.path,
                    stderr = %output.stderr_text(),
                    "path unreadable; skipping property restore"
                );
                return false;
            }
            Err(e) => {
                warn!(endpoint = %endpoint, path = %backup.path, error = %e, "path unreadable; skipping property restore");
                return false;
            }
        };

        let plan = backup.restore_plan(&current);
        for (key, reason) in &plan.skipped {
            info!(endpoint = %endpoint, path = %backup.path, key = %key, "not restoring property: {reason}");
        }

        let mut changed = false;
        for op in &plan.ops {
            let cmd = op.to_command(&backup.path);
            match self.model(endpoint, &cmd).await {
                Ok(output) if output.success() => changed = true,
                Ok(output) => self.fail(
                    CleanupStep::RestoreProperties,
                    Some(endpoint),
                    ErrorCode::CleanupPropertyRestoreFailed,
                    format!("'{}' on {}: {}", op.key(), backup.path, output.stderr_text()),
                ),
                Err(e) => self.fail(CleanupStep::RestoreProperties, Some(endpoint), e.code(), e.to_string()),
            }
        }
        changed
    }

    async fn stop_plan(&mut self, endpoint: &EndpointId) {
        match self
            .monitor
            .stop(self.exec, endpoint, self.settings.plan_policy)
            .await
        {
            Ok(None) | Ok(Some(WaitOutcome::Reached)) => {}
            Ok(Some(WaitOutcome::Unexpected { state })) if !state.is_active() => {
                debug!(endpoint = %endpoint, state = %state, "plan settled while stopping");
            }
            Ok(Some(WaitOutcome::Unexpected { state })) => {
                self.unstable(format!("plan on {endpoint} still {state} after stop"));
                self.fail(
                    CleanupStep::StopPlans,
                    Some(endpoint),
                    ErrorCode::PlanUnexpectedState,
                    format!("plan reached {state} while stopping"),
                );
            }
            Ok(Some(WaitOutcome::TimedOut { last })) => {
                self.unstable(format!("plan stop on {endpoint} timed out (last {last})"));
            }
            Err(e) => self.fail(
                CleanupStep::StopPlans,
                Some(endpoint),
                ErrorCode::PlanStopFailed,
                e.to_string(),
            ),
        }
    }

    /// Returns `true` when the removal changed the model.
    async fn undo(&mut self, step: &UndoStep) -> bool {
        let command = step.command.render(&self.settings.binary);
        let timeout = if step.privileged {
            self.settings.privileged_timeout
        } else {
            self.settings.command_timeout
        };
        let request = ExecRequest::new(step.endpoint.clone(), command.clone(), timeout)
            .privileged(step.privileged)
            .with_credentials(step.credentials.clone())
            .with_transport(step.transport);

        let output = match self.send(request).await {
            Ok(output) => output,
            Err(e) => {
                self.fail(CleanupStep::RemoveItems, Some(&step.endpoint), e.code(), e.to_string());
                return false;
            }
        };

        if output.success() {
            info!(endpoint = %step.endpoint, path = %step.command.target_path(), undoes = %step.undoes, "removed");
            return true;
        }
        if is_absent_error(&output.stderr) {
            debug!(endpoint = %step.endpoint, path = %step.command.target_path(), "already absent");
            return false;
        }

        let code = if is_ordering_violation(&output.stderr) {
            ErrorCode::ModelOrderingViolation
        } else {
            ErrorCode::CleanupRemovalFailed
        };
        self.fail(
            CleanupStep::RemoveItems,
            Some(&step.endpoint),
            code,
            format!("'{}' exited {}: {}", command, output.exit_code, output.stderr_text()),
        );
        false
    }

    async fn delete_user(&mut self, endpoint: &EndpointId, user: &str) {
        let command = format!("userdel -r {}", shell_quote(user));
        match self.shell(endpoint, command).await {
            Ok(output) if output.success() => info!(endpoint = %endpoint, user, "deleted user"),
            Ok(output) if output.exit_code == USERDEL_NO_SUCH_USER => {
                debug!(endpoint = %endpoint, user, "user already absent");
            }
            Ok(output) => self.fail(
                CleanupStep::DeleteUsersAndFiles,
                Some(endpoint),
                ErrorCode::CleanupSideEffectFailed,
                format!("userdel {user} exited {}: {}", output.exit_code, output.stderr_text()),
            ),
            Err(e) => self.fail(CleanupStep::DeleteUsersAndFiles, Some(endpoint), e.code(), e.to_string()),
        }
    }

    async fn delete_file(&mut self, endpoint: &EndpointId, path: &str) {
        self.shell_checked(
            CleanupStep::DeleteUsersAndFiles,
            ErrorCode::CleanupSideEffectFailed,
            endpoint,
            format!("rm -rf {}", shell_quote(path)),
        )
        .await;
    }

    async fn restore_file(&mut self, step: CleanupStep, backup: &FileBackup) {
        info!(
            endpoint = %backup.endpoint,
            original = %backup.original_path,
            holding = %backup.holding_path,
            "restoring relocated file"
        );
        for command in backup.restore_commands() {
            let ok = self
                .shell_checked(step, ErrorCode::CleanupFileRestoreFailed, &backup.endpoint, command)
                .await;
            if !ok {
                break;
            }
        }
    }

    async fn run_plan_cycle(&mut self, endpoint: &EndpointId) {
        info!(endpoint = %endpoint, "running cleanup plan");
        match self
            .monitor
            .run_plan_cycle(self.exec, endpoint, self.settings.plan_policy)
            .await
        {
            Ok(()) => {}
            Err(e) => {
                if matches!(e, TrackerError::Timeout { .. }) {
                    self.unstable(format!("cleanup plan on {endpoint} did not settle"));
                }
                self.fail(
                    CleanupStep::RunCleanupPlans,
                    Some(endpoint),
                    ErrorCode::PlanCycleFailed,
                    e.to_string(),
                );
            }
        }
    }

    /// Tagged snapshots first, then the default one. Stops at the first
    /// failure on this endpoint.
    async fn remove_snapshots(&mut self, endpoint: &EndpointId, tags: &[String]) {
        for tag in tags {
            if !self.remove_snapshot(endpoint, Some(tag.as_str())).await {
                return;
            }
        }
        self.remove_snapshot(endpoint, None).await;
    }

    async fn remove_snapshot(&mut self, endpoint: &EndpointId, name: Option<&str>) -> bool {
        let label = name.unwrap_or("<default>");
        let cmd = ModelCommand::RemoveSnapshot {
            name: name.map(str::to_string),
        };
        let output = match self.model(endpoint, &cmd).await {
            Ok(output) => output,
            Err(e) => {
                self.fail(CleanupStep::RemoveSnapshots, Some(endpoint), e.code(), e.to_string());
                return false;
            }
        };

        if !output.success() {
            if is_absent_error(&output.stderr) {
                debug!(endpoint = %endpoint, snapshot = label, "snapshot already absent");
                return true;
            }
            self.fail(
                CleanupStep::RemoveSnapshots,
                Some(endpoint),
                ErrorCode::CleanupSnapshotFailed,
                format!("remove_snapshot {label} exited {}: {}", output.exit_code, output.stderr_text()),
            );
            return false;
        }

        match self
            .monitor
            .wait_for(self.exec, endpoint, PlanState::Complete, self.settings.plan_policy)
            .await
        {
            WaitOutcome::Reached => {
                info!(endpoint = %endpoint, snapshot = label, "snapshot removed");
                true
            }
            WaitOutcome::TimedOut { last } => {
                self.unstable(format!("snapshot {label} removal on {endpoint} timed out (last {last})"));
                self.fail(
                    CleanupStep::RemoveSnapshots,
                    Some(endpoint),
                    ErrorCode::CleanupSnapshotFailed,
                    format!("removal of snapshot {label} did not complete"),
                );
                false
            }
            WaitOutcome::Unexpected { state } => {
                self.fail(
                    CleanupStep::RemoveSnapshots,
                    Some(endpoint),
                    ErrorCode::CleanupSnapshotFailed,
                    format!("removal of snapshot {label} ended {state}"),
                );
                false
            }
        }
    }

    async fn check_absent(&mut self, endpoint: &EndpointId, artifact: &Artifact) {
        let result = match artifact {
            Artifact::Model(path) => self.model(endpoint, &ModelCommand::show(path.clone())).await,
            Artifact::File(path) => {
                let request = ExecRequest::new(
                    endpoint.clone(),
                    format!("test -e {}", shell_quote(path)),
                    self.settings.command_timeout,
                );
                self.send(request).await
            }
        };

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                self.fail(CleanupStep::CheckLeftovers, Some(endpoint), e.code(), e.to_string());
                return;
            }
        };

        let absent = match artifact {
            Artifact::Model(_) => !output.success() && is_absent_error(&output.stderr),
            Artifact::File(_) => output.exit_code == 1,
        };
        if absent {
            debug!(endpoint = %endpoint, artifact = %artifact, "confirmed absent");
        } else if output.success() {
            self.fail(
                CleanupStep::CheckLeftovers,
                Some(endpoint),
                ErrorCode::CleanupLeftoverArtifact,
                format!("{artifact} still exists"),
            );
        } else {
            self.fail(
                CleanupStep::CheckLeftovers,
                Some(endpoint),
                ErrorCode::CleanupLeftoverArtifact,
                format!("could not verify {artifact} is gone: {}", output.stderr_text()),
            );
        }
    }

    async fn resume_convergence(&mut self, endpoint: &EndpointId) {
        info!(endpoint = %endpoint, "re-enabling convergence agent");
        let command = self.settings.resume_command.clone();
        self.shell_checked(
            CleanupStep::UninstallPackages,
            ErrorCode::CleanupSideEffectFailed,
            endpoint,
            command,
        )
        .await;
    }

    async fn uninstall_packages(&mut self, endpoint: &EndpointId, names: &[&str]) {
        let quoted: Vec<String> = names.iter().map(|n| shell_quote(n).into_owned()).collect();
        let command = format!("rpm -e {}", quoted.join(" "));
        match self.shell(endpoint, command).await {
            Ok(output) if output.success() => info!(endpoint = %endpoint, packages = ?names, "uninstalled packages"),
            Ok(output)
                if !output.stderr.is_empty()
                    && output.stderr.iter().all(|l| l.contains("is not installed")) =>
            {
                debug!(endpoint = %endpoint, packages = ?names, "packages already absent");
            }
            Ok(output) => self.fail(
                CleanupStep::UninstallPackages,
                Some(endpoint),
                ErrorCode::CleanupPackageFailed,
                format!("rpm -e exited {}: {}", output.exit_code, output.stderr_text()),
            ),
            Err(e) => self.fail(CleanupStep::UninstallPackages, Some(endpoint), e.code(), e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ModelPath;
    use crate::executor::{ScriptedExecutor, ScriptedReply};
    use crate::ledger::LedgerEntry;

    fn status(text: &str) -> ExecOutput {
        ExecOutput::ok(&[&format!("Plan Status: {text}")])
    }

    fn settings() -> CleanupSettings {
        CleanupSettings {
            binary: "litp".into(),
            command_timeout: Duration::from_secs(5),
            privileged_timeout: Duration::from_secs(5),
            plan_policy: WaitPolicy::new(Duration::from_secs(60), Duration::from_secs(1)),
            convergence_wait: Duration::from_secs(1860),
            resume_command: "puppet agent --enable".into(),
        }
    }

    fn record(registry: &mut CleanupRegistry, endpoint: &str, model: ModelCommand) {
        let command = model.to_string();
        let entry = LedgerEntry::new(EndpointId::new(endpoint), model, command).unwrap();
        registry.ledger.record(entry).unwrap();
    }

    async fn run(exec: &ScriptedExecutor, registry: &mut CleanupRegistry) -> TrackerResult<CleanupReport> {
        let monitor = PlanMonitor::new("litp", Duration::from_secs(5));
        CleanupOrchestrator::new(exec, &monitor, settings())
            .run(registry)
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_registry_runs_every_step() {
        let exec = ScriptedExecutor::new();
        let mut registry = CleanupRegistry::new();
        let report = run(&exec, &mut registry).await.unwrap();
        assert_eq!(report.steps_run, CleanupStep::ALL.to_vec());
        assert_eq!(report.commands_issued, 0);
        assert!(exec.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_creates_remove_once_then_plan() {
        let exec = ScriptedExecutor::new();
        exec.always("show_plan", status("Successful"));
        let mut registry = CleanupRegistry::new();
        record(&mut registry, "ms1", ModelCommand::create("/x/y", "t", &[]));
        record(&mut registry, "ms1", ModelCommand::create("/x/y/z", "t", &[]));

        run(&exec, &mut registry).await.unwrap();

        let commands = exec.commands();
        let removes: Vec<&String> = commands.iter().filter(|c| c.contains("remove -p")).collect();
        assert_eq!(removes, vec!["litp remove -p /x/y"]);
        let create_plan = commands.iter().position(|c| c == "litp create_plan").unwrap();
        let remove = commands.iter().position(|c| c == "litp remove -p /x/y").unwrap();
        assert!(remove < create_plan);
        assert!(commands.contains(&"litp remove_plan".to_string()));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_target_counts_as_removed() {
        let exec = ScriptedExecutor::new();
        exec.push("remove -p /a", ExecOutput::failed(1, &["InvalidLocationError    Not found"]));
        let mut registry = CleanupRegistry::new();
        record(&mut registry, "ms1", ModelCommand::create("/a", "t", &[]));

        let report = run(&exec, &mut registry).await.unwrap();
        assert!(report.is_clean());
        assert!(!exec.commands().iter().any(|c| c.contains("create_plan")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_cli_is_a_failure_not_an_absence() {
        let exec = ScriptedExecutor::new();
        let missing = || ExecOutput::failed(127, &["bash: litp: command not found"]);
        exec.push("remove -p /a", missing());
        exec.push("remove_snapshot", missing());
        exec.push("show -p /leftover", missing());
        let mut registry = CleanupRegistry::new();
        record(&mut registry, "ms1", ModelCommand::create("/a", "t", &[]));
        record(&mut registry, "ms1", ModelCommand::CreateSnapshot { name: None });
        registry.expect_absent(EndpointId::new("ms1"), Artifact::Model(ModelPath::new("/leftover")));

        let err = run(&exec, &mut registry).await.unwrap_err();
        let TrackerError::AggregateCleanupFailure { report } = err else {
            panic!("expected aggregate failure");
        };
        let failed: Vec<(CleanupStep, ErrorCode)> =
            report.failures.iter().map(|f| (f.step, f.code)).collect();
        assert_eq!(
            failed,
            vec![
                (CleanupStep::RemoveItems, ErrorCode::CleanupRemovalFailed),
                (CleanupStep::RemoveSnapshots, ErrorCode::CleanupSnapshotFailed),
                (CleanupStep::CheckLeftovers, ErrorCode::CleanupLeftoverArtifact),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_collected_and_later_steps_still_run() {
        let exec = ScriptedExecutor::new();
        exec.push("remove -p /a", ExecOutput::failed(1, &["ValidationError    item is in use"]));
        exec.push("service httpd start", ExecOutput::failed(1, &["unrecognized service"]));
        let mut registry = CleanupRegistry::new();
        record(&mut registry, "ms1", ModelCommand::create("/a", "t", &[]));
        registry.add_stopped_service(EndpointId::new("ms1"), "httpd");
        registry.add_user(EndpointId::new("node1"), "bob");

        let err = run(&exec, &mut registry).await.unwrap_err();
        let TrackerError::AggregateCleanupFailure { report } = err else {
            panic!("expected aggregate failure");
        };
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].code, ErrorCode::CleanupServiceRestartFailed);
        assert_eq!(report.failures[1].code, ErrorCode::ModelOrderingViolation);
        assert_eq!(report.steps_run.len(), CleanupStep::ALL.len());
        assert_eq!(exec.commands_on("node1"), vec!["userdel -r bob"]);
        assert_eq!(
            exec.commands().iter().filter(|c| c.contains("remove -p /a")).count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_path_backup_restored_and_planned() {
        let exec = ScriptedExecutor::new();
        exec.always("show_plan", status("Successful"));
        exec.push(
            "show -p /n",
            ExecOutput::ok(&["/n", "    properties:", "        a: 9", "        c: 3"]),
        );
        let mut registry = CleanupRegistry::new();
        let mut properties = crate::properties::PropertyMap::new();
        properties.insert("a".into(), crate::properties::PropertyValue::local("1"));
        registry.add_path_backup(crate::backup::PathBackup {
            endpoint: EndpointId::new("ms1"),
            path: ModelPath::new("/n"),
            properties,
        });

        run(&exec, &mut registry).await.unwrap();
        let commands = exec.commands();
        assert_eq!(commands[0], "litp show -p /n");
        assert_eq!(commands[1], "litp update -p /n -d c");
        assert_eq!(commands[2], "litp update -p /n -o a=1");
        assert_eq!(commands[3], "litp create_plan");
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_timeout_is_unstable_not_fatal() {
        let exec = ScriptedExecutor::new();
        exec.always("show_plan", status("Running"));
        let mut registry = CleanupRegistry::new();
        record(&mut registry, "ms1", ModelCommand::RunPlan);
        exec.push("stop_plan", ExecOutput::ok(&[]));

        let report = run(&exec, &mut registry).await.unwrap();
        assert_eq!(report.unstable.len(), 1);
        assert!(report.unstable[0].contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_convergence_wait_and_package_uninstall() {
        let exec = ScriptedExecutor::new();
        let mut registry = CleanupRegistry::new();
        registry.set_convergence_pending();
        registry.add_paused_convergence(EndpointId::new("node1"));
        registry.add_package(EndpointId::new("node1"), "pkg-a");
        registry.add_package(EndpointId::new("node1"), "pkg-b");
        registry.expect_absent(EndpointId::new("node1"), Artifact::File("/tmp/gone".into()));
        exec.push("test -e", ExecOutput::failed(1, &[]));

        let start = tokio::time::Instant::now();
        run(&exec, &mut registry).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1860));
        assert_eq!(
            exec.commands_on("node1"),
            vec!["test -e /tmp/gone", "puppet agent --enable", "rpm -e pkg-a pkg-b"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_leftover_artifact_is_reported() {
        let exec = ScriptedExecutor::new();
        exec.push("show -p /leftover", ExecOutput::ok(&["/leftover"]));
        exec.push("test -e", ScriptedReply::ConnectionFailure("refused".into()));
        let mut registry = CleanupRegistry::new();
        registry.expect_absent(EndpointId::new("ms1"), Artifact::Model(ModelPath::new("/leftover")));
        registry.expect_absent(EndpointId::new("ms1"), Artifact::File("/tmp/x".into()));

        let err = run(&exec, &mut registry).await.unwrap_err();
        let TrackerError::AggregateCleanupFailure { report } = err else {
            panic!("expected aggregate failure");
        };
        let codes: Vec<ErrorCode> = report.failures.iter().map(|f| f.code).collect();
        assert_eq!(codes, vec![ErrorCode::CleanupLeftoverArtifact, ErrorCode::SshConnectionFailed]);
    }
}
