//! Per-test surface for issuing tracked commands.
//!
//! A [`TestSession`] owns one executor handle, one [`PlanMonitor`] and one
//! [`CleanupRegistry`]. Every successful mutating model command goes into
//! the registry's ledger; [`TestSession::cleanup`] undoes all of it.
//! Parallel tests each build their own session.

use crate::backup::{FileBackup, PathBackup, RestoreTiming};
use crate::cleanup::{Artifact, CleanupOrchestrator, CleanupRegistry, CleanupReport, CleanupSettings};
use crate::command::{Kind, ModelCommand, ModelPath};
use crate::config::HarnessConfig;
use crate::errors::{TrackerError, TrackerResult};
use crate::executor::RemoteExecutor;
use crate::ledger::{LedgerEntry, Recorded};
use crate::plan::{PlanMonitor, PlanState, WaitOutcome, WaitPolicy};
use crate::properties::{PropertyMap, is_absent_error, is_ordering_violation, parse_show_output};
use crate::types::{Credentials, EndpointId, ExecOutput, ExecRequest, Transport};
use crate::util::{mask_sensitive_command, shell_quote};
use tracing::{debug, info, warn};

/// How a single command is sent.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub credentials: Option<Credentials>,
    pub transport: Transport,
    pub privileged: bool,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    #[must_use]
    pub fn as_user(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    #[must_use]
    pub fn over(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }
}

pub struct TestSession<E> {
    exec: E,
    monitor: PlanMonitor,
    settings: CleanupSettings,
    holding_dir: String,
    pause_command: String,
    registry: CleanupRegistry,
}

impl<E: RemoteExecutor> TestSession<E> {
    pub fn new(exec: E, config: &HarnessConfig) -> Self {
        let settings = CleanupSettings::from_config(config);
        Self {
            exec,
            monitor: PlanMonitor::new(settings.binary.clone(), settings.command_timeout),
            holding_dir: config.paths.holding_dir.clone(),
            pause_command: config.convergence.pause_command.clone(),
            settings,
            registry: CleanupRegistry::new(),
        }
    }

    pub fn executor(&self) -> &E {
        &self.exec
    }

    pub fn registry(&self) -> &CleanupRegistry {
        &self.registry
    }

    pub fn binary(&self) -> &str {
        &self.settings.binary
    }

    pub fn plan_policy(&self) -> WaitPolicy {
        self.settings.plan_policy
    }

    /// Run a command line; fail on non-zero exit.
    ///
    /// Lines that parse as model commands are tracked. An `update` of a
    /// path the test did not create backs the path up first.
    pub async fn run(&mut self, endpoint: &EndpointId, command: &str) -> TrackerResult<ExecOutput> {
        self.run_with(endpoint, command, RunOptions::default()).await
    }

    pub async fn run_with(
        &mut self,
        endpoint: &EndpointId,
        command: &str,
        options: RunOptions,
    ) -> TrackerResult<ExecOutput> {
        let model = ModelCommand::parse(command, &self.settings.binary);
        let output = self
            .dispatch(endpoint, command.to_string(), model, &options)
            .await?;
        check(endpoint, command, output)
    }

    /// Run a pre-built model command; fail on non-zero exit.
    pub async fn run_model(&mut self, endpoint: &EndpointId, cmd: &ModelCommand) -> TrackerResult<ExecOutput> {
        let command = cmd.render(&self.settings.binary);
        let output = self
            .dispatch(endpoint, command.clone(), Some(cmd.clone()), &RunOptions::default())
            .await?;
        check(endpoint, &command, output)
    }

    /// Run a command line and return its output whatever the exit code.
    ///
    /// Successful model commands are still tracked. Only transport
    /// failures are errors.
    pub async fn try_run(&mut self, endpoint: &EndpointId, command: &str) -> TrackerResult<ExecOutput> {
        let model = ModelCommand::parse(command, &self.settings.binary);
        self.dispatch(endpoint, command.to_string(), model, &RunOptions::default())
            .await
    }

    /// Run a command without recording anything; fail on non-zero exit.
    pub async fn run_untracked(
        &mut self,
        endpoint: &EndpointId,
        command: &str,
        options: RunOptions,
    ) -> TrackerResult<ExecOutput> {
        let output = self.send(endpoint, command.to_string(), &options).await?;
        check(endpoint, command, output)
    }

    async fn dispatch(
        &mut self,
        endpoint: &EndpointId,
        command: String,
        model: Option<ModelCommand>,
        options: &RunOptions,
    ) -> TrackerResult<ExecOutput> {
        if let Some(ModelCommand::Update { path, .. }) = &model {
            self.auto_backup(endpoint, path).await?;
        }

        let output = self.send(endpoint, command.clone(), options).await?;
        if output.success() {
            if let Some(model) = model {
                self.track(endpoint, model, command, options)?;
            }
        }
        Ok(output)
    }

    async fn send(
        &self,
        endpoint: &EndpointId,
        command: String,
        options: &RunOptions,
    ) -> TrackerResult<ExecOutput> {
        let timeout = if options.privileged {
            self.settings.privileged_timeout
        } else {
            self.settings.command_timeout
        };
        debug!(
            endpoint = %endpoint,
            command = %mask_sensitive_command(&command),
            privileged = options.privileged,
            "running command"
        );
        let request = ExecRequest::new(endpoint.clone(), command, timeout)
            .privileged(options.privileged)
            .with_credentials(options.credentials.clone())
            .with_transport(options.transport);
        Ok(self.exec.execute(&request).await?)
    }

    fn track(
        &mut self,
        endpoint: &EndpointId,
        model: ModelCommand,
        command: String,
        options: &RunOptions,
    ) -> TrackerResult<()> {
        let export_file = match &model {
            ModelCommand::Export { file, .. } => Some(file.clone()),
            _ => None,
        };
        let Some(entry) = LedgerEntry::new(endpoint.clone(), model, command) else {
            return Ok(());
        };
        let entry = entry
            .with_credentials(options.credentials.clone())
            .with_transport(options.transport)
            .privileged(options.privileged);

        if let Some(file) = export_file {
            self.registry.add_file(endpoint.clone(), file);
        }

        let kind = entry.kind;
        let path = entry.target_path.clone();
        match self.registry.ledger.record(entry)? {
            Recorded::Stored => debug!(endpoint = %endpoint, kind = %kind, path = %path, "tracked"),
            Recorded::Cancelled(cancelled) => debug!(
                endpoint = %endpoint,
                path = %path,
                cancelled = %cancelled.command,
                "removal cancelled earlier tracking"
            ),
        }
        Ok(())
    }

    /// The test created `path` (or one of its ancestors) itself.
    fn created_by_test(&self, endpoint: &EndpointId, path: &ModelPath) -> bool {
        self.registry
            .ledger
            .entries()
            .iter()
            .chain(self.registry.ledger.inherited())
            .filter(|e| &e.endpoint == endpoint && matches!(e.kind, Kind::CreateOrLink | Kind::Inherit))
            .any(|e| &e.target_path == path || e.target_path.is_strict_ancestor_of(path))
    }

    async fn auto_backup(&mut self, endpoint: &EndpointId, path: &ModelPath) -> TrackerResult<()> {
        if self.registry.has_path_backup(endpoint, path) || self.created_by_test(endpoint, path) {
            return Ok(());
        }
        self.backup_path(endpoint, path).await?;
        Ok(())
    }

    async fn read_properties(&self, endpoint: &EndpointId, path: &ModelPath) -> TrackerResult<Option<PropertyMap>> {
        let show = ModelCommand::show(path.clone()).render(&self.settings.binary);
        let output = self.send(endpoint, show.clone(), &RunOptions::default()).await?;
        if output.success() {
            return Ok(Some(parse_show_output(&output.stdout)));
        }
        if is_absent_error(&output.stderr) {
            return Ok(None);
        }
        check(endpoint, &show, output).map(|_| None)
    }

    /// Capture the current properties of `path` for restoration at cleanup.
    ///
    /// Returns `false` when the path already has a backup or does not exist.
    pub async fn backup_path(&mut self, endpoint: &EndpointId, path: &ModelPath) -> TrackerResult<bool> {
        if self.registry.has_path_backup(endpoint, path) {
            return Ok(false);
        }
        let Some(properties) = self.read_properties(endpoint, path).await? else {
            debug!(endpoint = %endpoint, path = %path, "nothing to back up; path absent");
            return Ok(false);
        };
        info!(endpoint = %endpoint, path = %path, properties = properties.len(), "backed up properties");
        Ok(self.registry.add_path_backup(PathBackup {
            endpoint: endpoint.clone(),
            path: path.clone(),
            properties,
        }))
    }

    /// Restore a backed-up path now instead of at cleanup.
    ///
    /// Returns `false` when no backup exists. On failure the backup is kept
    /// for cleanup.
    pub async fn restore_path(&mut self, endpoint: &EndpointId, path: &ModelPath) -> TrackerResult<bool> {
        let Some(backup) = self.registry.take_path_backup(endpoint, path) else {
            return Ok(false);
        };
        match self.apply_restore(&backup).await {
            Ok(()) => Ok(true),
            Err(e) => {
                self.registry.add_path_backup(backup);
                Err(e)
            }
        }
    }

    async fn apply_restore(&mut self, backup: &PathBackup) -> TrackerResult<()> {
        let current = self
            .read_properties(&backup.endpoint, &backup.path)
            .await?
            .unwrap_or_default();
        let plan = backup.restore_plan(&current);
        for (key, reason) in &plan.skipped {
            info!(endpoint = %backup.endpoint, path = %backup.path, key = %key, "not restoring property: {reason}");
        }
        for op in &plan.ops {
            let command = op.to_command(&backup.path).render(&self.settings.binary);
            self.run_untracked(&backup.endpoint, &command, RunOptions::default())
                .await?;
        }
        Ok(())
    }

    /// Move a file aside; it is moved back during cleanup.
    pub async fn backup_file(
        &mut self,
        endpoint: &EndpointId,
        path: &str,
        delete_original_first: bool,
        timing: RestoreTiming,
    ) -> TrackerResult<FileBackup> {
        let backup = FileBackup::new(endpoint.clone(), path, &self.holding_dir, delete_original_first, timing);
        self.run_untracked(endpoint, &backup.backup_command(), RunOptions::new().privileged())
            .await?;
        info!(endpoint = %endpoint, original = path, holding = %backup.holding_path, "moved file aside");
        self.registry.add_file_backup(backup.clone());
        Ok(backup)
    }

    /// `create_plan` then `run_plan`; does not wait.
    pub async fn create_and_run_plan(&mut self, endpoint: &EndpointId) -> TrackerResult<()> {
        self.run_model(endpoint, &ModelCommand::CreatePlan).await?;
        self.run_model(endpoint, &ModelCommand::RunPlan).await?;
        Ok(())
    }

    pub async fn plan_state(&self, endpoint: &EndpointId) -> PlanState {
        self.monitor.current_state(&self.exec, endpoint).await
    }

    /// Wait for `target` with the configured plan policy.
    pub async fn wait_for_plan(&self, endpoint: &EndpointId, target: PlanState) -> TrackerResult<()> {
        self.wait_for_plan_with(endpoint, target, self.settings.plan_policy)
            .await
            .into_result(endpoint, target)
    }

    pub async fn wait_for_plan_with(
        &self,
        endpoint: &EndpointId,
        target: PlanState,
        policy: WaitPolicy,
    ) -> WaitOutcome {
        self.monitor.wait_for(&self.exec, endpoint, target, policy).await
    }

    /// Stop the running plan, if any, and wait until it settles.
    pub async fn stop_plan(&self, endpoint: &EndpointId) -> TrackerResult<()> {
        match self
            .monitor
            .stop(&self.exec, endpoint, self.settings.plan_policy)
            .await?
        {
            None | Some(WaitOutcome::Reached) => Ok(()),
            Some(WaitOutcome::Unexpected { state }) if !state.is_active() => Ok(()),
            Some(outcome) => outcome.into_result(endpoint, PlanState::Stopped),
        }
    }

    /// Stop a service; it is started again first thing in cleanup.
    pub async fn stop_service(&mut self, endpoint: &EndpointId, service: &str) -> TrackerResult<()> {
        let command = format!("service {} stop", shell_quote(service));
        self.run_untracked(endpoint, &command, RunOptions::new().privileged())
            .await?;
        self.registry.add_stopped_service(endpoint.clone(), service);
        Ok(())
    }

    pub fn track_user(&mut self, endpoint: &EndpointId, user: &str) {
        self.registry.add_user(endpoint.clone(), user);
    }

    pub fn track_file(&mut self, endpoint: &EndpointId, path: &str) {
        self.registry.add_file(endpoint.clone(), path);
    }

    pub fn track_package(&mut self, endpoint: &EndpointId, package: &str) {
        self.registry.add_package(endpoint.clone(), package);
    }

    /// Disable the convergence agent; cleanup re-enables it.
    pub async fn pause_convergence(&mut self, endpoint: &EndpointId) -> TrackerResult<()> {
        let command = self.pause_command.clone();
        self.run_untracked(endpoint, &command, RunOptions::new().privileged())
            .await?;
        self.registry.add_paused_convergence(endpoint.clone());
        Ok(())
    }

    /// Make cleanup wait one convergence cycle before restoring late files.
    pub fn require_convergence_cycle(&mut self) {
        self.registry.set_convergence_pending();
    }

    pub fn expect_absent_after_cleanup(&mut self, endpoint: &EndpointId, artifact: Artifact) {
        self.registry.expect_absent(endpoint.clone(), artifact);
    }

    /// Forget the latest create/inherit of `path`; cleanup will not remove it.
    pub fn cancel_tracking(&mut self, endpoint: &EndpointId, path: &ModelPath) -> Option<LedgerEntry> {
        let cancelled = self.registry.ledger.cancel_by_path(endpoint, path);
        if cancelled.is_none() {
            warn!(endpoint = %endpoint, path = %path, "nothing tracked to cancel");
        }
        cancelled
    }

    /// Undo everything this session recorded. Safe to call more than once.
    pub async fn cleanup(&mut self) -> TrackerResult<CleanupReport> {
        CleanupOrchestrator::new(&self.exec, &self.monitor, self.settings.clone())
            .run(&mut self.registry)
            .await
    }
}

/// Map a non-zero exit to the matching error.
fn check(endpoint: &EndpointId, command: &str, output: ExecOutput) -> TrackerResult<ExecOutput> {
    if output.success() {
        return Ok(output);
    }
    let command = mask_sensitive_command(command);
    if is_ordering_violation(&output.stderr) {
        return Err(TrackerError::OrderingViolation {
            endpoint: endpoint.clone(),
            command,
            detail: output.stderr_text(),
        });
    }
    Err(TrackerError::Command {
        endpoint: endpoint.clone(),
        command,
        exit_code: output.exit_code,
        stderr: output.stderr_text(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ScriptedExecutor, ScriptedReply};

    fn session() -> (ScriptedExecutor, TestSession<ScriptedExecutor>) {
        let exec = ScriptedExecutor::new();
        let session = TestSession::new(exec.clone(), &HarnessConfig::default());
        (exec, session)
    }

    fn ms1() -> EndpointId {
        EndpointId::new("ms1")
    }

    #[tokio::test]
    async fn test_successful_create_is_tracked() {
        let (_exec, mut session) = session();
        session
            .run(&ms1(), "litp create -p /a -t t -o k=v")
            .await
            .unwrap();
        assert_eq!(session.registry().ledger.len(), 1);
        assert_eq!(session.registry().ledger.entries()[0].kind, Kind::CreateOrLink);
    }

    #[tokio::test]
    async fn test_failed_command_is_not_tracked() {
        let (exec, mut session) = session();
        exec.push("create", ExecOutput::failed(1, &["ItemExistsError"]));
        let err = session
            .run(&ms1(), "litp create -p /a -t t")
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::Command { exit_code: 1, .. }));
        assert!(session.registry().ledger.is_empty());

        exec.push("remove", ExecOutput::failed(1, &["ValidationError in /a"]));
        let err = session.run(&ms1(), "litp remove -p /b").await.unwrap_err();
        assert!(matches!(err, TrackerError::OrderingViolation { .. }));
    }

    #[tokio::test]
    async fn test_try_run_returns_output_and_tracks_success() {
        let (exec, mut session) = session();
        exec.push("create -p /bad", ExecOutput::failed(1, &["InvalidTypeError"]));
        let out = session.try_run(&ms1(), "litp create -p /bad -t t").await.unwrap();
        assert_eq!(out.exit_code, 1);
        let out = session.try_run(&ms1(), "litp create -p /good -t t").await.unwrap();
        assert!(out.success());
        assert_eq!(session.registry().ledger.len(), 1);

        exec.push("uptime", ScriptedReply::Timeout);
        assert!(matches!(
            session.try_run(&ms1(), "uptime").await.unwrap_err(),
            TrackerError::Transport(_)
        ));
    }

    #[tokio::test]
    async fn test_create_then_remove_leaves_nothing() {
        let (_exec, mut session) = session();
        session.run_model(&ms1(), &ModelCommand::create("/a", "t", &[])).await.unwrap();
        session.run_model(&ms1(), &ModelCommand::remove("/a")).await.unwrap();
        assert!(session.registry().ledger.is_empty());
    }

    #[tokio::test]
    async fn test_update_backs_up_foreign_path_once() {
        let (exec, mut session) = session();
        exec.always("show -p /n", ExecOutput::ok(&["/n", "    properties:", "        a: 1"]));
        session.run(&ms1(), "litp update -p /n -o a=2").await.unwrap();
        session.run(&ms1(), "litp update -p /n -o a=3").await.unwrap();

        let shows = exec.commands().iter().filter(|c| c.starts_with("litp show")).count();
        assert_eq!(shows, 1);
        assert_eq!(session.registry().path_backups().len(), 1);
        assert!(session.registry().ledger.is_empty());
    }

    #[tokio::test]
    async fn test_update_of_created_path_skips_backup() {
        let (exec, mut session) = session();
        session.run(&ms1(), "litp create -p /mine -t t").await.unwrap();
        session.run(&ms1(), "litp update -p /mine/child -o a=2").await.unwrap();
        assert!(session.registry().path_backups().is_empty());
        assert!(!exec.commands().iter().any(|c| c.starts_with("litp show")));
    }

    #[tokio::test]
    async fn test_export_tracks_output_file() {
        let (_exec, mut session) = session();
        session
            .run(&ms1(), "litp export -p /deployments -f /tmp/out.xml")
            .await
            .unwrap();
        assert_eq!(session.registry().files(), &[(ms1(), "/tmp/out.xml".to_string())]);
    }

    #[tokio::test]
    async fn test_stop_service_registers_restart() {
        let (exec, mut session) = session();
        session.stop_service(&ms1(), "httpd").await.unwrap();
        assert_eq!(session.registry().stopped_services().len(), 1);
        assert!(exec.calls()[0].privileged);

        let report = session.cleanup().await.unwrap();
        assert!(exec.commands().contains(&"service httpd start".to_string()));
        assert!(report.is_clean());
        assert!(session.registry().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_tracking() {
        let (_exec, mut session) = session();
        session.run(&ms1(), "litp create -p /keep -t t").await.unwrap();
        let cancelled = session.cancel_tracking(&ms1(), &ModelPath::new("/keep"));
        assert!(cancelled.is_some());
        assert!(session.cancel_tracking(&ms1(), &ModelPath::new("/keep")).is_none());
        assert!(session.registry().ledger.is_empty());
    }
}
