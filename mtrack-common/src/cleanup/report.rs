//! Cleanup outcome reporting.

use crate::errors::ErrorCode;
use crate::types::EndpointId;
use serde::Serialize;
use std::fmt;

/// Cleanup phases, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStep {
    RestartServices,
    PruneLedger,
    RestoreProperties,
    StopPlans,
    RemoveItems,
    DeleteUsersAndFiles,
    RestoreFilesBeforePlan,
    RunCleanupPlans,
    RemoveSnapshots,
    AwaitConvergence,
    RestoreFilesAfterPlan,
    CheckLeftovers,
    UninstallPackages,
}

impl CleanupStep {
    pub const ALL: [CleanupStep; 13] = [
        Self::RestartServices,
        Self::PruneLedger,
        Self::RestoreProperties,
        Self::StopPlans,
        Self::RemoveItems,
        Self::DeleteUsersAndFiles,
        Self::RestoreFilesBeforePlan,
        Self::RunCleanupPlans,
        Self::RemoveSnapshots,
        Self::AwaitConvergence,
        Self::RestoreFilesAfterPlan,
        Self::CheckLeftovers,
        Self::UninstallPackages,
    ];

    /// 1-based position in the cleanup sequence.
    pub fn number(self) -> usize {
        self as usize + 1
    }
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RestartServices => "restart_services",
            Self::PruneLedger => "prune_ledger",
            Self::RestoreProperties => "restore_properties",
            Self::StopPlans => "stop_plans",
            Self::RemoveItems => "remove_items",
            Self::DeleteUsersAndFiles => "delete_users_and_files",
            Self::RestoreFilesBeforePlan => "restore_files_before_plan",
            Self::RunCleanupPlans => "run_cleanup_plans",
            Self::RemoveSnapshots => "remove_snapshots",
            Self::AwaitConvergence => "await_convergence",
            Self::RestoreFilesAfterPlan => "restore_files_after_plan",
            Self::CheckLeftovers => "check_leftovers",
            Self::UninstallPackages => "uninstall_packages",
        };
        write!(f, "{}:{}", self.number(), name)
    }
}

/// One failure collected during cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    pub step: CleanupStep,
    pub endpoint: Option<EndpointId>,
    pub code: ErrorCode,
    pub detail: String,
}

impl fmt::Display for CleanupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] step {}", self.code.code_string(), self.step)?;
        if let Some(endpoint) = &self.endpoint {
            write!(f, " on {endpoint}")?;
        }
        write!(f, ": {}", self.detail)
    }
}

/// Everything cleanup did and everything that went wrong.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub steps_run: Vec<CleanupStep>,
    /// Commands sent by cleanup steps; plan monitor traffic is not counted.
    pub commands_issued: usize,
    pub failures: Vec<CleanupFailure>,
    /// Waits that did not settle; recorded without failing the run.
    pub unstable: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn is_stable(&self) -> bool {
        self.unstable.is_empty()
    }

    pub fn failures_in(&self, step: CleanupStep) -> impl Iterator<Item = &CleanupFailure> {
        self.failures.iter().filter(move |f| f.step == step)
    }

    /// Multi-line summary used in the aggregate error.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} step(s), {} command(s), {} failure(s), {} unstable wait(s)",
            self.steps_run.len(),
            self.commands_issued,
            self.failures.len(),
            self.unstable.len()
        );
        for failure in &self.failures {
            out.push_str("\n  - ");
            out.push_str(&failure.to_string());
        }
        for note in &self.unstable {
            out.push_str("\n  ~ ");
            out.push_str(note);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_numbering_matches_order() {
        for (index, step) in CleanupStep::ALL.iter().enumerate() {
            assert_eq!(step.number(), index + 1);
        }
        assert_eq!(CleanupStep::RemoveItems.to_string(), "5:remove_items");
    }

    #[test]
    fn test_summary_lists_failures() {
        let report = CleanupReport {
            steps_run: CleanupStep::ALL.to_vec(),
            commands_issued: 4,
            failures: vec![CleanupFailure {
                step: CleanupStep::CheckLeftovers,
                endpoint: Some(EndpointId::new("ms1")),
                code: ErrorCode::CleanupLeftoverArtifact,
                detail: "/x still exists".to_string(),
            }],
            unstable: vec!["plan wait on node1 timed out".to_string()],
        };
        let summary = report.summary();
        assert!(summary.contains("1 failure(s)"));
        assert!(summary.contains("MTR-E407"));
        assert!(summary.contains("on ms1"));
        assert!(summary.contains("~ plan wait"));
        assert!(!report.is_clean());
        assert!(!report.is_stable());
    }
}
