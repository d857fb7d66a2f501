//! Everything a test asked cleanup to undo.

use crate::backup::{FileBackup, PathBackup, RestoreTiming};
use crate::command::ModelPath;
use crate::ledger::Ledger;
use crate::types::EndpointId;
use serde::Serialize;
use std::fmt;

/// Something that must be gone once cleanup has finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum Artifact {
    Model(ModelPath),
    File(String),
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model(path) => write!(f, "model path {path}"),
            Self::File(path) => write!(f, "file {path}"),
        }
    }
}

/// Ledger plus every side-effect list a session accumulates.
///
/// Lists keep insertion order and drop exact duplicates.
#[derive(Debug, Default)]
pub struct CleanupRegistry {
    pub ledger: Ledger,
    pub(crate) path_backups: Vec<PathBackup>,
    pub(crate) file_backups: Vec<FileBackup>,
    pub(crate) stopped_services: Vec<(EndpointId, String)>,
    pub(crate) users: Vec<(EndpointId, String)>,
    pub(crate) files: Vec<(EndpointId, String)>,
    pub(crate) packages: Vec<(EndpointId, String)>,
    pub(crate) paused_convergence: Vec<EndpointId>,
    pub(crate) must_not_exist: Vec<(EndpointId, Artifact)>,
    pub(crate) convergence_pending: bool,
}

pub(super) fn push_unique<T: PartialEq>(list: &mut Vec<T>, item: T) -> bool {
    if list.contains(&item) {
        return false;
    }
    list.push(item);
    true
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a path backup. Returns `false` (and keeps the older one) when
    /// the path already has a backup.
    pub fn add_path_backup(&mut self, backup: PathBackup) -> bool {
        if self.has_path_backup(&backup.endpoint, &backup.path) {
            return false;
        }
        self.path_backups.push(backup);
        true
    }

    pub fn has_path_backup(&self, endpoint: &EndpointId, path: &ModelPath) -> bool {
        self.path_backups
            .iter()
            .any(|b| &b.endpoint == endpoint && &b.path == path)
    }

    /// Remove and return the backup of `path`, for a manual restore.
    pub fn take_path_backup(&mut self, endpoint: &EndpointId, path: &ModelPath) -> Option<PathBackup> {
        let index = self
            .path_backups
            .iter()
            .position(|b| &b.endpoint == endpoint && &b.path == path)?;
        Some(self.path_backups.remove(index))
    }

    pub fn path_backups(&self) -> &[PathBackup] {
        &self.path_backups
    }

    pub fn add_file_backup(&mut self, backup: FileBackup) {
        self.file_backups.push(backup);
    }

    pub fn file_backups(&self) -> &[FileBackup] {
        &self.file_backups
    }

    pub(crate) fn take_file_backups(&mut self, timing: RestoreTiming) -> Vec<FileBackup> {
        let (taken, kept) = std::mem::take(&mut self.file_backups)
            .into_iter()
            .partition(|b| b.restore_timing == timing);
        self.file_backups = kept;
        taken
    }

    pub fn add_stopped_service(&mut self, endpoint: EndpointId, service: impl Into<String>) -> bool {
        push_unique(&mut self.stopped_services, (endpoint, service.into()))
    }

    pub fn stopped_services(&self) -> &[(EndpointId, String)] {
        &self.stopped_services
    }

    pub fn add_user(&mut self, endpoint: EndpointId, user: impl Into<String>) -> bool {
        push_unique(&mut self.users, (endpoint, user.into()))
    }

    pub fn users(&self) -> &[(EndpointId, String)] {
        &self.users
    }

    pub fn add_file(&mut self, endpoint: EndpointId, path: impl Into<String>) -> bool {
        push_unique(&mut self.files, (endpoint, path.into()))
    }

    pub fn files(&self) -> &[(EndpointId, String)] {
        &self.files
    }

    pub fn add_package(&mut self, endpoint: EndpointId, package: impl Into<String>) -> bool {
        push_unique(&mut self.packages, (endpoint, package.into()))
    }

    pub fn packages(&self) -> &[(EndpointId, String)] {
        &self.packages
    }

    pub fn add_paused_convergence(&mut self, endpoint: EndpointId) -> bool {
        push_unique(&mut self.paused_convergence, endpoint)
    }

    pub fn paused_convergence(&self) -> &[EndpointId] {
        &self.paused_convergence
    }

    pub fn expect_absent(&mut self, endpoint: EndpointId, artifact: Artifact) -> bool {
        push_unique(&mut self.must_not_exist, (endpoint, artifact))
    }

    pub fn must_not_exist(&self) -> &[(EndpointId, Artifact)] {
        &self.must_not_exist
    }

    pub fn set_convergence_pending(&mut self) {
        self.convergence_pending = true;
    }

    pub fn convergence_pending(&self) -> bool {
        self.convergence_pending
    }

    /// `true` when cleanup would have nothing to do.
    pub fn is_empty(&self) -> bool {
        self.ledger.is_empty()
            && self.path_backups.is_empty()
            && self.file_backups.is_empty()
            && self.stopped_services.is_empty()
            && self.users.is_empty()
            && self.files.is_empty()
            && self.packages.is_empty()
            && self.paused_convergence.is_empty()
            && self.must_not_exist.is_empty()
            && !self.convergence_pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::PropertyMap;

    fn ep(id: &str) -> EndpointId {
        EndpointId::new(id)
    }

    #[test]
    fn test_one_backup_per_path() {
        let mut registry = CleanupRegistry::new();
        let first = PathBackup {
            endpoint: ep("ms1"),
            path: ModelPath::new("/a"),
            properties: PropertyMap::new(),
        };
        let mut second = first.clone();
        second
            .properties
            .insert("k".into(), crate::properties::PropertyValue::local("v"));

        assert!(registry.add_path_backup(first.clone()));
        assert!(!registry.add_path_backup(second));
        assert_eq!(registry.path_backups(), &[first.clone()]);

        let other_endpoint = PathBackup {
            endpoint: ep("node1"),
            ..first.clone()
        };
        assert!(registry.add_path_backup(other_endpoint));

        assert_eq!(registry.take_path_backup(&ep("ms1"), &ModelPath::new("/a")), Some(first));
        assert!(!registry.has_path_backup(&ep("ms1"), &ModelPath::new("/a")));
    }

    #[test]
    fn test_side_effect_lists_dedupe() {
        let mut registry = CleanupRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.add_user(ep("ms1"), "bob"));
        assert!(!registry.add_user(ep("ms1"), "bob"));
        assert!(registry.add_user(ep("node1"), "bob"));
        assert!(registry.add_package(ep("ms1"), "pkg-a"));
        assert!(registry.expect_absent(ep("ms1"), Artifact::File("/tmp/x".into())));
        assert!(!registry.expect_absent(ep("ms1"), Artifact::File("/tmp/x".into())));
        assert_eq!(registry.users().len(), 2);
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_take_file_backups_by_timing() {
        let mut registry = CleanupRegistry::new();
        for (path, timing) in [
            ("/a", RestoreTiming::BeforeCleanupPlan),
            ("/b", RestoreTiming::AfterCleanupPlan),
            ("/c", RestoreTiming::BeforeCleanupPlan),
        ] {
            registry.add_file_backup(FileBackup::new(ep("ms1"), path, "/tmp/h", false, timing));
        }

        let before = registry.take_file_backups(RestoreTiming::BeforeCleanupPlan);
        let originals: Vec<&str> = before.iter().map(|b| b.original_path.as_str()).collect();
        assert_eq!(originals, vec!["/a", "/c"]);
        assert_eq!(registry.file_backups().len(), 1);
        assert_eq!(registry.file_backups()[0].original_path, "/b");
    }
}
