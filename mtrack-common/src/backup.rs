//! Property and file backups taken during a test.

use crate::command::{ModelCommand, ModelPath};
use crate::properties::PropertyMap;
use crate::types::EndpointId;
use crate::util::shell_quote;
use serde::{Deserialize, Serialize};

/// Property set of one model path captured mid-test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathBackup {
    pub endpoint: EndpointId,
    pub path: ModelPath,
    pub properties: PropertyMap,
}

/// One property-level restore action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RestoreOp {
    /// Key added since the backup.
    Delete { key: String },
    /// Key whose local value changed.
    Update { key: String, value: String },
    /// Originally inherited key that now carries a local override.
    ClearOverride { key: String },
    /// Key removed since the backup.
    AddBack { key: String, value: String },
}

impl RestoreOp {
    pub fn key(&self) -> &str {
        match self {
            Self::Delete { key }
            | Self::Update { key, .. }
            | Self::ClearOverride { key }
            | Self::AddBack { key, .. } => key,
        }
    }

    /// The `update` command performing this action on `path`.
    pub fn to_command(&self, path: &ModelPath) -> ModelCommand {
        match self {
            Self::Delete { key } | Self::ClearOverride { key } => ModelCommand::Update {
                path: path.clone(),
                set: Vec::new(),
                delete: vec![key.clone()],
            },
            Self::Update { key, value } | Self::AddBack { key, value } => ModelCommand::Update {
                path: path.clone(),
                set: vec![(key.clone(), value.clone())],
                delete: Vec::new(),
            },
        }
    }
}

/// Actions needed to return a path to its backed-up properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestorePlan {
    pub ops: Vec<RestoreOp>,
    /// Keys that cannot be restored directly, with the reason.
    pub skipped: Vec<(String, &'static str)>,
}

impl PathBackup {
    /// Diff `current` against the backup.
    ///
    /// Ops come out as deletes, then updates and override clears, then
    /// add-backs, each group in key order.
    pub fn restore_plan(&self, current: &PropertyMap) -> RestorePlan {
        let mut deletes = Vec::new();
        let mut updates = Vec::new();
        let mut add_backs = Vec::new();
        let mut skipped = Vec::new();

        for (key, now) in current {
            if self.properties.contains_key(key) {
                continue;
            }
            if now.inherited {
                skipped.push((key.clone(), "inherited value appeared since backup"));
            } else {
                deletes.push(RestoreOp::Delete { key: key.clone() });
            }
        }

        for (key, before) in &self.properties {
            match current.get(key) {
                Some(now) if now == before => {}
                Some(now) if before.inherited => {
                    if now.inherited {
                        skipped.push((key.clone(), "inherited source value changed"));
                    } else {
                        updates.push(RestoreOp::ClearOverride { key: key.clone() });
                    }
                }
                Some(_) => updates.push(RestoreOp::Update {
                    key: key.clone(),
                    value: before.value.clone(),
                }),
                None if before.inherited => {
                    skipped.push((key.clone(), "inherited value cannot be added back"));
                }
                None => add_backs.push(RestoreOp::AddBack {
                    key: key.clone(),
                    value: before.value.clone(),
                }),
            }
        }

        let mut ops = deletes;
        ops.extend(updates);
        ops.extend(add_backs);
        RestorePlan { ops, skipped }
    }
}

/// When a relocated file is moved back during cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreTiming {
    BeforeCleanupPlan,
    AfterCleanupPlan,
}

/// A file or directory moved aside to a holding location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileBackup {
    pub endpoint: EndpointId,
    pub original_path: String,
    pub holding_path: String,
    pub delete_original_first: bool,
    pub restore_timing: RestoreTiming,
}

impl FileBackup {
    /// Allocate a unique holding path under `holding_dir`.
    pub fn new(
        endpoint: EndpointId,
        original_path: &str,
        holding_dir: &str,
        delete_original_first: bool,
        restore_timing: RestoreTiming,
    ) -> Self {
        let basename = original_path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("root");
        let holding_path = format!(
            "{}/{}.{}",
            holding_dir.trim_end_matches('/'),
            basename,
            uuid::Uuid::new_v4()
        );
        Self {
            endpoint,
            original_path: original_path.to_string(),
            holding_path,
            delete_original_first,
            restore_timing,
        }
    }

    /// Shell command that moves the original into the holding location.
    pub fn backup_command(&self) -> String {
        let dir = self
            .holding_path
            .rsplit_once('/')
            .map_or("/", |(dir, _)| if dir.is_empty() { "/" } else { dir });
        format!(
            "mkdir -p {} && mv {} {}",
            shell_quote(dir),
            shell_quote(&self.original_path),
            shell_quote(&self.holding_path)
        )
    }

    /// Commands that put the original back, in order.
    pub fn restore_commands(&self) -> Vec<String> {
        let mut commands = Vec::new();
        if self.delete_original_first {
            commands.push(format!("rm -rf {}", shell_quote(&self.original_path)));
        }
        commands.push(format!(
            "mv {} {}",
            shell_quote(&self.holding_path),
            shell_quote(&self.original_path)
        ));
        commands
    }
}
