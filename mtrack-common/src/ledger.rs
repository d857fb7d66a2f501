//! In-memory record of successful mutating model commands.
//!
//! The ledger never talks to the network. Cleanup consumes it through
//! [`prune_redundant_ancestors`] and [`plan_removals`].

use crate::command::{Kind, ModelCommand, ModelPath};
use crate::errors::{TrackerError, TrackerResult};
use crate::types::{Credentials, EndpointId, Transport};
use serde::Serialize;
use tracing::debug;

/// One successful mutating action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// Insertion order; assigned by [`Ledger::record`].
    pub sequence: u64,
    pub endpoint: EndpointId,
    /// The exact command string executed.
    pub command: String,
    #[serde(skip)]
    pub model: ModelCommand,
    #[serde(skip)]
    pub credentials: Option<Credentials>,
    pub transport: Transport,
    pub privileged: bool,
    pub kind: Kind,
    pub target_path: ModelPath,
    /// Name of a tagged snapshot, for `-n` snapshot commands.
    pub snapshot_name: Option<String>,
}

impl LedgerEntry {
    /// Build an entry for a tracked command; `None` when the command has no
    /// ledger kind.
    pub fn new(endpoint: EndpointId, model: ModelCommand, command: impl Into<String>) -> Option<Self> {
        let kind = model.classify()?;
        let target_path = model.target_path();
        let snapshot_name = model.tagged_snapshot().1.map(str::to_string);
        Some(Self {
            sequence: 0,
            endpoint,
            command: command.into(),
            model,
            credentials: None,
            transport: Transport::Any,
            privileged: false,
            kind,
            target_path,
            snapshot_name,
        })
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    #[must_use]
    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    /// Cleanup reverses this entry with a `remove`.
    pub fn is_undoable(&self) -> bool {
        matches!(self.kind, Kind::CreateOrLink | Kind::Inherit)
    }
}

/// What [`Ledger::record`] did with an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Stored,
    /// A removal cancelled an earlier create; nothing was stored.
    Cancelled(Box<LedgerEntry>),
}

/// Ordered ledger with a separate sub-ledger for inherits.
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    main: Vec<LedgerEntry>,
    inherited: Vec<LedgerEntry>,
    next_sequence: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a successful command.
    ///
    /// A `Remove` first cancels the latest create of the same path on the
    /// same endpoint; when it does, the removal itself is not stored. A
    /// snapshot removal likewise cancels the latest matching snapshot
    /// creation.
    pub fn record(&mut self, mut entry: LedgerEntry) -> TrackerResult<Recorded> {
        if entry.target_path.is_empty() {
            return Err(TrackerError::InvalidEntry(format!(
                "empty target path for '{}'",
                entry.command
            )));
        }

        match (&entry.kind, &entry.model) {
            (Kind::Remove, _) => {
                if let Some(cancelled) = self.cancel_by_path(&entry.endpoint, &entry.target_path) {
                    return Ok(Recorded::Cancelled(Box::new(cancelled)));
                }
            }
            (Kind::Snapshot, ModelCommand::RemoveSnapshot { name }) => {
                if let Some(cancelled) = self.cancel_snapshot(&entry.endpoint, name.as_deref()) {
                    return Ok(Recorded::Cancelled(Box::new(cancelled)));
                }
            }
            _ => {}
        }

        entry.sequence = self.next_sequence;
        self.next_sequence += 1;
        debug!(
            endpoint = %entry.endpoint,
            kind = %entry.kind,
            path = %entry.target_path,
            sequence = entry.sequence,
            "ledger record"
        );

        if entry.kind == Kind::Inherit {
            self.inherited.push(entry);
        } else {
            self.main.push(entry);
        }
        Ok(Recorded::Stored)
    }

    /// Remove the most recent create/link/inherit of exactly `path` on
    /// `endpoint`, searching both sub-ledgers.
    pub fn cancel_by_path(&mut self, endpoint: &EndpointId, path: &ModelPath) -> Option<LedgerEntry> {
        let matches = |e: &LedgerEntry| e.is_undoable() && &e.endpoint == endpoint && &e.target_path == path;

        let in_main = self.main.iter().rposition(matches);
        let in_inherited = self.inherited.iter().rposition(matches);

        let cancelled = match (in_main, in_inherited) {
            (Some(m), Some(i)) if self.inherited[i].sequence > self.main[m].sequence => {
                self.inherited.remove(i)
            }
            (Some(m), _) => self.main.remove(m),
            (None, Some(i)) => self.inherited.remove(i),
            (None, None) => return None,
        };
        debug!(
            endpoint = %endpoint,
            path = %path,
            sequence = cancelled.sequence,
            "ledger entry cancelled"
        );
        Some(cancelled)
    }

    /// Remove the most recent snapshot creation with the given tag.
    pub fn cancel_snapshot(&mut self, endpoint: &EndpointId, name: Option<&str>) -> Option<LedgerEntry> {
        let index = self.main.iter().rposition(|e| {
            &e.endpoint == endpoint
                && matches!(&e.model, ModelCommand::CreateSnapshot { name: n } if n.as_deref() == name)
        })?;
        Some(self.main.remove(index))
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.main
    }

    pub fn inherited(&self) -> &[LedgerEntry] {
        &self.inherited
    }

    pub fn len(&self) -> usize {
        self.main.len() + self.inherited.len()
    }

    pub fn is_empty(&self) -> bool {
        self.main.is_empty() && self.inherited.is_empty()
    }

    /// Endpoints with at least one entry of any of `kinds`, in first-seen order.
    pub fn endpoints_with(&self, kinds: &[Kind]) -> Vec<EndpointId> {
        let mut seen = Vec::new();
        for entry in self.main.iter().chain(self.inherited.iter()) {
            if kinds.contains(&entry.kind) && !seen.contains(&entry.endpoint) {
                seen.push(entry.endpoint.clone());
            }
        }
        seen
    }

    /// Tagged snapshots created on `endpoint` and not removed, oldest first.
    pub fn outstanding_tagged_snapshots(&self, endpoint: &EndpointId) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for entry in &self.main {
            if &entry.endpoint == endpoint
                && matches!(entry.model, ModelCommand::CreateSnapshot { .. })
                && let Some(name) = &entry.snapshot_name
                && !names.contains(name)
            {
                names.push(name.clone());
            }
        }
        names
    }

    /// Hand both sub-ledgers to cleanup, leaving this ledger empty.
    pub fn take(&mut self) -> (Vec<LedgerEntry>, Vec<LedgerEntry>) {
        (
            std::mem::take(&mut self.main),
            std::mem::take(&mut self.inherited),
        )
    }
}

/// Drop every entry whose target path lies strictly below the path of an
/// undoable (create/link/inherit) entry on the same endpoint. Survivor
/// order is preserved.
///
/// Only undoable entries prune: an export, plan run, snapshot or stored
/// foreign removal is never reversed, so it removes nothing below it.
pub fn prune_redundant_ancestors(entries: &[LedgerEntry]) -> Vec<LedgerEntry> {
    entries
        .iter()
        .filter(|candidate| {
            !entries.iter().any(|other| {
                other.is_undoable()
                    && other.endpoint == candidate.endpoint
                    && other.target_path.is_strict_ancestor_of(&candidate.target_path)
            })
        })
        .cloned()
        .collect()
}

/// A single undo command derived from a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoStep {
    pub endpoint: EndpointId,
    pub command: ModelCommand,
    /// Kind of the entry being undone.
    pub undoes: Kind,
    pub credentials: Option<Credentials>,
    pub transport: Transport,
    pub privileged: bool,
}

/// Undo steps for both sub-ledgers.
///
/// Both lists are pruned independently. All inherit undos come first,
/// then create/link undos; within each group endpoints appear in order of
/// first appearance and entries are reversed per endpoint. A path is
/// removed at most once per endpoint and group.
pub fn plan_removals(main: &[LedgerEntry], inherited: &[LedgerEntry]) -> Vec<UndoStep> {
    let mut steps = Vec::new();
    steps.extend(reverse_by_endpoint(&prune_redundant_ancestors(inherited)));
    steps.extend(reverse_by_endpoint(&prune_redundant_ancestors(main)));
    steps
}

fn reverse_by_endpoint(entries: &[LedgerEntry]) -> Vec<UndoStep> {
    let mut order: Vec<&EndpointId> = Vec::new();
    for entry in entries {
        if !order.contains(&&entry.endpoint) {
            order.push(&entry.endpoint);
        }
    }

    let mut steps = Vec::new();
    for endpoint in order {
        let mut emitted: Vec<&ModelPath> = Vec::new();
        for entry in entries.iter().rev().filter(|e| &e.endpoint == endpoint) {
            let Some(command) = entry.model.invert() else {
                continue;
            };
            if emitted.contains(&&entry.target_path) {
                continue;
            }
            emitted.push(&entry.target_path);
            steps.push(UndoStep {
                endpoint: entry.endpoint.clone(),
                command,
                undoes: entry.kind,
                credentials: entry.credentials.clone(),
                transport: entry.transport,
                privileged: entry.privileged,
            });
        }
    }
    steps
}
