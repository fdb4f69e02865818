//! Migration status tracking

use crate::migration::{Changeset, ChangesetRecord};
use std::fmt;

/// Why a declared changeset is selected for the next run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingReason {
    /// Never applied
    New,
    /// `run_on_change` and its queries changed since it was applied
    Changed,
    /// `run_always`
    RunAlways,
}

impl fmt::Display for PendingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PendingReason::New => "new",
            PendingReason::Changed => "changed",
            PendingReason::RunAlways => "run-always",
        })
    }
}

/// A changeset the next run would execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChangeset {
    pub id: String,
    pub author: String,
    pub checksum: String,
    pub reason: PendingReason,
}

impl PendingChangeset {
    /// Describe `changeset` given the persisted history
    #[must_use]
    pub fn new(changeset: &Changeset, persisted: &[Changeset]) -> Self {
        let reason = match persisted.iter().find(|p| p.same_identity(changeset)) {
            None => PendingReason::New,
            Some(applied) if changeset.run_on_change() && applied.checksum() != changeset.checksum() => {
                PendingReason::Changed
            }
            Some(_) => PendingReason::RunAlways,
        };
        Self {
            id: changeset.id().to_string(),
            author: changeset.author().to_string(),
            checksum: changeset.checksum().to_string(),
            reason,
        }
    }
}

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Applied changesets (from the state graph), in execution order
    pub applied: Vec<ChangesetRecord>,

    /// Changesets the next run would execute, in declaration order
    pub pending: Vec<PendingChangeset>,

    /// Number of applied changesets
    pub applied_count: usize,

    /// Number of pending changesets
    pub pending_count: usize,
}

impl MigrationStatus {
    /// Create a new `MigrationStatus`
    #[must_use]
    pub fn new(applied: Vec<ChangesetRecord>, pending: Vec<PendingChangeset>) -> Self {
        let applied_count = applied.len();
        let pending_count = pending.len();

        Self {
            applied,
            pending,
            applied_count,
            pending_count,
        }
    }

    /// Check if nothing is left to run
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.pending_count == 0
    }

    /// Get the highest recorded `order`
    #[must_use]
    pub fn latest_applied_order(&self) -> Option<i64> {
        self.applied.iter().map(|r| r.order).max()
    }

    /// Get the id of the next changeset to run
    #[must_use]
    pub fn next_pending_id(&self) -> Option<&str> {
        self.pending.first().map(|p| p.id.as_str())
    }
}
