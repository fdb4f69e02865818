//! Migrator - Core migration execution engine

use crate::config::{ExecutionMode, MigrationConfig};
use crate::executor::GraphConnection;
use crate::migration::declared_validator::ensure_declared_valid;
use crate::migration::diff::diff;
use crate::migration::persisted_validator::ensure_persisted_consistent;
use crate::migration::record::read_records;
use crate::migration::writer::{ChangelogWriter, FileChangelogWriter, GraphChangelogWriter, WriteReport};
use crate::migration::{
    Changeset, ChangesetRecord, ExecutionContexts, MigrationError, MigrationLock, MigrationStatus,
    PendingChangeset,
};

/// Result of one migration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Number of declared changesets
    pub declared: usize,
    /// Number of changesets already recorded before the run
    pub persisted: usize,
    /// What the writer did with the pending changesets
    pub written: WriteReport,
    pub dry_run: bool,
}

impl MigrationReport {
    /// Changesets whose queries ran (or were printed, in dry-run mode)
    #[must_use]
    pub fn executed(&self) -> usize {
        self.written.executed.len()
    }

    #[must_use]
    pub fn marked_as_executed(&self) -> usize {
        self.written.marked_as_executed.len()
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.written.skipped.len()
    }
}

/// Core migration execution engine
///
/// The `Migrator` validates the declared changelog, takes the lock, checks the
/// declared changelog against persisted history, computes the pending
/// changesets and hands them to the writer selected by the execution mode.
#[derive(Debug, Clone)]
pub struct Migrator {
    contexts: ExecutionContexts,
    mode: ExecutionMode,
}

impl Migrator {
    /// Create a new Migrator
    #[must_use]
    pub fn new(contexts: ExecutionContexts, mode: ExecutionMode) -> Self {
        Self { contexts, mode }
    }

    /// Create a Migrator from the `[migration]` configuration
    #[must_use]
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self::new(
            ExecutionContexts::new(&config.migration.execution_contexts),
            config.execution_mode(),
        )
    }

    #[must_use]
    pub fn contexts(&self) -> &ExecutionContexts {
        &self.contexts
    }

    #[must_use]
    pub fn mode(&self) -> &ExecutionMode {
        &self.mode
    }

    fn writer(&self) -> Box<dyn ChangelogWriter> {
        match &self.mode {
            ExecutionMode::Run => Box::new(GraphChangelogWriter::new()),
            ExecutionMode::DryRun { output_directory } => Box::new(FileChangelogWriter::new(output_directory.clone())),
        }
    }

    /// Apply the declared changelog
    ///
    /// # Arguments
    ///
    /// * `connection` - Connection to the target database
    /// * `lock` - Lock guarding this run; held for its whole duration
    /// * `declared` - Parsed changelog, in declaration order
    ///
    /// # Returns
    ///
    /// A report of what was executed, marked as executed or skipped.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Validation` before any mutation when the
    /// changelog is malformed or inconsistent with history,
    /// `MigrationError::LockUnavailable` when another run holds the lock, and
    /// the writer's error when a changeset fails.
    pub fn run(
        &self,
        connection: &dyn GraphConnection,
        lock: &MigrationLock,
        declared: &[Changeset],
    ) -> Result<MigrationReport, MigrationError> {
        ensure_declared_valid(declared)?;

        let guard = lock.acquire(connection)?;
        let persisted = Self::read_persisted(guard.connection())?;
        ensure_persisted_consistent(declared, &persisted)?;

        let pending = diff(&self.contexts, declared, &persisted);
        log::info!(
            "{} declared, {} persisted, {} pending changeset(s) (contexts: {})",
            declared.len(),
            persisted.len(),
            pending.len(),
            self.contexts
        );

        let written = self.writer().write(guard.connection(), &pending)?;
        guard.release();

        let report = MigrationReport {
            declared: declared.len(),
            persisted: persisted.len(),
            written,
            dry_run: matches!(self.mode, ExecutionMode::DryRun { .. }),
        };
        log::info!(
            "Migration finished: {} executed, {} marked as executed, {} skipped",
            report.executed(),
            report.marked_as_executed(),
            report.skipped()
        );
        Ok(report)
    }

    /// Get migration status (applied vs pending)
    ///
    /// Reads persisted history without taking the lock.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Validation` if the declared changelog is
    /// malformed or inconsistent with history.
    pub fn status(
        &self,
        connection: &dyn GraphConnection,
        declared: &[Changeset],
    ) -> Result<MigrationStatus, MigrationError> {
        ensure_declared_valid(declared)?;

        let records = read_records(connection)?;
        let persisted = Self::to_changesets(&records)?;
        ensure_persisted_consistent(declared, &persisted)?;

        let pending = diff(&self.contexts, declared, &persisted)
            .into_iter()
            .map(|changeset| PendingChangeset::new(changeset, &persisted))
            .collect();

        Ok(MigrationStatus::new(records, pending))
    }

    fn read_persisted(connection: &dyn GraphConnection) -> Result<Vec<Changeset>, MigrationError> {
        Self::to_changesets(&read_records(connection)?)
    }

    fn to_changesets(records: &[ChangesetRecord]) -> Result<Vec<Changeset>, MigrationError> {
        records.iter().map(ChangesetRecord::to_changeset).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{Precondition, PreconditionErrorPolicy, PreconditionQuery};
    use crate::test_helpers::InMemoryGraph;

    fn changeset(id: &str, query: &str) -> Changeset {
        Changeset::builder(id, "fbiville").query(query).build().unwrap()
    }

    fn run_mode() -> Migrator {
        Migrator::new(ExecutionContexts::none(), ExecutionMode::Run)
    }

    #[test]
    fn test_run_applies_pending_and_releases_lock() {
        let graph = InMemoryGraph::new();
        let connection = graph.connection();
        let lock = MigrationLock::new(graph.connector());
        let declared = vec![changeset("a", "CREATE (:A)"), changeset("b", "CREATE (:B)")];

        let report = run_mode().run(&connection, &lock, &declared).unwrap();

        assert_eq!(report.declared, 2);
        assert_eq!(report.persisted, 0);
        assert_eq!(report.executed(), 2);
        assert!(!report.dry_run);
        assert!(graph.state().locks.is_empty());
        assert_eq!(lock.holder_count(), 0);

        // Second run is a no-op
        let report = run_mode().run(&connection, &lock, &declared).unwrap();
        assert_eq!(report.persisted, 2);
        assert_eq!(report.written.total(), 0);
        assert_eq!(graph.count("CREATE (:A)"), 1);
    }

    #[test]
    fn test_reused_id_with_new_author_runs_once() {
        let graph = InMemoryGraph::new();
        graph.seed_changeset(&Changeset::builder("a", "alice").query("CREATE (:X)").build().unwrap());
        let connection = graph.connection();
        let lock = MigrationLock::new(graph.connector());
        let declared = vec![Changeset::builder("a", "bob").query("CREATE (:X)").build().unwrap()];

        for _ in 0..3 {
            run_mode().run(&connection, &lock, &declared).unwrap();
        }

        assert_eq!(graph.count("CREATE (:X)"), 1);
        let state = graph.state();
        assert_eq!(state.changelog.len(), 1);
        assert_eq!(state.changelog[0].author, "bob");
        assert_eq!(state.changelog[0].order, 1);
    }

    #[test]
    fn test_invalid_changelog_never_touches_the_graph() {
        let graph = InMemoryGraph::new();
        let connection = graph.connection();
        let lock = MigrationLock::new(graph.connector());
        let declared = vec![changeset("a", "RETURN 1"), changeset("a", "RETURN 2")];

        let err = run_mode().run(&connection, &lock, &declared).unwrap_err();

        assert!(matches!(err, MigrationError::Validation(ref errors) if errors.len() == 1));
        assert!(graph.statements().is_empty());
    }

    #[test]
    fn test_inconsistent_history_aborts_before_writing() {
        let graph = InMemoryGraph::new();
        graph.seed_changeset(&changeset("a", "RETURN 'old'"));
        let connection = graph.connection();
        let lock = MigrationLock::new(graph.connector());
        let declared = vec![changeset("a", "RETURN 'new'"), changeset("b", "CREATE (:B)")];

        let err = run_mode().run(&connection, &lock, &declared).unwrap_err();

        assert!(matches!(err, MigrationError::Validation(_)));
        assert_eq!(graph.count("CREATE (:B)"), 0);
        // Lock released on the error path too
        assert!(graph.state().locks.is_empty());
    }

    #[test]
    fn test_lock_held_elsewhere_aborts() {
        let graph = InMemoryGraph::new();
        graph.seed_lock("someone-else");
        let connection = graph.connection();
        let lock = MigrationLock::new(graph.connector());

        let err = run_mode()
            .run(&connection, &lock, &[changeset("a", "CREATE (:A)")])
            .unwrap_err();

        assert!(matches!(err, MigrationError::LockUnavailable { .. }));
        assert_eq!(graph.count("CREATE (:A)"), 0);
    }

    #[test]
    fn test_failed_precondition_releases_lock() {
        let graph = InMemoryGraph::new();
        let connection = graph.connection();
        let lock = MigrationLock::new(graph.connector());
        let failing = Changeset::builder("failing", "fbiville")
            .query("CREATE (:Never)")
            .precondition(Precondition::new(
                PreconditionErrorPolicy::Fail,
                PreconditionQuery::simple("RETURN false AS result"),
            ))
            .build()
            .unwrap();

        let err = run_mode()
            .run(&connection, &lock, &[changeset("a", "CREATE (:A)"), failing])
            .unwrap_err();

        assert!(matches!(err, MigrationError::PreconditionNotMet { .. }));
        assert_eq!(graph.state().changelog.len(), 1);
        assert!(graph.state().locks.is_empty());
    }

    #[test]
    fn test_dry_run_does_not_mutate_history() {
        let dir = tempfile::tempdir().unwrap();
        let graph = InMemoryGraph::new();
        let connection = graph.connection();
        let lock = MigrationLock::new(graph.connector());
        let migrator = Migrator::new(
            ExecutionContexts::none(),
            ExecutionMode::DryRun {
                output_directory: dir.path().to_path_buf(),
            },
        );

        let report = migrator
            .run(&connection, &lock, &[changeset("a", "CREATE (:A)")])
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.executed(), 1);
        assert!(graph.state().changelog.is_empty());
        assert_eq!(graph.count("CREATE (:A)"), 0);
        // The lock is still taken while history is read
        assert_eq!(graph.count(crate::migration::state_graph::CREATE_LOCK), 1);
    }

    #[test]
    fn test_status_reports_applied_and_pending() {
        let graph = InMemoryGraph::new();
        graph.seed_changeset(&changeset("a", "RETURN 1"));
        let declared = vec![
            changeset("a", "RETURN 1"),
            changeset("b", "RETURN 2"),
            Changeset::builder("c", "fbiville").query("RETURN 3").context("prod").build().unwrap(),
        ];
        let migrator = Migrator::new(ExecutionContexts::new(["test"]), ExecutionMode::Run);

        let status = migrator.status(&graph.connection(), &declared).unwrap();

        assert_eq!(status.applied_count, 1);
        assert_eq!(status.applied[0].order, 1);
        assert_eq!(status.pending_count, 1);
        assert_eq!(status.next_pending_id(), Some("b"));
        // Status takes no lock
        assert!(graph.count(crate::migration::state_graph::CREATE_LOCK) == 0);
    }
}
