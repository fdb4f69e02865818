//! In-process migration execution helpers

use crate::config::MigrationConfig;
use crate::connection::{connect, Neo4jConnector};
use crate::executor::{Connector, GraphConnection};
use crate::migration::{Changeset, MigrationError, MigrationLock, MigrationReport, Migrator};
use std::sync::Arc;

/// Supplies the parsed changelog
///
/// `changelog` is the master changelog identity from the configuration; its
/// meaning (a path, a resource name, a key) is up to the implementation.
/// Closures `Fn(&str) -> Result<Vec<Changeset>, MigrationError>` implement it.
pub trait ChangelogSource {
    /// Load the declared changesets, in declaration order
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Changelog` if the changelog cannot be read or parsed.
    fn load(&self, changelog: &str) -> Result<Vec<Changeset>, MigrationError>;
}

impl<F> ChangelogSource for F
where
    F: Fn(&str) -> Result<Vec<Changeset>, MigrationError>,
{
    fn load(&self, changelog: &str) -> Result<Vec<Changeset>, MigrationError> {
        self(changelog)
    }
}

/// Run migrations on application startup
///
/// Connects to the configured database, loads the changelog from `source` and
/// runs it. It handles:
/// - Changelog validation (nothing runs if the changelog is malformed)
/// - Lock acquisition (prevents concurrent execution in multi-instance deployments)
/// - History consistency checks (applied changesets must not have changed)
/// - Changeset execution, or dry-run output when configured
///
/// # Arguments
///
/// * `config` - Connection parameters, changelog identity, contexts and mode
/// * `source` - Where the changelog comes from
///
/// # Returns
///
/// A [`MigrationReport`] counting executed, marked-as-executed and skipped changesets.
///
/// # Errors
///
/// Returns `MigrationError` if the database is unreachable, the changelog is
/// invalid, the lock is held elsewhere, or a changeset fails.
///
/// # Example
///
/// ```rust,no_run
/// use graphguard::migration::{run_migrations, Changeset, MigrationError};
/// use graphguard::MigrationConfig;
///
/// fn changelog(_: &str) -> Result<Vec<Changeset>, MigrationError> {
///     Ok(vec![Changeset::builder("hello-world", "fbiville")
///         .query("CREATE (:Sentence {text: 'Hello world!'})")
///         .build()?])
/// }
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = MigrationConfig::load()?;
///     let report = run_migrations(&config, &changelog)?;
///     println!("{} changeset(s) executed", report.executed());
///     Ok(())
/// }
/// ```
pub fn run_migrations(
    config: &MigrationConfig,
    source: &dyn ChangelogSource,
) -> Result<MigrationReport, MigrationError> {
    let connection = connect(&config.database)?;
    let connector = Arc::new(Neo4jConnector::new(config.database.clone()));
    run_migrations_with(config, source, &connection, connector)
}

/// Run migrations over an existing connection
///
/// `connector` opens fresh connections for the lock's release retry.
///
/// # Errors
///
/// Same as [`run_migrations`], minus connection failures.
pub fn run_migrations_with(
    config: &MigrationConfig,
    source: &dyn ChangelogSource,
    connection: &dyn GraphConnection,
    connector: Arc<dyn Connector>,
) -> Result<MigrationReport, MigrationError> {
    let declared = source.load(&config.migration.changelog)?;
    log::debug!(
        "Loaded {} changeset(s) from {}",
        declared.len(),
        config.migration.changelog
    );

    let lock = MigrationLock::new(connector);
    let report = Migrator::from_config(config).run(connection, &lock, &declared)?;

    if report.executed() > 0 || report.marked_as_executed() > 0 {
        log::info!(
            "Applied {} changeset(s) on startup",
            report.executed() + report.marked_as_executed()
        );
    } else {
        log::debug!("No pending changesets to apply");
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunMode;
    use crate::test_helpers::InMemoryGraph;

    struct Fixed(Vec<Changeset>);

    impl ChangelogSource for Fixed {
        fn load(&self, _changelog: &str) -> Result<Vec<Changeset>, MigrationError> {
            Ok(self.0.clone())
        }
    }

    fn changeset(id: &str, query: &str) -> Changeset {
        Changeset::builder(id, "fbiville").query(query).build().unwrap()
    }

    #[test]
    fn test_run_migrations_with_source() {
        let graph = InMemoryGraph::new();
        let source = Fixed(vec![changeset("a", "CREATE (:A)"), changeset("b", "CREATE (:B)")]);

        let report = run_migrations_with(
            &MigrationConfig::default(),
            &source,
            &graph.connection(),
            graph.connector(),
        )
        .unwrap();

        assert_eq!(report.executed(), 2);
        assert_eq!(graph.state().changelog.len(), 2);
    }

    #[test]
    fn test_closure_source_receives_changelog_identity() {
        let graph = InMemoryGraph::new();
        let mut config = MigrationConfig::default();
        config.migration.changelog = "db/master.toml".to_string();

        let source = |changelog: &str| -> Result<Vec<Changeset>, MigrationError> {
            assert_eq!(changelog, "db/master.toml");
            Ok(vec![changeset("a", "CREATE (:A)")])
        };

        let report = run_migrations_with(&config, &source, &graph.connection(), graph.connector()).unwrap();
        assert_eq!(report.executed(), 1);
    }

    #[test]
    fn test_source_errors_propagate() {
        let graph = InMemoryGraph::new();
        let source = |_: &str| -> Result<Vec<Changeset>, MigrationError> {
            Err(MigrationError::Changelog("missing file".to_string()))
        };

        let err = run_migrations_with(
            &MigrationConfig::default(),
            &source,
            &graph.connection(),
            graph.connector(),
        )
        .unwrap_err();

        assert!(matches!(err, MigrationError::Changelog(_)));
        assert!(graph.statements().is_empty());
    }

    #[test]
    fn test_config_contexts_and_mode_apply() {
        let dir = tempfile::tempdir().unwrap();
        let graph = InMemoryGraph::new();
        let mut config = MigrationConfig::default();
        config.migration.execution_contexts = vec!["test".to_string()];
        config.migration.mode = RunMode::DryRun;
        config.migration.dry_run_output = dir.path().to_path_buf();

        let source = Fixed(vec![
            Changeset::builder("prod", "fbiville").query("CREATE (:Prod)").context("prod").build().unwrap(),
            Changeset::builder("test", "fbiville").query("CREATE (:Test)").context("test").build().unwrap(),
        ]);

        let report = run_migrations_with(&config, &source, &graph.connection(), graph.connector()).unwrap();

        assert!(report.dry_run);
        assert_eq!(report.executed(), 1);
        let output = std::fs::read_to_string(dir.path().join("output.cypher")).unwrap();
        assert!(output.contains("CREATE (:Test)"));
        assert!(!output.contains("CREATE (:Prod)"));
    }
}
