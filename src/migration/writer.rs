//! Changelog writers
//!
//! A [`ChangelogWriter`] consumes the changesets selected by [`diff`](crate::migration::diff::diff).
//! [`GraphChangelogWriter`] applies them to the database and records them in
//! the state graph. [`FileChangelogWriter`] is the dry-run variant: it prints
//! what would run to `output.cypher` and never touches the graph.
//!
//! A changeset's queries run in one transaction and its record is written in
//! a second one, committed right after. Neo4j refuses schema statements and
//! data writes in the same transaction, so index and constraint changesets
//! could not be recorded otherwise. The run as a whole is not atomic: a
//! failure leaves the changesets committed before it in place.

use crate::executor::{GraphConnection, GraphError, GraphExecutor, GraphTransaction, Params};
use crate::migration::precondition::{self, print_query};
use crate::migration::state_graph::{MAX_ORDER, UPSERT_CHANGESET};
use crate::migration::{Changeset, ChangesetKey, MigrationError, PreconditionErrorPolicy};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// File written by [`FileChangelogWriter`] inside its output directory
pub const DRY_RUN_FILE_NAME: &str = "output.cypher";

/// Line written by [`FileChangelogWriter`] when no changeset is pending
pub const NOTHING_TO_PERSIST: &str = "// graphguard: nothing to persist!";

/// What a writer did with each changeset it was given
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Changesets whose queries ran (or were printed, in dry-run mode)
    pub executed: Vec<ChangesetKey>,
    /// Changesets recorded without running, under `MARK_AS_EXECUTED`
    pub marked_as_executed: Vec<ChangesetKey>,
    /// Changesets skipped under `CONTINUE`
    pub skipped: Vec<ChangesetKey>,
    /// Dry-run output file
    pub output: Option<PathBuf>,
}

impl WriteReport {
    /// Total number of changesets handled
    #[must_use]
    pub fn total(&self) -> usize {
        self.executed.len() + self.marked_as_executed.len() + self.skipped.len()
    }
}

/// Applies (or prints) an ordered list of changesets
pub trait ChangelogWriter {
    /// Write `changesets` in order
    ///
    /// # Errors
    ///
    /// Returns `MigrationError` on the first changeset that cannot be written;
    /// earlier changesets stay written.
    fn write(
        &self,
        connection: &dyn GraphConnection,
        changesets: &[&Changeset],
    ) -> Result<WriteReport, MigrationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Executed,
    MarkedAsExecuted,
    Skipped,
}

/// Applies changesets to the graph and records them in the changelog
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphChangelogWriter;

impl GraphChangelogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Evaluate the precondition and, when it allows, run the queries in `transaction`
    fn run_changeset(transaction: &dyn GraphTransaction, changeset: &Changeset) -> Result<Outcome, MigrationError> {
        let result = {
            #[cfg(feature = "tracing")]
            let _span = tracing_helpers::precondition_span(changeset.id()).entered();
            precondition::evaluate(transaction, changeset.precondition())?
        };

        let outcome = match result {
            None => Outcome::Executed,
            Some(result) if result.executed_successfully() => Outcome::Executed,
            Some(result) => match result.policy() {
                PreconditionErrorPolicy::Continue => return Ok(Outcome::Skipped),
                PreconditionErrorPolicy::MarkAsExecuted => return Ok(Outcome::MarkedAsExecuted),
                PreconditionErrorPolicy::Fail => {
                    let query = changeset
                        .precondition()
                        .map(|p| print_query(p.query()))
                        .unwrap_or_default();
                    return Err(MigrationError::PreconditionNotMet {
                        changeset_id: changeset.id().to_string(),
                        query,
                        policy: result.policy(),
                    });
                }
            },
        };

        for query in changeset.queries() {
            log::debug!("Changeset '{}': {}", changeset.id(), query);
            transaction
                .execute(query, &Params::new())
                .map_err(|source| execution_error(changeset, query, source))?;
        }
        Ok(outcome)
    }

    /// Upsert the changeset record in its own transaction
    ///
    /// Returns whether a new record (and so a new order) was created.
    fn record(connection: &dyn GraphConnection, changeset: &Changeset, order: i64) -> Result<bool, MigrationError> {
        let mut params = Params::new();
        params.insert("id".to_string(), json!(changeset.id()));
        params.insert("author".to_string(), json!(changeset.author()));
        params.insert("queries".to_string(), json!(changeset.queries()));
        params.insert("checksum".to_string(), json!(changeset.checksum()));
        params.insert("order".to_string(), json!(order));

        let transaction = connection
            .begin()
            .map_err(|source| execution_error(changeset, UPSERT_CHANGESET, source))?;
        let created = match transaction
            .query_one(UPSERT_CHANGESET, &params)
            .and_then(|row| row.get_bool("created"))
        {
            Ok(created) => created,
            Err(source) => {
                if let Err(rollback) = transaction.rollback() {
                    log::debug!("Rollback after failed record of '{}': {rollback}", changeset.id());
                }
                return Err(execution_error(changeset, UPSERT_CHANGESET, source));
            }
        };
        transaction
            .commit()
            .map_err(|source| execution_error(changeset, UPSERT_CHANGESET, source))?;
        Ok(created)
    }
}

fn execution_error(changeset: &Changeset, query: &str, source: GraphError) -> MigrationError {
    MigrationError::Execution {
        changeset_id: changeset.id().to_string(),
        query: query.to_string(),
        source,
    }
}

impl ChangelogWriter for GraphChangelogWriter {
    fn write(
        &self,
        connection: &dyn GraphConnection,
        changesets: &[&Changeset],
    ) -> Result<WriteReport, MigrationError> {
        let mut report = WriteReport::default();
        if changesets.is_empty() {
            return Ok(report);
        }

        let mut next_order = connection.query_one(MAX_ORDER, &Params::new())?.get_i64("lastOrder")? + 1;

        for &changeset in changesets {
            #[cfg(feature = "tracing")]
            let _span = tracing_helpers::changeset_span(changeset.id(), changeset.author()).entered();

            let transaction = connection.begin()?;
            let outcome = match Self::run_changeset(transaction.as_ref(), changeset) {
                Ok(outcome) => outcome,
                Err(e) => {
                    // The server may already have rolled back after a failed statement
                    if let Err(rollback) = transaction.rollback() {
                        log::debug!("Rollback after failed changeset '{}': {rollback}", changeset.id());
                    }
                    return Err(e);
                }
            };

            match outcome {
                Outcome::Skipped => {
                    transaction.rollback()?;
                    log::info!(
                        "Skipped changeset '{}': precondition not met (if-not-met: CONTINUE)",
                        changeset.id()
                    );
                    #[cfg(feature = "metrics")]
                    METRICS.record_changeset("skipped");
                    report.skipped.push(changeset.key());
                    continue;
                }
                // Only the precondition ran
                Outcome::MarkedAsExecuted => transaction.rollback()?,
                Outcome::Executed => transaction.commit()?,
            }

            let created = Self::record(connection, changeset, next_order).map_err(|e| {
                if matches!(outcome, Outcome::Executed) {
                    log::error!(
                        "Changeset '{}' was applied but could not be recorded; it will run again",
                        changeset.id()
                    );
                }
                e
            })?;

            match outcome {
                Outcome::MarkedAsExecuted => {
                    log::info!(
                        "Marked changeset '{}' as executed: precondition not met (if-not-met: MARK_AS_EXECUTED)",
                        changeset.id()
                    );
                    #[cfg(feature = "metrics")]
                    METRICS.record_changeset("marked");
                    report.marked_as_executed.push(changeset.key());
                }
                _ => {
                    log::info!(
                        "Executed changeset '{}' by {} ({} quer{})",
                        changeset.id(),
                        changeset.author(),
                        changeset.queries().len(),
                        if changeset.queries().len() == 1 { "y" } else { "ies" }
                    );
                    #[cfg(feature = "metrics")]
                    METRICS.record_changeset("executed");
                    report.executed.push(changeset.key());
                }
            }

            if created {
                next_order += 1;
            }
        }

        Ok(report)
    }
}

/// Dry-run writer: prints the pending changesets to `output.cypher`
#[derive(Debug, Clone)]
pub struct FileChangelogWriter {
    output_directory: PathBuf,
}

impl FileChangelogWriter {
    pub fn new(output_directory: impl Into<PathBuf>) -> Self {
        Self {
            output_directory: output_directory.into(),
        }
    }

    /// Full path of the file this writer produces
    #[must_use]
    pub fn output_file(&self) -> PathBuf {
        self.output_directory.join(DRY_RUN_FILE_NAME)
    }

    /// Render changesets as a Cypher script
    #[must_use]
    pub fn render(changesets: &[&Changeset]) -> String {
        if changesets.is_empty() {
            return format!("{NOTHING_TO_PERSIST}\n");
        }

        let mut script = String::new();
        for changeset in changesets {
            script.push_str(&format!(
                "// graphguard changeset[author: {}, id: {}]\n",
                changeset.author(),
                changeset.id()
            ));
            let contexts = if changeset.contexts().is_empty() {
                "none".to_string()
            } else {
                changeset.contexts().join(",")
            };
            script.push_str(&format!("// graphguard changeset[executionContexts: {contexts}]\n"));
            if let Some(precondition) = changeset.precondition() {
                script.push_str(&format!(
                    "// graphguard precondition[if-not-met: {}]: {}\n",
                    precondition.policy(),
                    print_query(precondition.query())
                ));
            }
            for query in changeset.queries() {
                script.push_str(&format!("{}\n", query.trim()));
            }
        }
        script
    }

    fn write_file(path: &Path, contents: &str) -> Result<(), MigrationError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }
}

impl ChangelogWriter for FileChangelogWriter {
    fn write(
        &self,
        _connection: &dyn GraphConnection,
        changesets: &[&Changeset],
    ) -> Result<WriteReport, MigrationError> {
        let path = self.output_file();
        Self::write_file(&path, &Self::render(changesets))?;
        log::info!("Dry-run: wrote {} changeset(s) to {}", changesets.len(), path.display());

        Ok(WriteReport {
            executed: changesets.iter().map(|c| c.key()).collect(),
            output: Some(path),
            ..WriteReport::default()
        })
    }
}
