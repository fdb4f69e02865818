//! Migration-specific error types

use crate::connection::ConnectionError;
use crate::executor::GraphError;
use crate::migration::changeset::PreconditionErrorPolicy;
use thiserror::Error;
use uuid::Uuid;

/// Migration-specific errors
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Database execution error outside of a specific changeset
    #[error("Database error: {0}")]
    Graph(#[from] GraphError),

    /// A changeset could not be constructed
    #[error("Invalid changeset: {0}")]
    InvalidChangeset(String),

    /// An explicit checksum disagrees with the checksum of the queries
    #[error(
        "Changeset '{id}' carries checksum {expected} but its queries hash to {computed}"
    )]
    ChecksumMismatch {
        id: String,
        expected: String,
        computed: String,
    },

    /// Declared or persisted changelog failed validation; nothing was executed
    #[error("{}", render_validation(.0))]
    Validation(Vec<String>),

    /// A precondition query is malformed or does not yield a boolean `result`
    #[error("Precondition query is invalid: {reason}\n\tQuery: {query}")]
    PreconditionSyntax { query: String, reason: String },

    /// A precondition evaluated to false under the FAIL policy
    #[error(
        "Precondition of changeset '{changeset_id}' was not met (if-not-met: {policy})\n\tQuery: {query}"
    )]
    PreconditionNotMet {
        changeset_id: String,
        query: String,
        policy: PreconditionErrorPolicy,
    },

    /// Another run holds the lock, or the lock could not be set up
    #[error(
        "Migration lock unavailable (lock {uuid}): {reason}\n\
         Another process may be running migrations, or a previous run was killed by a \
         signal before releasing its lock. If this persists, delete the stale lock node: \
         MATCH (lock:__GraphguardLock) DELETE lock"
    )]
    LockUnavailable { uuid: Uuid, reason: String },

    /// A changeset query failed while executing or recording
    #[error("Changeset '{changeset_id}' failed: {source}\n\tQuery: {query}")]
    Execution {
        changeset_id: String,
        query: String,
        #[source]
        source: GraphError,
    },

    /// The changelog could not be loaded
    #[error("Changelog error: {0}")]
    Changelog(String),

    /// Connection could not be established
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Dry-run output could not be written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

fn render_validation(errors: &[String]) -> String {
    let mut report = format!("Changelog validation failed with {} error(s):", errors.len());
    for error in errors {
        report.push_str("\n\t - ");
        report.push_str(error);
    }
    report
}

impl MigrationError {
    /// Raise the collected validation errors, if any
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Validation` when `errors` is non-empty.
    pub fn from_validation(errors: Vec<String>) -> Result<(), MigrationError> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(MigrationError::Validation(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_report_is_multiline() {
        let err = MigrationError::Validation(vec![
            "Changeset 1 - 'id' should not be missing/blank".to_string(),
            "Changeset 1 - 'author' should not be missing/blank".to_string(),
        ]);
        let display = err.to_string();
        assert!(display.starts_with("Changelog validation failed with 2 error(s):"));
        assert_eq!(display.lines().count(), 3);
    }

    #[test]
    fn test_from_validation() {
        assert!(MigrationError::from_validation(Vec::new()).is_ok());
        let err = MigrationError::from_validation(vec!["boom".to_string()]).unwrap_err();
        assert!(matches!(err, MigrationError::Validation(ref e) if e.len() == 1));
    }

    #[test]
    fn test_precondition_not_met_display() {
        let err = MigrationError::PreconditionNotMet {
            changeset_id: "add-index".to_string(),
            query: "RETURN false AS result".to_string(),
            policy: PreconditionErrorPolicy::Fail,
        };
        let display = err.to_string();
        assert!(display.contains("add-index"));
        assert!(display.contains("FAIL"));
        assert!(display.contains("RETURN false AS result"));
    }

    #[test]
    fn test_lock_unavailable_names_stale_lock_recovery() {
        let err = MigrationError::LockUnavailable {
            uuid: Uuid::nil(),
            reason: "a lock node already exists".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("killed by a signal"));
        assert!(display.contains("MATCH (lock:__GraphguardLock) DELETE lock"));
    }
}
