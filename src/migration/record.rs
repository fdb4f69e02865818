//! `ChangesetRecord` - persisted execution history read back from the graph

use crate::executor::{GraphError, GraphExecutor, Params, Row};
use crate::migration::state_graph::READ_CHANGESETS;
use crate::migration::{Changeset, MigrationError};
use chrono::{DateTime, Utc};

/// A changeset as recorded in the state graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangesetRecord {
    pub id: String,
    pub author: String,
    pub queries: Vec<String>,
    /// `SHA-256` checksum recorded alongside the queries
    pub checksum: String,
    /// Position in the execution history, starting at 1
    pub order: i64,
    /// First execution time (`None` if not recorded)
    pub executed_at: Option<DateTime<Utc>>,
}

impl ChangesetRecord {
    /// Create a `ChangesetRecord` from a row of [`READ_CHANGESETS`]
    ///
    /// # Errors
    ///
    /// Returns `GraphError::Column` if a column is missing or mistyped.
    pub fn from_row(row: &Row) -> Result<Self, GraphError> {
        let executed_at = row
            .get_opt_i64("time")?
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        Ok(Self {
            id: row.get_str("id")?.to_string(),
            author: row.get_str("author")?.to_string(),
            queries: row.get_str_list("queries")?,
            checksum: row.get_str("checksum")?.to_string(),
            order: row.get_i64("order")?,
            executed_at,
        })
    }

    /// Rebuild the changeset, checking the stored checksum against the stored queries
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::ChecksumMismatch` if the record is corrupted.
    pub fn to_changeset(&self) -> Result<Changeset, MigrationError> {
        Changeset::builder(self.id.clone(), self.author.clone())
            .queries(self.queries.iter().cloned())
            .checksum(self.checksum.clone())
            .build()
    }
}

/// Read execution history, ordered by `order`
///
/// # Errors
///
/// Returns `MigrationError` if the query fails or a row cannot be decoded.
pub fn read_records<E: GraphExecutor + ?Sized>(executor: &E) -> Result<Vec<ChangesetRecord>, MigrationError> {
    let rows = executor.query_all(READ_CHANGESETS, &Params::new())?;
    let records = rows
        .iter()
        .map(ChangesetRecord::from_row)
        .collect::<Result<Vec<_>, _>>()?;
    log::debug!("Read {} persisted changeset(s)", records.len());
    Ok(records)
}

/// Read execution history as changesets, in execution order
///
/// # Errors
///
/// Returns `MigrationError` if reading fails or a stored checksum is inconsistent.
pub fn read_persisted<E: GraphExecutor + ?Sized>(executor: &E) -> Result<Vec<Changeset>, MigrationError> {
    read_records(executor)?
        .iter()
        .map(ChangesetRecord::to_changeset)
        .collect()
}
