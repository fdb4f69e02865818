//! Explicit transactions over the Neo4j HTTP endpoint
//!
//! A [`Transaction`] is opened with `POST /db/{name}/tx`, receives statements at
//! the URL the server hands back, and is closed with `POST .../commit` or
//! `DELETE`. A transaction dropped while still open is rolled back.
//!
//! The server rolls a transaction back on its own as soon as a statement in it
//! fails, so a failed statement also closes the transaction locally.

use crate::connection::Neo4jConnection;
use crate::executor::{GraphError, GraphExecutor, GraphTransaction, Params, Row};
use std::cell::Cell;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// An open transaction on a [`Neo4jConnection`]
///
/// # Examples
///
/// ```no_run
/// use graphguard::{connect, DatabaseConfig, GraphConnection, GraphExecutor, Params};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let connection = connect(&DatabaseConfig::default())?;
/// let transaction = connection.begin()?;
/// transaction.execute("CREATE (:Sentence {text: 'Hello world!'})", &Params::new())?;
/// transaction.commit()?;
/// # Ok(())
/// # }
/// ```
pub struct Transaction<'c> {
    connection: &'c Neo4jConnection,
    url: String,
    closed: Cell<bool>,
}

impl<'c> Transaction<'c> {
    /// Open a new transaction
    pub(crate) fn begin(connection: &'c Neo4jConnection) -> Result<Self, GraphError> {
        let response = connection.post_statements(&format!("{}/tx", connection.endpoint()), &[])?;
        let location = response.header("Location").map(str::to_string);
        let body = Neo4jConnection::parse(response)?;

        // Location is the transaction URL; the commit URL is the fallback
        let url = location
            .or_else(|| {
                body.commit
                    .as_deref()
                    .map(|commit| commit.trim_end_matches("/commit").to_string())
            })
            .ok_or_else(|| GraphError::Protocol("transaction URL missing from response".to_string()))?;
        body.into_rows()?;

        log::debug!("Opened transaction {url}");
        Ok(Self {
            connection,
            url,
            closed: Cell::new(false),
        })
    }

    /// Transaction URL assigned by the server
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Check if the transaction is closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    fn ensure_open(&self) -> Result<(), GraphError> {
        if self.closed.get() {
            return Err(GraphError::TransactionClosed);
        }
        Ok(())
    }
}

impl GraphExecutor for Transaction<'_> {
    fn query_all(&self, query: &str, params: &Params) -> Result<Vec<Row>, GraphError> {
        self.ensure_open()?;

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::statement_span(query).entered();

        let result = self
            .connection
            .post_statements(&self.url, &[(query, params)])
            .and_then(Neo4jConnection::parse)
            .and_then(|body| body.into_rows());

        if matches!(result, Err(GraphError::Database { .. })) {
            self.closed.set(true);
        }
        result
    }
}

impl GraphTransaction for Transaction<'_> {
    fn commit(self: Box<Self>) -> Result<(), GraphError> {
        self.ensure_open()?;
        self.closed.set(true);
        let response = self
            .connection
            .post_statements(&format!("{}/commit", self.url), &[])?;
        Neo4jConnection::parse(response)?.into_rows()?;
        log::debug!("Committed transaction {}", self.url);
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), GraphError> {
        self.ensure_open()?;
        self.closed.set(true);
        self.connection.delete(&self.url)?;
        log::debug!("Rolled back transaction {}", self.url);
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.closed.get() {
            self.closed.set(true);
            if let Err(e) = self.connection.delete(&self.url) {
                log::warn!("Failed to roll back abandoned transaction {}: {e}", self.url);
            }
        }
    }
}
