//! Graph executor abstraction
//!
//! Provides the `GraphExecutor` family of traits that the migration engine runs
//! against. The engine never talks to a particular database directly: it issues
//! Cypher with named parameters and reads rows with named columns.
//!
//! - [`GraphExecutor`]: run a statement, get rows back
//! - [`GraphConnection`]: an executor that can open a unit of work
//! - [`GraphTransaction`]: an open unit of work, committed or rolled back explicitly
//! - [`Connector`]: opens fresh connections (used by the lock to recover from a
//!   poisoned connection)

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Named statement parameters
pub type Params = serde_json::Map<String, Value>;

/// Executor error type
#[derive(Debug, Error)]
pub enum GraphError {
    /// Network or I/O failure before a response was received
    #[error("Transport error: {0}")]
    Transport(String),
    /// Non-success HTTP status
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },
    /// Error reported by the database itself (syntax, constraint violation, ...)
    #[error("Database error {code}: {message}")]
    Database { code: String, message: String },
    /// Response did not have the expected shape
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// Column missing or of the wrong type
    #[error("Column '{column}' {problem}")]
    Column { column: String, problem: String },
    /// Transaction already committed or rolled back
    #[error("Transaction has already been committed or rolled back")]
    TransactionClosed,
    /// `query_one` did not get exactly one row
    #[error("Expected exactly one row, got {0}")]
    UnexpectedRowCount(usize),
}

impl GraphError {
    /// Whether the database rejected the statement because of a schema constraint
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, GraphError::Database { code, .. } if code.contains("ConstraintValidationFailed"))
    }

    fn column(column: &str, problem: impl Into<String>) -> Self {
        GraphError::Column {
            column: column.to_string(),
            problem: problem.into(),
        }
    }
}

/// A result row with named columns
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<Vec<String>>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row; `values` are positional against `columns`
    #[must_use]
    pub fn new(columns: Arc<Vec<String>>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Build a row from `(column, value)` pairs
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let (columns, values): (Vec<String>, Vec<Value>) =
            pairs.into_iter().map(|(c, v)| (c.into(), v)).unzip();
        Self {
            columns: Arc::new(columns),
            values,
        }
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a column value by name
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    fn require(&self, column: &str) -> Result<&Value, GraphError> {
        self.get(column)
            .ok_or_else(|| GraphError::column(column, "is missing"))
    }

    /// Get a string column
    ///
    /// # Errors
    ///
    /// Returns `GraphError::Column` if the column is missing or not a string.
    pub fn get_str(&self, column: &str) -> Result<&str, GraphError> {
        self.require(column)?
            .as_str()
            .ok_or_else(|| GraphError::column(column, "is not a string"))
    }

    /// Get a boolean column
    ///
    /// # Errors
    ///
    /// Returns `GraphError::Column` if the column is missing or not a boolean.
    pub fn get_bool(&self, column: &str) -> Result<bool, GraphError> {
        self.require(column)?
            .as_bool()
            .ok_or_else(|| GraphError::column(column, "is not a boolean"))
    }

    /// Get an integer column
    ///
    /// # Errors
    ///
    /// Returns `GraphError::Column` if the column is missing or not an integer.
    pub fn get_i64(&self, column: &str) -> Result<i64, GraphError> {
        self.require(column)?
            .as_i64()
            .ok_or_else(|| GraphError::column(column, "is not an integer"))
    }

    /// Get a nullable integer column (`None` for missing or `null`)
    ///
    /// # Errors
    ///
    /// Returns `GraphError::Column` if the value is present but not an integer.
    pub fn get_opt_i64(&self, column: &str) -> Result<Option<i64>, GraphError> {
        match self.get(column) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_i64()
                .map(Some)
                .ok_or_else(|| GraphError::column(column, "is not an integer")),
        }
    }

    /// Get a list-of-strings column
    ///
    /// # Errors
    ///
    /// Returns `GraphError::Column` if the column is missing, not a list, or
    /// contains non-string items.
    pub fn get_str_list(&self, column: &str) -> Result<Vec<String>, GraphError> {
        let items = self
            .require(column)?
            .as_array()
            .ok_or_else(|| GraphError::column(column, "is not a list"))?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| GraphError::column(column, "contains a non-string item"))
            })
            .collect()
    }
}

/// Trait for executing Cypher statements
///
/// This trait abstracts statement execution, allowing connections,
/// transactions and test doubles to be used interchangeably.
pub trait GraphExecutor {
    /// Execute a statement and return all rows
    ///
    /// # Arguments
    ///
    /// * `query` - Cypher statement (parameters referenced as `$name`)
    /// * `params` - Named parameters to bind
    ///
    /// # Errors
    ///
    /// Returns `GraphError` if the statement fails.
    fn query_all(&self, query: &str, params: &Params) -> Result<Vec<Row>, GraphError>;

    /// Execute a statement, discarding any rows
    ///
    /// # Errors
    ///
    /// Returns `GraphError` if the statement fails.
    fn execute(&self, query: &str, params: &Params) -> Result<(), GraphError> {
        self.query_all(query, params).map(|_| ())
    }

    /// Execute a statement and return its single row
    ///
    /// # Errors
    ///
    /// Returns `GraphError::UnexpectedRowCount` unless exactly one row comes back.
    fn query_one(&self, query: &str, params: &Params) -> Result<Row, GraphError> {
        let mut rows = self.query_all(query, params)?;
        if rows.len() != 1 {
            return Err(GraphError::UnexpectedRowCount(rows.len()));
        }
        Ok(rows.remove(0))
    }
}

/// A connection: statements run on it directly are auto-committed
pub trait GraphConnection: GraphExecutor {
    /// Open a unit of work
    ///
    /// # Errors
    ///
    /// Returns `GraphError` if the transaction cannot be started.
    fn begin(&self) -> Result<Box<dyn GraphTransaction + '_>, GraphError>;
}

/// An open unit of work
pub trait GraphTransaction: GraphExecutor {
    /// Commit all statements issued in this transaction
    ///
    /// # Errors
    ///
    /// Returns `GraphError` if the commit fails; the transaction is closed either way.
    fn commit(self: Box<Self>) -> Result<(), GraphError>;

    /// Discard all statements issued in this transaction
    ///
    /// # Errors
    ///
    /// Returns `GraphError` if the rollback request fails.
    fn rollback(self: Box<Self>) -> Result<(), GraphError>;
}

/// Opens fresh connections to the same database
pub trait Connector: Send + Sync {
    /// Open a new connection
    ///
    /// # Errors
    ///
    /// Returns `GraphError` if the connection cannot be established.
    fn connect(&self) -> Result<Box<dyn GraphConnection>, GraphError>;
}
