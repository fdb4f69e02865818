//! In-memory graph double for tests
//!
//! [`InMemoryGraph`] understands the statements the migration engine issues
//! (see [`crate::migration::state_graph`]) and keeps their effects in a
//! [`GraphState`]. Any other statement goes to an optional test-supplied
//! handler; without one, `RETURN true AS result` / `RETURN false AS result`
//! yield the obvious row and everything else succeeds with no rows.
//!
//! Transactions work on a snapshot of the state that replaces the shared state
//! on commit. Like Neo4j, a transaction refuses to mix schema statements
//! (index and constraint DDL) with data writes.

use crate::executor::{Connector, GraphConnection, GraphError, GraphExecutor, GraphTransaction, Params, Row};
use crate::migration::state_graph::{
    CREATE_LOCK, CREATE_LOCK_CONSTRAINT, DELETE_LOCK, MAX_ORDER, READ_CHANGESETS, UPSERT_CHANGESET,
};
use crate::migration::Changeset;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A recorded changeset in the in-memory state graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChangeset {
    pub id: String,
    pub author: String,
    pub queries: Vec<String>,
    pub checksum: String,
    pub order: i64,
    pub time: i64,
}

/// Everything the in-memory graph knows
#[derive(Debug, Clone, Default)]
pub struct GraphState {
    pub lock_constraint: bool,
    /// UUIDs of existing lock nodes
    pub locks: Vec<String>,
    pub changelog: Vec<StoredChangeset>,
    /// Free-form storage for test handlers
    pub values: BTreeMap<String, Value>,
}

type Handler = dyn Fn(&mut GraphState, &str, &Params) -> Option<Result<Vec<Row>, GraphError>> + Send + Sync;

/// Shared in-memory graph
pub struct InMemoryGraph {
    state: Mutex<GraphState>,
    handler: Option<Box<Handler>>,
    failures: Mutex<HashMap<String, usize>>,
    statements: Mutex<Vec<String>>,
    commits: Mutex<Vec<Vec<String>>>,
    connections: Mutex<usize>,
}

impl InMemoryGraph {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    fn build(handler: Option<Box<Handler>>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(GraphState::default()),
            handler,
            failures: Mutex::new(HashMap::new()),
            statements: Mutex::new(Vec::new()),
            commits: Mutex::new(Vec::new()),
            connections: Mutex::new(0),
        })
    }

    /// A graph whose non-engine statements go to `handler` first
    ///
    /// Returning `None` from the handler falls back to the default behaviour.
    pub fn with_handler<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&mut GraphState, &str, &Params) -> Option<Result<Vec<Row>, GraphError>> + Send + Sync + 'static,
    {
        Self::build(Some(Box::new(handler)))
    }

    /// Open a connection to this graph
    #[must_use]
    pub fn connection(self: &Arc<Self>) -> InMemoryConnection {
        *self.connections.lock() += 1;
        InMemoryConnection {
            graph: Arc::clone(self),
        }
    }

    /// A connector handing out connections to this graph
    #[must_use]
    pub fn connector(self: &Arc<Self>) -> Arc<dyn Connector> {
        Arc::new(InMemoryConnector {
            graph: Arc::clone(self),
        })
    }

    /// Snapshot of the committed state
    #[must_use]
    pub fn state(&self) -> GraphState {
        self.state.lock().clone()
    }

    /// Every successfully executed statement, in order
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    /// Statements of each committed explicit transaction, in commit order
    #[must_use]
    pub fn committed_transactions(&self) -> Vec<Vec<String>> {
        self.commits.lock().clone()
    }

    /// How many times `statement` executed successfully
    #[must_use]
    pub fn count(&self, statement: &str) -> usize {
        self.statements.lock().iter().filter(|s| *s == statement).count()
    }

    /// Number of connections opened so far
    #[must_use]
    pub fn connections_opened(&self) -> usize {
        *self.connections.lock()
    }

    /// Make the next `times` executions of `statement` fail with a database error
    pub fn fail_next(&self, statement: &str, times: usize) {
        self.failures.lock().insert(statement.to_string(), times);
    }

    /// Record a changeset as already applied
    pub fn seed_changeset(&self, changeset: &Changeset) {
        let mut state = self.state.lock();
        let order = state.changelog.iter().map(|c| c.order).max().unwrap_or(0) + 1;
        state.changelog.push(StoredChangeset {
            id: changeset.id().to_string(),
            author: changeset.author().to_string(),
            queries: changeset.queries().to_vec(),
            checksum: changeset.checksum().to_string(),
            order,
            time: 1_700_000_000_000,
        });
    }

    /// Create a lock node as if another process held the lock
    pub fn seed_lock(&self, uuid: &str) {
        let mut state = self.state.lock();
        state.lock_constraint = true;
        state.locks.push(uuid.to_string());
    }

    fn injected_failure(&self, statement: &str) -> Option<GraphError> {
        let mut failures = self.failures.lock();
        let remaining = failures.get_mut(statement)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(GraphError::Database {
            code: "Neo.ClientError.Statement.SyntaxError".to_string(),
            message: format!("injected failure for: {statement}"),
        })
    }

    fn run(&self, state: &mut GraphState, statement: &str, params: &Params) -> Result<Vec<Row>, GraphError> {
        if let Some(error) = self.injected_failure(statement) {
            return Err(error);
        }
        let rows = self.apply(state, statement, params)?;
        self.statements.lock().push(statement.to_string());
        Ok(rows)
    }

    fn apply(&self, state: &mut GraphState, statement: &str, params: &Params) -> Result<Vec<Row>, GraphError> {
        match statement {
            READ_CHANGESETS => {
                let mut changelog = state.changelog.clone();
                changelog.sort_by_key(|c| c.order);
                Ok(changelog
                    .into_iter()
                    .map(|c| {
                        Row::from_pairs([
                            ("id", json!(c.id)),
                            ("author", json!(c.author)),
                            ("queries", json!(c.queries)),
                            ("checksum", json!(c.checksum)),
                            ("order", json!(c.order)),
                            ("time", json!(c.time)),
                        ])
                    })
                    .collect())
            }
            MAX_ORDER => {
                let last = state.changelog.iter().map(|c| c.order).max().unwrap_or(0);
                Ok(vec![Row::from_pairs([("lastOrder", json!(last))])])
            }
            UPSERT_CHANGESET => {
                let id = param_str(params, "id")?;
                let author = param_str(params, "author")?;
                let queries: Vec<String> = params
                    .get("queries")
                    .and_then(Value::as_array)
                    .map(|qs| qs.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .ok_or_else(|| missing_param("queries"))?;
                let checksum = param_str(params, "checksum")?;

                let created = match state.changelog.iter_mut().find(|c| c.id == id) {
                    Some(existing) => {
                        existing.author = author;
                        existing.checksum = checksum;
                        existing.queries = queries;
                        false
                    }
                    None => {
                        let order = params
                            .get("order")
                            .and_then(Value::as_i64)
                            .ok_or_else(|| missing_param("order"))?;
                        state.changelog.push(StoredChangeset {
                            id,
                            author,
                            queries,
                            checksum,
                            order,
                            time: chrono::Utc::now().timestamp_millis(),
                        });
                        true
                    }
                };
                Ok(vec![Row::from_pairs([("created", json!(created))])])
            }
            CREATE_LOCK_CONSTRAINT => {
                state.lock_constraint = true;
                Ok(Vec::new())
            }
            CREATE_LOCK => {
                if state.lock_constraint && !state.locks.is_empty() {
                    return Err(GraphError::Database {
                        code: "Neo.ClientError.Schema.ConstraintValidationFailed".to_string(),
                        message: "Node already exists with label `__GraphguardLock` and property `name`".to_string(),
                    });
                }
                state.locks.push(param_str(params, "uuid")?);
                Ok(Vec::new())
            }
            DELETE_LOCK => {
                let uuid = param_str(params, "uuid")?;
                state.locks.retain(|l| *l != uuid);
                Ok(Vec::new())
            }
            other => {
                if let Some(handler) = &self.handler {
                    if let Some(result) = handler(state, other, params) {
                        return result;
                    }
                }
                Ok(default_rows(other))
            }
        }
    }
}

fn missing_param(name: &str) -> GraphError {
    GraphError::Database {
        code: "Neo.ClientError.Statement.ParameterMissing".to_string(),
        message: format!("Expected parameter(s): {name}"),
    }
}

fn param_str(params: &Params, name: &str) -> Result<String, GraphError> {
    params
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing_param(name))
}

fn default_rows(statement: &str) -> Vec<Row> {
    match statement.trim().to_ascii_lowercase().as_str() {
        "return true as result" => vec![Row::from_pairs([("result", json!(true))])],
        "return false as result" => vec![Row::from_pairs([("result", json!(false))])],
        _ => Vec::new(),
    }
}

/// Auto-commit connection to an [`InMemoryGraph`]
pub struct InMemoryConnection {
    graph: Arc<InMemoryGraph>,
}

impl GraphExecutor for InMemoryConnection {
    fn query_all(&self, query: &str, params: &Params) -> Result<Vec<Row>, GraphError> {
        let mut state = self.graph.state.lock();
        self.graph.run(&mut state, query, params)
    }
}

impl GraphConnection for InMemoryConnection {
    fn begin(&self) -> Result<Box<dyn GraphTransaction + '_>, GraphError> {
        Ok(Box::new(InMemoryTransaction {
            graph: Arc::clone(&self.graph),
            working: Mutex::new(self.graph.state()),
            kind: Mutex::new(None),
            issued: Mutex::new(Vec::new()),
        }))
    }
}

/// Transaction on a snapshot of an [`InMemoryGraph`]
pub struct InMemoryTransaction {
    graph: Arc<InMemoryGraph>,
    working: Mutex<GraphState>,
    kind: Mutex<Option<StatementKind>>,
    issued: Mutex<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatementKind {
    Schema,
    Write,
}

/// Classify by leading keywords; reads return `None`
fn statement_kind(statement: &str) -> Option<StatementKind> {
    let upper = statement.trim().to_ascii_uppercase();
    let mut words = upper.split_whitespace();
    let first = words.next()?;
    if matches!(first, "CREATE" | "DROP")
        && words.take(2).any(|w| w == "INDEX" || w == "CONSTRAINT")
    {
        return Some(StatementKind::Schema);
    }
    if matches!(first, "CREATE" | "MERGE") || upper.contains(" SET ") || upper.contains("DELETE") {
        return Some(StatementKind::Write);
    }
    None
}

impl InMemoryTransaction {
    fn check_kind(&self, statement: &str) -> Result<(), GraphError> {
        let Some(kind) = statement_kind(statement) else {
            return Ok(());
        };
        let mut current = self.kind.lock();
        match *current {
            Some(existing) if existing != kind => Err(GraphError::Database {
                code: "Neo.ClientError.Transaction.ForbiddenDueToTransactionType".to_string(),
                message: format!("Cannot mix schema and data writes in one transaction: {statement}"),
            }),
            _ => {
                *current = Some(kind);
                Ok(())
            }
        }
    }
}

impl GraphExecutor for InMemoryTransaction {
    fn query_all(&self, query: &str, params: &Params) -> Result<Vec<Row>, GraphError> {
        self.check_kind(query)?;
        let mut working = self.working.lock();
        let rows = self.graph.run(&mut working, query, params)?;
        self.issued.lock().push(query.to_string());
        Ok(rows)
    }
}

impl GraphTransaction for InMemoryTransaction {
    fn commit(self: Box<Self>) -> Result<(), GraphError> {
        let InMemoryTransaction {
            graph, working, issued, ..
        } = *self;
        *graph.state.lock() = working.into_inner();
        graph.commits.lock().push(issued.into_inner());
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), GraphError> {
        Ok(())
    }
}

struct InMemoryConnector {
    graph: Arc<InMemoryGraph>,
}

impl Connector for InMemoryConnector {
    fn connect(&self) -> Result<Box<dyn GraphConnection>, GraphError> {
        Ok(Box::new(self.graph.connection()))
    }
}
