//! Precondition evaluation
//!
//! A precondition is a boolean query tree. Leaves are Cypher queries that must
//! return exactly one row with a single boolean column aliased `result`;
//! `And`/`Or` nodes combine two subtrees. Both sides of a compound node are
//! always executed, there is no short-circuit.
//!
//! A leaf that fails to execute or yields the wrong shape is a
//! [`MigrationError::PreconditionSyntax`], which is fatal. A leaf that yields
//! `false` is an ordinary outcome, handled by the precondition's policy.

use crate::executor::{GraphError, GraphExecutor, Params};
use crate::migration::{MigrationError, Precondition, PreconditionErrorPolicy, PreconditionQuery};

/// Column every precondition leaf must return
pub const RESULT_COLUMN: &str = "result";

/// Outcome of evaluating a precondition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreconditionResult {
    policy: PreconditionErrorPolicy,
    executed_successfully: bool,
}

impl PreconditionResult {
    #[must_use]
    pub fn new(policy: PreconditionErrorPolicy, executed_successfully: bool) -> Self {
        Self {
            policy,
            executed_successfully,
        }
    }

    /// Policy to apply when the precondition was not met
    #[must_use]
    pub fn policy(&self) -> PreconditionErrorPolicy {
        self.policy
    }

    /// Whether the query tree evaluated to `true`
    #[must_use]
    pub fn executed_successfully(&self) -> bool {
        self.executed_successfully
    }
}

/// Evaluate an optional precondition
///
/// # Returns
///
/// `None` when there is no precondition (treated as unconditional success by
/// the caller), otherwise the tree's truth value paired with its policy.
///
/// # Errors
///
/// Returns `MigrationError::PreconditionSyntax` if a leaf query fails or does
/// not return a single boolean `result`; connectivity failures surface as
/// `MigrationError::Graph`.
pub fn evaluate<E: GraphExecutor + ?Sized>(
    executor: &E,
    precondition: Option<&Precondition>,
) -> Result<Option<PreconditionResult>, MigrationError> {
    let Some(precondition) = precondition else {
        return Ok(None);
    };
    let met = evaluate_query(executor, precondition.query())?;
    Ok(Some(PreconditionResult::new(precondition.policy(), met)))
}

fn evaluate_query<E: GraphExecutor + ?Sized>(
    executor: &E,
    query: &PreconditionQuery,
) -> Result<bool, MigrationError> {
    match query {
        PreconditionQuery::Simple(query) => evaluate_simple(executor, query),
        PreconditionQuery::And(left, right) => {
            let left = evaluate_query(executor, left)?;
            let right = evaluate_query(executor, right)?;
            Ok(left && right)
        }
        PreconditionQuery::Or(left, right) => {
            let left = evaluate_query(executor, left)?;
            let right = evaluate_query(executor, right)?;
            Ok(left || right)
        }
    }
}

fn evaluate_simple<E: GraphExecutor + ?Sized>(executor: &E, query: &str) -> Result<bool, MigrationError> {
    let syntax = |reason: String| MigrationError::PreconditionSyntax {
        query: query.to_string(),
        reason,
    };

    let rows = match executor.query_all(query, &Params::new()) {
        Ok(rows) => rows,
        Err(e @ GraphError::Database { .. }) => return Err(syntax(e.to_string())),
        Err(e) => return Err(MigrationError::Graph(e)),
    };

    let [row] = rows.as_slice() else {
        return Err(syntax(format!("expected exactly one row, got {}", rows.len())));
    };
    if row.len() != 1 {
        return Err(syntax(format!(
            "expected a single column aliased '{RESULT_COLUMN}', got {:?}",
            row.columns()
        )));
    }
    row.get_bool(RESULT_COLUMN).map_err(|e| syntax(e.to_string()))
}

/// Render a query tree on one line, e.g. `(RETURN true AS result) AND (RETURN false AS result)`
#[must_use]
pub fn print_query(query: &PreconditionQuery) -> String {
    match query {
        PreconditionQuery::Simple(query) => query.trim().to_string(),
        PreconditionQuery::And(left, right) => {
            format!("({}) AND ({})", print_query(left), print_query(right))
        }
        PreconditionQuery::Or(left, right) => {
            format!("({}) OR ({})", print_query(left), print_query(right))
        }
    }
}
