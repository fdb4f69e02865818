//! Changeset model
//!
//! A [`Changeset`] is one migration unit: identity `(id, author)`, one or more
//! Cypher queries, a checksum derived from those queries, run-policy flags,
//! execution contexts and an optional [`Precondition`]. Changesets are built
//! once through [`ChangesetBuilder`] and never mutated afterwards.

use crate::migration::checksum::checksum;
use crate::migration::MigrationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What to do when a precondition evaluates to `false`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PreconditionErrorPolicy {
    /// Skip the changeset for this run
    Continue,
    /// Record the changeset as executed without running its queries
    MarkAsExecuted,
    /// Abort the migration
    Fail,
}

impl PreconditionErrorPolicy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PreconditionErrorPolicy::Continue => "CONTINUE",
            PreconditionErrorPolicy::MarkAsExecuted => "MARK_AS_EXECUTED",
            PreconditionErrorPolicy::Fail => "FAIL",
        }
    }
}

impl fmt::Display for PreconditionErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PreconditionErrorPolicy {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "CONTINUE" => Ok(PreconditionErrorPolicy::Continue),
            "MARK_AS_EXECUTED" => Ok(PreconditionErrorPolicy::MarkAsExecuted),
            "FAIL" => Ok(PreconditionErrorPolicy::Fail),
            other => Err(MigrationError::InvalidChangeset(format!(
                "unknown precondition policy '{other}' (expected CONTINUE, MARK_AS_EXECUTED or FAIL)"
            ))),
        }
    }
}

/// Boolean query tree gating a changeset
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreconditionQuery {
    /// A single query returning one row with a boolean `result` column
    Simple(String),
    And(Box<PreconditionQuery>, Box<PreconditionQuery>),
    Or(Box<PreconditionQuery>, Box<PreconditionQuery>),
}

impl PreconditionQuery {
    pub fn simple(query: impl Into<String>) -> Self {
        PreconditionQuery::Simple(query.into())
    }

    #[must_use]
    pub fn and(left: PreconditionQuery, right: PreconditionQuery) -> Self {
        PreconditionQuery::And(Box::new(left), Box::new(right))
    }

    #[must_use]
    pub fn or(left: PreconditionQuery, right: PreconditionQuery) -> Self {
        PreconditionQuery::Or(Box::new(left), Box::new(right))
    }
}

/// A precondition: query tree plus the policy applied when it is not met
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precondition {
    policy: PreconditionErrorPolicy,
    query: PreconditionQuery,
}

impl Precondition {
    #[must_use]
    pub fn new(policy: PreconditionErrorPolicy, query: PreconditionQuery) -> Self {
        Self { policy, query }
    }

    #[must_use]
    pub fn policy(&self) -> PreconditionErrorPolicy {
        self.policy
    }

    #[must_use]
    pub fn query(&self) -> &PreconditionQuery {
        &self.query
    }
}

/// Identity of a changeset: the same id may be reused by different authors
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangesetKey {
    pub id: String,
    pub author: String,
}

impl fmt::Display for ChangesetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (author: {})", self.id, self.author)
    }
}

/// One migration unit
///
/// Equality (`==`) compares `(id, checksum)` and answers "is this the same
/// change?". Identity lookups go through [`Changeset::key`], which is
/// `(id, author)`.
#[derive(Debug, Clone)]
pub struct Changeset {
    id: String,
    author: String,
    queries: Vec<String>,
    checksum: String,
    run_always: bool,
    run_on_change: bool,
    contexts: Vec<String>,
    precondition: Option<Precondition>,
}

impl Changeset {
    /// Start building a changeset
    pub fn builder(id: impl Into<String>, author: impl Into<String>) -> ChangesetBuilder {
        ChangesetBuilder::new(id, author)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn author(&self) -> &str {
        &self.author
    }

    #[must_use]
    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    #[must_use]
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    #[must_use]
    pub fn run_always(&self) -> bool {
        self.run_always
    }

    #[must_use]
    pub fn run_on_change(&self) -> bool {
        self.run_on_change
    }

    /// Declared execution contexts; empty means "any context"
    #[must_use]
    pub fn contexts(&self) -> &[String] {
        &self.contexts
    }

    #[must_use]
    pub fn precondition(&self) -> Option<&Precondition> {
        self.precondition.as_ref()
    }

    #[must_use]
    pub fn key(&self) -> ChangesetKey {
        ChangesetKey {
            id: self.id.clone(),
            author: self.author.clone(),
        }
    }

    /// Whether `other` has the same `(id, author)` identity
    #[must_use]
    pub fn same_identity(&self, other: &Changeset) -> bool {
        self.id == other.id && self.author == other.author
    }
}

impl PartialEq for Changeset {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.checksum == other.checksum
    }
}

impl Eq for Changeset {}

/// Validating builder for [`Changeset`]
#[derive(Debug, Clone)]
pub struct ChangesetBuilder {
    id: String,
    author: String,
    queries: Vec<String>,
    checksum: Option<String>,
    run_always: bool,
    run_on_change: bool,
    contexts: Vec<String>,
    precondition: Option<Precondition>,
}

impl ChangesetBuilder {
    pub fn new(id: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            queries: Vec::new(),
            checksum: None,
            run_always: false,
            run_on_change: false,
            contexts: Vec::new(),
            precondition: None,
        }
    }

    /// Append one query
    #[must_use]
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.queries.push(query.into());
        self
    }

    /// Append several queries, in order
    #[must_use]
    pub fn queries<I, S>(mut self, queries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queries.extend(queries.into_iter().map(Into::into));
        self
    }

    /// Expect a specific checksum; `build()` fails unless the queries hash to it
    #[must_use]
    pub fn checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    #[must_use]
    pub fn run_always(mut self, run_always: bool) -> Self {
        self.run_always = run_always;
        self
    }

    #[must_use]
    pub fn run_on_change(mut self, run_on_change: bool) -> Self {
        self.run_on_change = run_on_change;
        self
    }

    #[must_use]
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.contexts.push(context.into());
        self
    }

    #[must_use]
    pub fn contexts<I, S>(mut self, contexts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.contexts.extend(contexts.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn precondition(mut self, precondition: Precondition) -> Self {
        self.precondition = Some(precondition);
        self
    }

    /// Build the changeset, computing its checksum
    ///
    /// Blank ids, authors and queries are accepted here; they are reported
    /// together by the declared-changeset validator.
    ///
    /// # Errors
    ///
    /// - `MigrationError::InvalidChangeset` if no query was given
    /// - `MigrationError::ChecksumMismatch` if an explicit checksum does not
    ///   match the queries
    pub fn build(self) -> Result<Changeset, MigrationError> {
        if self.queries.is_empty() {
            return Err(MigrationError::InvalidChangeset(format!(
                "changeset '{}' must declare at least one query",
                self.id
            )));
        }

        let computed = checksum(&self.queries);
        if let Some(expected) = self.checksum {
            if expected != computed {
                return Err(MigrationError::ChecksumMismatch {
                    id: self.id,
                    expected,
                    computed,
                });
            }
        }

        Ok(Changeset {
            id: self.id,
            author: self.author,
            queries: self.queries,
            checksum: computed,
            run_always: self.run_always,
            run_on_change: self.run_on_change,
            contexts: self.contexts,
            precondition: self.precondition,
        })
    }
}
