//! # Graphguard
//!
//! Changeset-based schema migrations for graph databases.
//!
//! A changelog is an ordered list of [`migration::Changeset`]s. Graphguard
//! applies each changeset at most once (unless told otherwise), records what it
//! ran inside the target graph itself, and guards every run with a
//! database-resident lock so two processes never interleave.
//!
//! See [`migration::run_migrations`] for the entry point.

pub mod config;
pub mod connection;
pub mod executor;
pub mod metrics;
pub mod migration;
pub mod transaction;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use crate::config::{ChangelogConfig, DatabaseConfig, ExecutionMode, MigrationConfig};
pub use crate::connection::{connect, Neo4jConnection, Neo4jConnector};
pub use crate::executor::{Connector, GraphConnection, GraphError, GraphExecutor, GraphTransaction, Params, Row};
pub use crate::migration::{run_migrations, MigrationError};
