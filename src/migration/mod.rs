//! Migration system for Graphguard
//!
//! This module provides the changeset-based migration engine:
//! - Changeset model with validating builder and checksums
//! - Precondition evaluation with `CONTINUE` / `MARK_AS_EXECUTED` / `FAIL` policies
//! - Validation of the declared changelog and of persisted history
//! - Diff of declared vs. applied changesets, filtered by execution contexts
//! - Writers applying changesets to the graph, or printing them (dry run)
//! - A database-resident, reference-counted migration lock
//!
//! # Example
//!
//! ```rust,no_run
//! use graphguard::migration::{
//!     run_migrations, Changeset, MigrationError, Precondition, PreconditionErrorPolicy,
//!     PreconditionQuery,
//! };
//! use graphguard::MigrationConfig;
//!
//! fn changelog(_: &str) -> Result<Vec<Changeset>, MigrationError> {
//!     Ok(vec![
//!         Changeset::builder("hello-world", "fbiville")
//!             .query("CREATE (n:Sentence {text:'Hello monde!'})")
//!             .build()?,
//!         Changeset::builder("hello-world-fixed", "fbiville")
//!             .query("MATCH (n:Sentence {text:'Hello monde!'}) SET n.text='Hello world!'")
//!             .precondition(Precondition::new(
//!                 PreconditionErrorPolicy::Continue,
//!                 PreconditionQuery::simple(
//!                     "MATCH (n:Sentence {text:'Hello monde!'}) RETURN COUNT(n) > 0 AS result",
//!                 ),
//!             ))
//!             .build()?,
//!     ])
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let report = run_migrations(&MigrationConfig::load()?, &changelog)?;
//! # Ok(())
//! # }
//! ```

pub mod changeset;
pub mod checksum;
pub mod contexts;
pub mod declared_validator;
pub mod diff;
pub mod error;
pub mod lock;
pub mod migrator;
pub mod persisted_validator;
pub mod precondition;
pub mod record;
pub mod startup;
pub mod state_graph;
pub mod status;
pub mod writer;

pub use changeset::{
    Changeset, ChangesetBuilder, ChangesetKey, Precondition, PreconditionErrorPolicy, PreconditionQuery,
};
pub use checksum::checksum;
pub use contexts::ExecutionContexts;
pub use declared_validator::{ensure_declared_valid, validate_declared};
pub use diff::diff;
pub use error::MigrationError;
pub use lock::{LockGuard, MigrationLock};
pub use migrator::{MigrationReport, Migrator};
pub use persisted_validator::{ensure_persisted_consistent, validate_persisted};
pub use precondition::{evaluate, print_query, PreconditionResult};
pub use record::{read_persisted, read_records, ChangesetRecord};
pub use startup::{run_migrations, run_migrations_with, ChangelogSource};
pub use status::{MigrationStatus, PendingChangeset, PendingReason};
pub use writer::{ChangelogWriter, FileChangelogWriter, GraphChangelogWriter, WriteReport};
