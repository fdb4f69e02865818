//! Migration state graph
//!
//! Every statement the engine issues against the target database lives here.
//! Execution history is stored in the graph itself:
//!
//! ```text
//! (:__GraphguardChangelog)<-[:EXECUTED_WITHIN_CHANGELOG {order, time}]-(:__GraphguardChangeset {id, author, queries, checksum})
//! ```
//!
//! `order` starts at 1 and increases by one per recorded changeset. The lock
//! is a single `(:__GraphguardLock {name, uuid})` node kept unique by a schema
//! constraint on `name`.

/// Label of the singleton changelog anchor node
pub const CHANGELOG_LABEL: &str = "__GraphguardChangelog";

/// Label of persisted changeset nodes
pub const CHANGESET_LABEL: &str = "__GraphguardChangeset";

/// Label of the lock node
pub const LOCK_LABEL: &str = "__GraphguardLock";

/// Fixed `name` of the lock node; the uniqueness constraint keys on it
pub const LOCK_NAME: &str = "graphguard";

/// Read persisted changesets in execution order
pub const READ_CHANGESETS: &str = "\
MATCH (:__GraphguardChangelog)<-[exec:EXECUTED_WITHIN_CHANGELOG]-(changeset:__GraphguardChangeset) \
RETURN changeset.id AS id, changeset.author AS author, changeset.queries AS queries, \
changeset.checksum AS checksum, exec.order AS order, exec.time AS time \
ORDER BY exec.order ASC";

/// Highest recorded `order`, 0 on an empty history
pub const MAX_ORDER: &str = "\
OPTIONAL MATCH (:__GraphguardChangelog)<-[exec:EXECUTED_WITHIN_CHANGELOG]-(:__GraphguardChangeset) \
RETURN COALESCE(MAX(exec.order), 0) AS lastOrder";

/// Insert-or-update a changeset record keyed by id under the anchor
///
/// Parameters: `id`, `author`, `queries`, `checksum`, `order`.
/// Returns `created`: whether a new record (and so a new `order`) was written.
pub const UPSERT_CHANGESET: &str = "\
MERGE (changelog:__GraphguardChangelog) \
MERGE (changelog)<-[exec:EXECUTED_WITHIN_CHANGELOG]-(changeset:__GraphguardChangeset {id: $id}) \
ON MATCH SET changeset.author = $author, changeset.checksum = $checksum, changeset.queries = $queries \
ON CREATE SET changeset.author = $author, changeset.queries = $queries, changeset.checksum = $checksum, \
exec.time = timestamp(), exec.order = $order \
RETURN exec.order = $order AS created";

/// Idempotent uniqueness constraint on the lock node
pub const CREATE_LOCK_CONSTRAINT: &str = "\
CREATE CONSTRAINT graphguard_lock_name IF NOT EXISTS \
FOR (lock:__GraphguardLock) REQUIRE lock.name IS UNIQUE";

/// Create the lock node. Parameters: `name`, `uuid`.
pub const CREATE_LOCK: &str = "CREATE (:__GraphguardLock {name: $name, uuid: $uuid})";

/// Delete the lock node owned by a lock instance. Parameter: `uuid`.
pub const DELETE_LOCK: &str = "MATCH (lock:__GraphguardLock {uuid: $uuid}) DELETE lock";
