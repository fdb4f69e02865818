//! Database-resident migration lock
//!
//! The lock is a single `(:__GraphguardLock {name, uuid})` node. A uniqueness
//! constraint on `name` guarantees that at most one such node exists, so the
//! process that manages to create it holds the lock.
//!
//! A [`MigrationLock`] is reference counted: the first [`acquire`](MigrationLock::acquire)
//! creates the node, later ones only bump the holder count, and the node is
//! deleted when the last [`LockGuard`] goes away. Clones of a `MigrationLock`
//! share the same count and UUID.
//!
//! While the node exists, the lock is also registered with a process-exit
//! hook so that a process leaving through `std::process::exit` still deletes
//! it. Explicit release is the primary path; the hook is best effort and does
//! not run when the process is killed by a signal (SIGINT, SIGTERM) or aborts.

use crate::executor::{Connector, GraphConnection, GraphError, Params};
use crate::migration::state_graph::{CREATE_LOCK, CREATE_LOCK_CONSTRAINT, DELETE_LOCK, LOCK_NAME};
use crate::migration::MigrationError;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use uuid::Uuid;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Locks whose node currently exists, released at process exit
static EXIT_HOOKS: Lazy<Mutex<HashMap<Uuid, Weak<LockInner>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

#[ctor::dtor]
fn release_locks_at_exit() {
    let registered: Vec<Weak<LockInner>> = EXIT_HOOKS.lock().drain().map(|(_, lock)| lock).collect();
    for lock in registered.iter().filter_map(Weak::upgrade) {
        lock.force_release();
    }
}

struct LockState {
    holders: usize,
    /// Bumped by `cleanup` so guards from before it become no-ops
    epoch: u64,
}

struct LockInner {
    uuid: Uuid,
    connector: Arc<dyn Connector>,
    state: Mutex<LockState>,
}

impl LockInner {
    fn params(&self) -> Params {
        let mut params = Params::new();
        params.insert("name".to_string(), json!(LOCK_NAME));
        params.insert("uuid".to_string(), json!(self.uuid.to_string()));
        params
    }

    fn create_node(&self, connection: &dyn GraphConnection) -> Result<(), GraphError> {
        connection.execute(CREATE_LOCK_CONSTRAINT, &Params::new())?;
        connection.execute(CREATE_LOCK, &self.params())
    }

    /// Delete the lock node, retrying once on a fresh connection
    ///
    /// Failures are logged: a stuck lock makes the next acquisition fail loudly.
    fn delete_node(&self, connection: Option<&dyn GraphConnection>) {
        let params = self.params();
        if let Some(connection) = connection {
            match connection.execute(DELETE_LOCK, &params) {
                Ok(()) => {
                    log::info!("Released migration lock {}", self.uuid);
                    return;
                }
                Err(e) => log::warn!(
                    "Failed to release migration lock {} ({e}), retrying on a fresh connection",
                    self.uuid
                ),
            }
        }

        let retry = self
            .connector
            .connect()
            .and_then(|fresh| fresh.execute(DELETE_LOCK, &params));
        match retry {
            Ok(()) => log::info!("Released migration lock {}", self.uuid),
            Err(e) => log::warn!(
                "Could not release migration lock {}: {e}. Delete it manually: \
                 MATCH (lock:__GraphguardLock {{uuid: '{}'}}) DELETE lock",
                self.uuid,
                self.uuid
            ),
        }
    }

    fn register_exit_hook(self: &Arc<Self>) {
        EXIT_HOOKS.lock().insert(self.uuid, Arc::downgrade(self));
    }

    fn deregister_exit_hook(&self) {
        EXIT_HOOKS.lock().remove(&self.uuid);
    }

    fn release(&self, connection: &dyn GraphConnection, epoch: u64) {
        let mut state = self.state.lock();
        if state.epoch != epoch || state.holders == 0 {
            log::debug!("Migration lock {} was already force-released", self.uuid);
            return;
        }
        state.holders -= 1;
        if state.holders > 0 {
            log::debug!("Migration lock {} still has {} holder(s)", self.uuid, state.holders);
            return;
        }
        self.delete_node(Some(connection));
        self.deregister_exit_hook();
    }

    fn force_release(&self) {
        let mut state = self.state.lock();
        state.epoch += 1;
        if state.holders == 0 {
            return;
        }
        log::info!(
            "Force-releasing migration lock {} ({} holder(s))",
            self.uuid,
            state.holders
        );
        state.holders = 0;
        self.delete_node(None);
        self.deregister_exit_hook();
    }
}

/// Reference-counted migration lock
///
/// # Examples
///
/// ```no_run
/// use graphguard::migration::MigrationLock;
/// use graphguard::{connect, DatabaseConfig, Neo4jConnector};
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = DatabaseConfig::default();
/// let connection = connect(&config)?;
/// let lock = MigrationLock::new(Arc::new(Neo4jConnector::new(config)));
///
/// let guard = lock.acquire(&connection)?;
/// // ... run migrations ...
/// guard.release();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MigrationLock {
    inner: Arc<LockInner>,
}

impl MigrationLock {
    /// Create a lock with a fresh UUID
    ///
    /// `connector` is used to retry deletion of the lock node when the holder's
    /// own connection fails.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(LockInner {
                uuid: Uuid::new_v4(),
                connector,
                state: Mutex::new(LockState { holders: 0, epoch: 0 }),
            }),
        }
    }

    /// UUID stored on the lock node while this lock is held
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    /// Number of live holders
    #[must_use]
    pub fn holder_count(&self) -> usize {
        self.inner.state.lock().holders
    }

    /// Acquire the lock
    ///
    /// The first holder creates the uniqueness constraint (if missing) and the
    /// lock node; later holders only increment the count.
    ///
    /// # Arguments
    ///
    /// * `connection` - Connection used to create the node and, on release, to delete it
    ///
    /// # Returns
    ///
    /// A guard that releases this holder when dropped.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::LockUnavailable` if another lock node exists or
    /// the constraint cannot be created. The holder count is unchanged.
    pub fn acquire<'a>(&'a self, connection: &'a dyn GraphConnection) -> Result<LockGuard<'a>, MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::lock_span(&self.inner.uuid.to_string()).entered();

        let mut state = self.inner.state.lock();
        if state.holders == 0 {
            if let Err(e) = self.inner.create_node(connection) {
                #[cfg(feature = "metrics")]
                METRICS.record_lock_failure();
                let reason = if e.is_constraint_violation() {
                    "a lock node already exists".to_string()
                } else {
                    e.to_string()
                };
                return Err(MigrationError::LockUnavailable {
                    uuid: self.inner.uuid,
                    reason,
                });
            }
            self.inner.register_exit_hook();
            log::info!("Acquired migration lock {}", self.inner.uuid);
        }
        state.holders += 1;

        Ok(LockGuard {
            lock: self,
            connection,
            epoch: state.epoch,
            released: false,
        })
    }

    /// Force-release every holder and delete the lock node
    ///
    /// Guards still alive afterwards release nothing when dropped.
    pub fn cleanup(&self) {
        self.inner.force_release();
    }
}

impl fmt::Debug for MigrationLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationLock")
            .field("uuid", &self.inner.uuid)
            .field("holders", &self.holder_count())
            .finish()
    }
}

/// One holder of a [`MigrationLock`]
///
/// Released on drop. Release failures are logged, never raised.
pub struct LockGuard<'a> {
    lock: &'a MigrationLock,
    connection: &'a dyn GraphConnection,
    epoch: u64,
    released: bool,
}

impl<'a> LockGuard<'a> {
    /// Connection this holder acquired the lock with
    #[must_use]
    pub fn connection(&self) -> &'a dyn GraphConnection {
        self.connection
    }

    /// Lock this guard belongs to
    #[must_use]
    pub fn lock(&self) -> &'a MigrationLock {
        self.lock
    }

    /// Release this holder now
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.lock.inner.release(self.connection, self.epoch);
        }
    }
}

impl fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("uuid", &self.lock.uuid())
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.release_once();
    }
}

#[cfg(test)]
fn has_exit_hook(uuid: Uuid) -> bool {
    EXIT_HOOKS.lock().contains_key(&uuid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::InMemoryGraph;

    #[test]
    fn test_reference_counting_creates_and_deletes_once() {
        let graph = InMemoryGraph::new();
        let connection = graph.connection();
        let other_connection = graph.connection();
        let lock = MigrationLock::new(graph.connector());

        let first = lock.acquire(&connection).unwrap();
        let second = lock.acquire(&other_connection).unwrap();
        assert_eq!(lock.holder_count(), 2);
        assert_eq!(graph.state().locks, vec![lock.uuid().to_string()]);

        first.release();
        assert_eq!(lock.holder_count(), 1);
        assert_eq!(graph.state().locks.len(), 1);

        second.release();
        assert_eq!(lock.holder_count(), 0);
        assert!(graph.state().locks.is_empty());

        assert_eq!(graph.count(CREATE_LOCK_CONSTRAINT), 1);
        assert_eq!(graph.count(CREATE_LOCK), 1);
        assert_eq!(graph.count(DELETE_LOCK), 1);
    }

    #[test]
    fn test_lock_held_elsewhere_is_unavailable() {
        let graph = InMemoryGraph::new();
        graph.seed_lock("another-process");
        let connection = graph.connection();
        let lock = MigrationLock::new(graph.connector());

        let err = lock.acquire(&connection).unwrap_err();

        match err {
            MigrationError::LockUnavailable { uuid, reason } => {
                assert_eq!(uuid, lock.uuid());
                assert_eq!(reason, "a lock node already exists");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(lock.holder_count(), 0);
        assert!(!has_exit_hook(lock.uuid()));
        assert_eq!(graph.state().locks, vec!["another-process".to_string()]);
    }

    #[test]
    fn test_two_instances_exclude_each_other() {
        let graph = InMemoryGraph::new();
        let connection = graph.connection();
        let first = MigrationLock::new(graph.connector());
        let second = MigrationLock::new(graph.connector());

        let guard = first.acquire(&connection).unwrap();
        assert!(matches!(
            second.acquire(&connection),
            Err(MigrationError::LockUnavailable { .. })
        ));

        drop(guard);
        let guard = second.acquire(&connection).unwrap();
        assert_eq!(graph.state().locks, vec![second.uuid().to_string()]);
        drop(guard);
    }

    #[test]
    fn test_constraint_failure_is_unavailable() {
        let graph = InMemoryGraph::new();
        graph.fail_next(CREATE_LOCK_CONSTRAINT, 1);
        let connection = graph.connection();
        let lock = MigrationLock::new(graph.connector());

        assert!(matches!(
            lock.acquire(&connection),
            Err(MigrationError::LockUnavailable { .. })
        ));
        assert_eq!(lock.holder_count(), 0);
        assert_eq!(graph.count(CREATE_LOCK), 0);
    }

    #[test]
    fn test_release_retries_on_fresh_connection() {
        let graph = InMemoryGraph::new();
        let connection = graph.connection();
        let lock = MigrationLock::new(graph.connector());
        let guard = lock.acquire(&connection).unwrap();
        let opened = graph.connections_opened();

        graph.fail_next(DELETE_LOCK, 1);
        guard.release();

        assert!(graph.state().locks.is_empty());
        assert_eq!(graph.connections_opened(), opened + 1);
        assert_eq!(lock.holder_count(), 0);
    }

    #[test]
    fn test_failed_release_is_logged_not_raised() {
        let graph = InMemoryGraph::new();
        let connection = graph.connection();
        let lock = MigrationLock::new(graph.connector());
        let guard = lock.acquire(&connection).unwrap();

        graph.fail_next(DELETE_LOCK, 2);
        guard.release();

        // Stuck lock: the next run fails loudly
        assert_eq!(graph.state().locks, vec![lock.uuid().to_string()]);
        assert_eq!(lock.holder_count(), 0);
        let next_run = MigrationLock::new(graph.connector());
        assert!(next_run.acquire(&connection).is_err());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let graph = InMemoryGraph::new();
        let connection = graph.connection();
        let lock = MigrationLock::new(graph.connector());
        {
            let _guard = lock.acquire(&connection).unwrap();
            assert!(has_exit_hook(lock.uuid()));
        }
        assert!(graph.state().locks.is_empty());
        assert!(!has_exit_hook(lock.uuid()));
    }

    #[test]
    fn test_cleanup_force_releases_all_holders() {
        let graph = InMemoryGraph::new();
        let connection = graph.connection();
        let lock = MigrationLock::new(graph.connector());
        let first = lock.acquire(&connection).unwrap();
        let second = lock.acquire(&connection).unwrap();

        lock.cleanup();
        assert_eq!(lock.holder_count(), 0);
        assert!(graph.state().locks.is_empty());
        assert!(!has_exit_hook(lock.uuid()));

        // Stale guards do not touch a later acquisition
        let third = lock.acquire(&connection).unwrap();
        drop(first);
        drop(second);
        assert_eq!(lock.holder_count(), 1);
        assert_eq!(graph.state().locks.len(), 1);

        drop(third);
        assert!(graph.state().locks.is_empty());
        assert_eq!(graph.count(CREATE_LOCK), 2);
        assert_eq!(graph.count(DELETE_LOCK), 2);
    }

    #[test]
    fn test_guard_debug_names_its_lock() {
        let graph = InMemoryGraph::new();
        let connection = graph.connection();
        let lock = MigrationLock::new(graph.connector());

        let guard = lock.acquire(&connection).unwrap();

        let rendered = format!("{guard:?}");
        assert!(rendered.contains(&lock.uuid().to_string()), "{rendered}");
        assert!(rendered.contains("released: false"), "{rendered}");
    }

    #[test]
    fn test_clones_share_holders() {
        let graph = InMemoryGraph::new();
        let connection = graph.connection();
        let lock = MigrationLock::new(graph.connector());
        let shared = lock.clone();

        let guard = lock.acquire(&connection).unwrap();
        let nested = shared.acquire(&connection).unwrap();
        assert_eq!(shared.holder_count(), 2);
        drop(nested);
        drop(guard);

        assert_eq!(graph.count(CREATE_LOCK), 1);
        assert_eq!(graph.count(DELETE_LOCK), 1);
    }
}
