//! Connection pool management.
//!
//! [`ConnectionManager`] keeps a bounded LIFO stack of idle sessions for one
//! bound [`DataSource`]. Checkout never waits: an empty stack means a new
//! session is opened, so live sessions may exceed the capacity while they
//! are checked out. The capacity only bounds how many are kept idle.
//!
//! # Concurrency
//!
//! - The idle stack and the binding share one `std::sync::Mutex`
//! - Rebinds are serialized by a second mutex held from the comparison
//!   through registration to the swap; the state lock is only taken for
//!   the comparison and the swap
//! - Sessions are opened and closed outside the lock (drain under lock,
//!   close outside)
//! - A poisoned lock is recovered; the guarded state stays consistent
//!   because every mutation is a single push, pop or swap

use crate::db::driver::{Connection, Driver};
use crate::error::{DbError, DbResult};
use crate::models::{DataSource, RawFields, SqlValue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{debug, info, warn};

/// Idle sessions kept per pool unless configured otherwise.
pub const DEFAULT_POOL_CAPACITY: usize = 15;

static GLOBAL: OnceLock<ConnectionManager> = OnceLock::new();

struct IdleConnection {
    id: u64,
    connection: Box<dyn Connection>,
}

struct PoolState {
    data_source: Option<DataSource>,
    /// Most recently released last.
    idle: Vec<IdleConnection>,
}

struct PoolShared {
    driver: Arc<dyn Driver>,
    capacity: usize,
    state: Mutex<PoolState>,
    rebind_lock: Mutex<()>,
    next_id: AtomicU64,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return a session to the idle stack, or close it.
    fn release(&self, id: u64, mut connection: Box<dyn Connection>) {
        if !connection.auto_commit() {
            warn!(
                connection_id = id,
                "Connection returned inside a transaction, rolling back"
            );
            let reset = connection
                .rollback()
                .and_then(|()| connection.set_auto_commit(true));
            if let Err(e) = reset {
                warn!(
                    connection_id = id,
                    error = %e,
                    "Failed to reset connection, closing it"
                );
                self.close_quietly(id, connection);
                return;
            }
        }

        let overflow = {
            let mut state = self.lock();
            if state.idle.len() < self.capacity {
                state.idle.push(IdleConnection { id, connection });
                debug!(
                    connection_id = id,
                    idle = state.idle.len(),
                    "Returned connection to pool"
                );
                None
            } else {
                Some(connection)
            }
        };

        if let Some(connection) = overflow {
            debug!(
                connection_id = id,
                capacity = self.capacity,
                "Pool is full, closing connection"
            );
            self.close_quietly(id, connection);
        }
    }

    fn close_quietly(&self, id: u64, connection: Box<dyn Connection>) {
        if let Err(e) = connection.close() {
            warn!(connection_id = id, error = %e, "Failed to close connection");
        }
    }
}

/// Bounded pool of reusable sessions over one pluggable [`Driver`].
///
/// Cloning is cheap; every clone shares the same pool.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<PoolShared>,
}

impl ConnectionManager {
    /// Create an unbound pool with [`DEFAULT_POOL_CAPACITY`].
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self::with_capacity(driver, DEFAULT_POOL_CAPACITY)
    }

    /// Create an unbound pool keeping at most `capacity` idle sessions.
    pub fn with_capacity(driver: Arc<dyn Driver>, capacity: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                driver,
                capacity,
                state: Mutex::new(PoolState {
                    data_source: None,
                    idle: Vec::with_capacity(capacity),
                }),
                rebind_lock: Mutex::new(()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Install the process-wide pool and bind it to `data_source`.
    ///
    /// The first call creates the pool around `driver`. Later calls keep the
    /// installed driver and only rebind.
    pub fn init(driver: Arc<dyn Driver>, data_source: DataSource) -> DbResult<&'static Self> {
        let manager = GLOBAL.get_or_init(|| Self::new(driver));
        manager.rebind(data_source)?;
        Ok(manager)
    }

    /// The process-wide pool installed by [`ConnectionManager::init`].
    pub fn global() -> DbResult<&'static Self> {
        GLOBAL.get().ok_or_else(|| {
            DbError::configuration("Connection manager has not been initialized")
        })
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn idle_count(&self) -> usize {
        self.shared.lock().idle.len()
    }

    /// The currently bound data source, if any.
    pub fn data_source(&self) -> Option<DataSource> {
        self.shared.lock().data_source.clone()
    }

    /// Check out a session, reusing the most recently returned one.
    pub fn acquire(&self) -> DbResult<PooledConnection> {
        let source = {
            let mut state = self.shared.lock();
            if let Some(idle) = state.idle.pop() {
                debug!(
                    connection_id = idle.id,
                    idle = state.idle.len(),
                    "Reusing idle connection"
                );
                return Ok(PooledConnection::new(
                    idle.id,
                    idle.connection,
                    Arc::clone(&self.shared),
                ));
            }
            state.data_source.clone().ok_or_else(|| {
                DbError::configuration("No data source is bound to the connection pool")
            })?
        };

        let connection = self.shared.driver.connect(&source).map_err(|e| match e {
            DbError::Connection { .. } => e,
            other => DbError::connection(
                format!("Failed to connect to {}: {}", source.masked_url(), other),
                Some(Box::new(other)),
            ),
        })?;

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(
            connection_id = id,
            driver = self.shared.driver.name(),
            url = %source.masked_url(),
            "Opened new connection"
        );
        Ok(PooledConnection::new(id, connection, Arc::clone(&self.shared)))
    }

    /// Return a session to the pool.
    ///
    /// Equivalent to dropping it. An open transaction is rolled back first.
    pub fn release(&self, connection: PooledConnection) {
        drop(connection);
    }

    /// Check out a session with auto-commit disabled.
    pub fn begin_transaction(&self) -> DbResult<PooledConnection> {
        let mut connection = self.acquire()?;
        connection
            .set_auto_commit(false)
            .map_err(|e| e.into_transaction("Failed to begin transaction"))?;
        debug!(connection_id = connection.id(), "Transaction started");
        Ok(connection)
    }

    /// Commit, restore auto-commit and release the session.
    ///
    /// The session is released even when the commit fails.
    pub fn commit_transaction(&self, mut connection: PooledConnection) -> DbResult<()> {
        let id = connection.id();
        let result = connection
            .commit()
            .and_then(|()| connection.set_auto_commit(true));
        drop(connection);
        result.map_err(|e| e.into_transaction("Failed to commit transaction"))?;
        debug!(connection_id = id, "Transaction committed");
        Ok(())
    }

    /// Roll back, restore auto-commit and release the session.
    pub fn rollback_transaction(&self, mut connection: PooledConnection) -> DbResult<()> {
        let id = connection.id();
        let result = connection
            .rollback()
            .and_then(|()| connection.set_auto_commit(true));
        drop(connection);
        result.map_err(|e| e.into_transaction("Failed to roll back transaction"))?;
        debug!(connection_id = id, "Transaction rolled back");
        Ok(())
    }

    /// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
    pub fn transaction<T, F>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&mut PooledConnection) -> DbResult<T>,
    {
        let mut connection = self.begin_transaction()?;
        match f(&mut connection) {
            Ok(value) => {
                self.commit_transaction(connection)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_error) = self.rollback_transaction(connection) {
                    warn!(error = %rollback_error, "Rollback after failed unit of work failed");
                }
                Err(e)
            }
        }
    }

    /// Bind the pool to `data_source`.
    ///
    /// Returns `false` without touching the pool when the descriptor is
    /// unchanged. Otherwise the driver is registered for the new
    /// descriptor, the binding is swapped and every idle session is closed.
    /// A registration failure keeps the previous binding. Concurrent
    /// rebinds run one at a time.
    pub fn rebind(&self, data_source: DataSource) -> DbResult<bool> {
        let _rebinding = self
            .shared
            .rebind_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if self.shared.lock().data_source.as_ref() == Some(&data_source) {
            debug!(url = %data_source.masked_url(), "Data source unchanged");
            return Ok(false);
        }

        self.shared
            .driver
            .register(&data_source)
            .map_err(|e| match e {
                DbError::DriverRegistration { .. } => e,
                other => DbError::driver_registration(
                    format!(
                        "Failed to register driver {} for {}",
                        self.shared.driver.name(),
                        data_source.masked_url()
                    ),
                    Some(Box::new(other)),
                ),
            })?;

        let url = data_source.masked_url();
        let drained = {
            let mut state = self.shared.lock();
            state.data_source = Some(data_source);
            std::mem::take(&mut state.idle)
        };

        info!(
            driver = self.shared.driver.name(),
            url = %url,
            closing = drained.len(),
            "Connection pool rebound"
        );

        let mut first_error = None;
        for idle in drained {
            if let Err(e) = idle.connection.close() {
                warn!(
                    connection_id = idle.id,
                    error = %e,
                    "Failed to close idle connection during rebind"
                );
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(DbError::driver_registration(
                format!("Failed to close idle connections while rebinding to {}", url),
                Some(Box::new(e)),
            )),
            None => Ok(true),
        }
    }

    /// Close every idle session. Failures are logged and skipped.
    pub fn close_all(&self) {
        let drained = std::mem::take(&mut self.shared.lock().idle);
        let count = drained.len();
        for idle in drained {
            self.shared.close_quietly(idle.id, idle.connection);
        }
        info!(closed = count, "Closed idle connections");
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("ConnectionManager")
            .field("driver", &self.shared.driver.name())
            .field("capacity", &self.shared.capacity)
            .field("data_source", &state.data_source)
            .field("idle", &state.idle.len())
            .finish()
    }
}

/// A checked-out session.
///
/// Exclusively owned by one caller. Dropping it returns it to the pool it
/// came from.
pub struct PooledConnection {
    id: u64,
    /// `None` only while being released.
    inner: Option<Box<dyn Connection>>,
    pool: Arc<PoolShared>,
}

impl PooledConnection {
    fn new(id: u64, connection: Box<dyn Connection>, pool: Arc<PoolShared>) -> Self {
        Self {
            id,
            inner: Some(connection),
            pool,
        }
    }

    /// Pool-assigned identifier, stable across checkouts of the same session.
    pub fn id(&self) -> u64 {
        self.id
    }

    fn inner_mut(&mut self) -> DbResult<&mut Box<dyn Connection>> {
        self.inner
            .as_mut()
            .ok_or_else(|| DbError::connection("Connection has already been released", None))
    }

    pub fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        self.inner_mut()?.execute(sql, params)
    }

    pub fn query(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<RawFields>> {
        self.inner_mut()?.query(sql, params)
    }

    pub fn auto_commit(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|connection| connection.auto_commit())
    }

    pub fn set_auto_commit(&mut self, enabled: bool) -> DbResult<()> {
        self.inner_mut()?.set_auto_commit(enabled)
    }

    pub fn commit(&mut self) -> DbResult<()> {
        self.inner_mut()?.commit()
    }

    pub fn rollback(&mut self) -> DbResult<()> {
        self.inner_mut()?.rollback()
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("auto_commit", &self.auto_commit())
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.inner.take() {
            self.pool.release(self.id, connection);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatabaseType;

    struct NullConnection {
        auto_commit: bool,
    }

    impl Connection for NullConnection {
        fn execute(&mut self, _sql: &str, _params: &[SqlValue]) -> DbResult<u64> {
            Ok(0)
        }
        fn query(&mut self, _sql: &str, _params: &[SqlValue]) -> DbResult<Vec<RawFields>> {
            Ok(Vec::new())
        }
        fn auto_commit(&self) -> bool {
            self.auto_commit
        }
        fn set_auto_commit(&mut self, enabled: bool) -> DbResult<()> {
            self.auto_commit = enabled;
            Ok(())
        }
        fn commit(&mut self) -> DbResult<()> {
            Ok(())
        }
        fn rollback(&mut self) -> DbResult<()> {
            Ok(())
        }
        fn close(self: Box<Self>) -> DbResult<()> {
            Ok(())
        }
    }

    struct NullDriver;

    impl Driver for NullDriver {
        fn name(&self) -> &str {
            "null"
        }
        fn register(&self, _source: &DataSource) -> DbResult<()> {
            Ok(())
        }
        fn connect(&self, _source: &DataSource) -> DbResult<Box<dyn Connection>> {
            Ok(Box::new(NullConnection { auto_commit: true }))
        }
    }

    fn source(url: &str) -> DataSource {
        DataSource::new(DatabaseType::SQLite, url, "", "")
    }

    #[test]
    fn test_acquire_without_binding_fails() {
        let manager = ConnectionManager::new(Arc::new(NullDriver));
        let result = manager.acquire();
        assert!(matches!(result, Err(DbError::Configuration { .. })));
    }

    #[test]
    fn test_default_capacity() {
        let manager = ConnectionManager::new(Arc::new(NullDriver));
        assert_eq!(manager.capacity(), DEFAULT_POOL_CAPACITY);
        assert_eq!(manager.idle_count(), 0);
        assert!(manager.data_source().is_none());
    }

    #[test]
    fn test_drop_returns_connection() {
        let manager = ConnectionManager::with_capacity(Arc::new(NullDriver), 2);
        manager.rebind(source("sqlite:a.db")).unwrap();

        let first = manager.acquire().unwrap();
        let id = first.id();
        drop(first);
        assert_eq!(manager.idle_count(), 1);

        let again = manager.acquire().unwrap();
        assert_eq!(again.id(), id);
        assert_eq!(manager.idle_count(), 0);
    }

    #[test]
    fn test_release_restores_auto_commit() {
        let manager = ConnectionManager::new(Arc::new(NullDriver));
        manager.rebind(source("sqlite:a.db")).unwrap();

        let conn = manager.begin_transaction().unwrap();
        assert!(!conn.auto_commit());
        manager.release(conn);

        let conn = manager.acquire().unwrap();
        assert!(conn.auto_commit());
    }

    #[test]
    fn test_transaction_helper_returns_value() {
        let manager = ConnectionManager::new(Arc::new(NullDriver));
        manager.rebind(source("sqlite:a.db")).unwrap();

        let value = manager
            .transaction(|conn| conn.execute("UPDATE t SET x = 1", &[]))
            .unwrap();
        assert_eq!(value, 0);
        assert_eq!(manager.idle_count(), 1);
    }
}
