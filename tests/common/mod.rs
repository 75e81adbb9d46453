//! Shared test helpers: an in-memory driver that records every call.

#![allow(dead_code)]

use healthbody_db::db::{Connection, ConnectionManager, Driver};
use healthbody_db::error::{DbError, DbResult};
use healthbody_db::models::{DataSource, DatabaseType, RawFields, SqlValue};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Counters and switches shared by a [`MockDriver`] and its connections.
#[derive(Debug, Default)]
pub struct MockState {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub registered: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub fail_register: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_close: AtomicBool,
    pub fail_execute: AtomicBool,
    pub fail_commit: AtomicBool,
    /// Number of upcoming rollbacks that fail.
    pub failing_rollbacks: AtomicUsize,
    pub rows_affected: AtomicU64,
    /// Milliseconds `register` sleeps before succeeding.
    pub register_delay_ms: AtomicU64,
    statements: Mutex<Vec<(String, Vec<SqlValue>)>>,
    rows: Mutex<Vec<RawFields>>,
}

impl MockState {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn registered(&self) -> usize {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub fn set(&self, flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }

    pub fn set_register_delay(&self, delay: Duration) {
        self.register_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_next_rollbacks(&self, count: usize) {
        self.failing_rollbacks.store(count, Ordering::SeqCst);
    }

    pub fn set_rows_affected(&self, rows: u64) {
        self.rows_affected.store(rows, Ordering::SeqCst);
    }

    /// Rows returned by every subsequent query.
    pub fn set_rows(&self, rows: Vec<RawFields>) {
        *self.rows.lock().unwrap() = rows;
    }

    /// Every statement sent through `execute` or `query`, in order.
    pub fn statements(&self) -> Vec<(String, Vec<SqlValue>)> {
        self.statements.lock().unwrap().clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements().into_iter().map(|(sql, _)| sql).collect()
    }

    fn record(&self, sql: &str, params: &[SqlValue]) {
        self.statements
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
    }
}

pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        let state = MockState::default();
        state.set_rows_affected(1);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }
}

impl Driver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    fn register(&self, _source: &DataSource) -> DbResult<()> {
        if self.state.fail_register.load(Ordering::SeqCst) {
            return Err(DbError::driver_registration("mock driver refused", None));
        }
        let delay = self.state.register_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        self.state.registered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn connect(&self, _source: &DataSource) -> DbResult<Box<dyn Connection>> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(DbError::connection("mock database unreachable", None));
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
            auto_commit: true,
            in_transaction: false,
        }))
    }
}

struct MockConnection {
    state: Arc<MockState>,
    auto_commit: bool,
    in_transaction: bool,
}

impl Connection for MockConnection {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        self.state.record(sql, params);
        if self.state.fail_execute.load(Ordering::SeqCst) {
            return Err(DbError::data_access("mock statement failed", None));
        }
        self.in_transaction |= !self.auto_commit;
        Ok(self.state.rows_affected.load(Ordering::SeqCst))
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<RawFields>> {
        self.state.record(sql, params);
        if self.state.fail_execute.load(Ordering::SeqCst) {
            return Err(DbError::data_access("mock query failed", None));
        }
        Ok(self.state.rows.lock().unwrap().clone())
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn set_auto_commit(&mut self, enabled: bool) -> DbResult<()> {
        if enabled && self.in_transaction {
            self.state.commits.fetch_add(1, Ordering::SeqCst);
            self.in_transaction = false;
        }
        self.auto_commit = enabled;
        Ok(())
    }

    fn commit(&mut self) -> DbResult<()> {
        if self.state.fail_commit.load(Ordering::SeqCst) {
            return Err(DbError::data_access("mock commit failed", None));
        }
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> DbResult<()> {
        let failing = self.state.failing_rollbacks.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |n| n.checked_sub(1),
        );
        if failing.is_ok() {
            return Err(DbError::data_access("mock rollback failed", None));
        }
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.in_transaction = false;
        Ok(())
    }

    fn close(self: Box<Self>) -> DbResult<()> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(DbError::connection("mock close failed", None));
        }
        Ok(())
    }
}

pub fn sqlite_source(name: &str) -> DataSource {
    DataSource::new(DatabaseType::SQLite, format!("sqlite:{}", name), "", "")
}

/// A pool over a fresh [`MockDriver`], already bound to `sqlite:health.db`.
pub fn mock_manager(capacity: usize) -> (ConnectionManager, Arc<MockState>) {
    let driver = MockDriver::new();
    let state = driver.state();
    let manager = ConnectionManager::with_capacity(Arc::new(driver), capacity);
    manager.rebind(sqlite_source("health.db")).unwrap();
    (manager, state)
}
