//! Driver capability boundary.
//!
//! The pool and the repositories only talk to the database through these
//! two traits, so any driver able to open sessions, run parameterized
//! statements and control auto-commit can back them.

use crate::error::DbResult;
use crate::models::{DataSource, RawFields, SqlValue};

/// Factory for database sessions.
pub trait Driver: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Make the driver ready to serve `source`.
    ///
    /// Called on every pool rebind before the descriptor is adopted; a
    /// failure here aborts the rebind.
    fn register(&self, source: &DataSource) -> DbResult<()>;

    /// Open a new session against `source`, with auto-commit enabled.
    fn connect(&self, source: &DataSource) -> DbResult<Box<dyn Connection>>;
}

/// A live database session.
pub trait Connection: Send {
    /// Execute a statement, binding `params` positionally; returns rows affected.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<u64>;

    /// Run a statement and materialize every row it yields.
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<RawFields>>;

    fn auto_commit(&self) -> bool;

    /// Disabling auto-commit opens a transaction. Enabling it while a
    /// transaction is open commits that transaction.
    fn set_auto_commit(&mut self, enabled: bool) -> DbResult<()>;

    /// Commit the open transaction. The session stays in manual-commit mode.
    fn commit(&mut self) -> DbResult<()>;

    /// Roll back the open transaction. The session stays in manual-commit mode.
    fn rollback(&mut self) -> DbResult<()>;

    fn close(self: Box<Self>) -> DbResult<()>;
}
