//! Production driver backed by sqlx.
//!
//! sqlx is asynchronous; this driver owns a small tokio runtime and blocks
//! on it, so callers see the synchronous [`Driver`]/[`Connection`] contract.
//! Each pooled session is a single backend-specific sqlx connection
//! (`SqliteConnection`, `PgConnection`, `MySqlConnection`) rather than an
//! sqlx pool; pooling belongs to [`ConnectionManager`](super::ConnectionManager).
//!
//! Every call blocks the calling thread, so the driver must not be used
//! from inside an async runtime; such calls fail with a configuration error.
//!
//! Auto-commit is emulated: disabling it makes the next statement open a
//! transaction with `BEGIN`, and `COMMIT`/`ROLLBACK` close it.

use crate::db::driver::{Connection, Driver};
use crate::db::params::{bind_mysql_param, bind_postgres_param, bind_sqlite_param};
use crate::db::types::RowDecode;
use crate::error::{DbError, DbResult};
use crate::models::{DataSource, DatabaseType, RawFields, SqlValue};
use sqlx::ConnectOptions;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use std::str::FromStr;
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info};

/// Worker threads driving socket I/O for every open session.
pub const DEFAULT_WORKER_THREADS: usize = 2;

/// Backend-specific sqlx connection.
pub enum DbConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    SQLite(SqliteConnection),
}

impl DbConnection {
    /// Get the database type for this connection.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbConnection::MySql(_) => DatabaseType::MySQL,
            DbConnection::Postgres(_) => DatabaseType::PostgreSQL,
            DbConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

/// Parsed connect options for one data source.
enum DbConnectOptions {
    MySql(MySqlConnectOptions),
    Postgres(PgConnectOptions),
    SQLite(SqliteConnectOptions),
}

impl DbConnectOptions {
    /// Parse the descriptor's URL for its declared driver.
    ///
    /// Explicit credentials on the descriptor override URL user-info.
    fn parse(source: &DataSource) -> DbResult<Self> {
        if DatabaseType::from_connection_string(source.url()) != Some(source.driver()) {
            return Err(DbError::driver_registration(
                format!(
                    "Connection string {} is not a {} URL",
                    source.masked_url(),
                    source.driver()
                ),
                None,
            ));
        }

        let invalid = |e: sqlx::Error| {
            DbError::driver_registration(
                format!(
                    "Invalid {} connection string {}: {}",
                    source.driver(),
                    source.masked_url(),
                    e
                ),
                Some(e.into()),
            )
        };

        match source.driver() {
            DatabaseType::MySQL => {
                let mut options = MySqlConnectOptions::from_str(source.url())
                    .map_err(invalid)?
                    .charset("utf8mb4");
                if !source.user().is_empty() {
                    options = options.username(source.user());
                }
                if !source.password().is_empty() {
                    options = options.password(source.password());
                }
                Ok(Self::MySql(options))
            }
            DatabaseType::PostgreSQL => {
                let mut options = PgConnectOptions::from_str(source.url()).map_err(invalid)?;
                if !source.user().is_empty() {
                    options = options.username(source.user());
                }
                if !source.password().is_empty() {
                    options = options.password(source.password());
                }
                Ok(Self::Postgres(options))
            }
            DatabaseType::SQLite => {
                let options = SqliteConnectOptions::from_str(source.url()).map_err(invalid)?;
                Ok(Self::SQLite(options))
            }
        }
    }
}

/// [`Driver`] implementation over sqlx.
pub struct SqlxDriver {
    runtime: Arc<Runtime>,
}

impl SqlxDriver {
    /// Create the driver and start its I/O runtime.
    pub fn new() -> DbResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(DEFAULT_WORKER_THREADS)
            .thread_name("healthbody-db-io")
            .enable_all()
            .build()
            .map_err(|e| {
                DbError::driver_registration("Failed to start the driver runtime", Some(e.into()))
            })?;

        Ok(Self {
            runtime: Arc::new(runtime),
        })
    }
}

impl std::fmt::Debug for SqlxDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlxDriver")
            .field("worker_threads", &DEFAULT_WORKER_THREADS)
            .finish_non_exhaustive()
    }
}

impl Driver for SqlxDriver {
    fn name(&self) -> &str {
        "sqlx"
    }

    fn register(&self, source: &DataSource) -> DbResult<()> {
        DbConnectOptions::parse(source)?;
        info!(
            driver = %source.driver(),
            url = %source.masked_url(),
            "Registered sqlx driver"
        );
        Ok(())
    }

    fn connect(&self, source: &DataSource) -> DbResult<Box<dyn Connection>> {
        let options = DbConnectOptions::parse(source)?;

        let connection = block_on(&self.runtime, async {
            let result = match options {
                DbConnectOptions::MySql(o) => o.connect().await.map(DbConnection::MySql),
                DbConnectOptions::Postgres(o) => o.connect().await.map(DbConnection::Postgres),
                DbConnectOptions::SQLite(o) => o.connect().await.map(DbConnection::SQLite),
            };
            result.map_err(|e| {
                DbError::connection(
                    format!("Failed to connect to {}: {}", source.masked_url(), e),
                    Some(e.into()),
                )
            })
        })?;

        debug!(driver = %connection.db_type(), "Opened sqlx connection");

        Ok(Box::new(SqlxConnection {
            runtime: Arc::clone(&self.runtime),
            inner: Some(connection),
            auto_commit: true,
            in_transaction: false,
        }))
    }
}

/// Drive `future` to completion on the driver's runtime.
///
/// Tokio panics when a runtime is blocked on from a thread that is already
/// inside a runtime, so that case is reported as a configuration error.
fn block_on<T, E>(runtime: &Runtime, future: impl Future<Output = Result<T, E>>) -> DbResult<T>
where
    DbError: From<E>,
{
    if Handle::try_current().is_ok() {
        return Err(DbError::configuration(
            "The sqlx driver blocks the calling thread and cannot be used from inside an async runtime",
        ));
    }
    runtime.block_on(future).map_err(DbError::from)
}

/// One sqlx session behind the synchronous [`Connection`] contract.
struct SqlxConnection {
    runtime: Arc<Runtime>,
    /// `None` once closed.
    inner: Option<DbConnection>,
    auto_commit: bool,
    /// A `BEGIN` has been issued and not yet committed or rolled back.
    in_transaction: bool,
}

fn open(inner: &mut Option<DbConnection>) -> DbResult<&mut DbConnection> {
    inner
        .as_mut()
        .ok_or_else(|| DbError::connection("Connection is already closed", None))
}

impl SqlxConnection {
    /// Execute a statement without parameters or result rows.
    fn run_raw(&mut self, sql: &'static str) -> DbResult<()> {
        let Self { runtime, inner, .. } = self;
        let conn = open(inner)?;
        block_on(runtime, async {
            impl_db_dispatch!(conn, c => sqlx::Executor::execute(&mut *c, sql).await.map(|_| ()))
        })
    }

    /// Open the pending transaction before the first statement in manual-commit mode.
    fn ensure_transaction(&mut self) -> DbResult<()> {
        if !self.auto_commit && !self.in_transaction {
            self.run_raw("BEGIN")?;
            self.in_transaction = true;
        }
        Ok(())
    }
}

impl Connection for SqlxConnection {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        self.ensure_transaction()?;

        let Self { runtime, inner, .. } = self;
        let conn = open(inner)?;

        // When params is empty, execute raw SQL directly to avoid prepared statement issues
        // (some DDL doesn't support prepared statements)
        let rows_affected = block_on(runtime, async {
            match conn {
                DbConnection::MySql(c) => {
                    let result = if params.is_empty() {
                        sqlx::Executor::execute(&mut *c, sql).await
                    } else {
                        let mut query = sqlx::query(sql);
                        for param in params {
                            query = bind_mysql_param(query, param);
                        }
                        query.execute(&mut *c).await
                    };
                    result.map(|r| r.rows_affected())
                }
                DbConnection::Postgres(c) => {
                    let result = if params.is_empty() {
                        sqlx::Executor::execute(&mut *c, sql).await
                    } else {
                        let mut query = sqlx::query(sql);
                        for param in params {
                            query = bind_postgres_param(query, param);
                        }
                        query.execute(&mut *c).await
                    };
                    result.map(|r| r.rows_affected())
                }
                DbConnection::SQLite(c) => {
                    let result = if params.is_empty() {
                        sqlx::Executor::execute(&mut *c, sql).await
                    } else {
                        let mut query = sqlx::query(sql);
                        for param in params {
                            query = bind_sqlite_param(query, param);
                        }
                        query.execute(&mut *c).await
                    };
                    result.map(|r| r.rows_affected())
                }
            }
        })?;

        debug!(
            sql = %sql,
            params = params.len(),
            rows_affected = rows_affected,
            "Executed statement"
        );
        Ok(rows_affected)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<RawFields>> {
        self.ensure_transaction()?;

        let Self { runtime, inner, .. } = self;
        let conn = open(inner)?;

        let rows: Vec<RawFields> = block_on(runtime, async {
            match conn {
                DbConnection::MySql(c) => {
                    let result = if params.is_empty() {
                        sqlx::Executor::fetch_all(&mut *c, sql).await
                    } else {
                        let mut query = sqlx::query(sql);
                        for param in params {
                            query = bind_mysql_param(query, param);
                        }
                        query.fetch_all(&mut *c).await
                    };
                    result
                        .map_err(DbError::from)
                        .and_then(|rows| rows.iter().map(|row| row.decode_row()).collect())
                }
                DbConnection::Postgres(c) => {
                    let result = if params.is_empty() {
                        sqlx::Executor::fetch_all(&mut *c, sql).await
                    } else {
                        let mut query = sqlx::query(sql);
                        for param in params {
                            query = bind_postgres_param(query, param);
                        }
                        query.fetch_all(&mut *c).await
                    };
                    result
                        .map_err(DbError::from)
                        .and_then(|rows| rows.iter().map(|row| row.decode_row()).collect())
                }
                DbConnection::SQLite(c) => {
                    let result = if params.is_empty() {
                        sqlx::Executor::fetch_all(&mut *c, sql).await
                    } else {
                        let mut query = sqlx::query(sql);
                        for param in params {
                            query = bind_sqlite_param(query, param);
                        }
                        query.fetch_all(&mut *c).await
                    };
                    result
                        .map_err(DbError::from)
                        .and_then(|rows| rows.iter().map(|row| row.decode_row()).collect())
                }
            }
        })?;

        debug!(
            sql = %sql,
            params = params.len(),
            row_count = rows.len(),
            "Queried rows"
        );
        Ok(rows)
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn set_auto_commit(&mut self, enabled: bool) -> DbResult<()> {
        if enabled && !self.auto_commit && self.in_transaction {
            self.run_raw("COMMIT")?;
            self.in_transaction = false;
        }
        self.auto_commit = enabled;
        Ok(())
    }

    fn commit(&mut self) -> DbResult<()> {
        if self.auto_commit {
            return Err(DbError::transaction(
                "Cannot commit while auto-commit is enabled",
                None,
            ));
        }
        if self.in_transaction {
            self.run_raw("COMMIT")?;
            self.in_transaction = false;
        }
        Ok(())
    }

    fn rollback(&mut self) -> DbResult<()> {
        if self.auto_commit {
            return Err(DbError::transaction(
                "Cannot roll back while auto-commit is enabled",
                None,
            ));
        }
        if self.in_transaction {
            self.run_raw("ROLLBACK")?;
            self.in_transaction = false;
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) -> DbResult<()> {
        let Some(conn) = self.inner.take() else {
            return Ok(());
        };
        block_on(&self.runtime, async {
            impl_db_dispatch!(conn, c => sqlx::Connection::close(c).await)
        })
    }
}

impl Drop for SqlxConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.inner.take() {
            // sqlx tears sockets down through the runtime's I/O driver
            let _guard = self.runtime.enter();
            drop(conn);
        }
    }
}
