//! Database dispatch macros for reducing code duplication.
//!
//! The sqlx connection types share no object-safe trait, so every
//! operation matches on [`DbConnection`](crate::db::sqlx_driver::DbConnection).
//! This macro keeps those matches short when each backend runs the same
//! expression.

/// Run the same expression against whichever backend connection is held.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(&mut connection, c => sqlx::Executor::execute(&mut *c, "BEGIN").await)
/// ```
macro_rules! impl_db_dispatch {
    ($conn:expr, $c:ident => $body:expr) => {
        match $conn {
            $crate::db::sqlx_driver::DbConnection::MySql($c) => $body,
            $crate::db::sqlx_driver::DbConnection::Postgres($c) => $body,
            $crate::db::sqlx_driver::DbConnection::SQLite($c) => $body,
        }
    };
}
