//! HealthBody data-access library
//!
//! This library provides a bounded pool of reusable database connections,
//! transaction helpers and query-registry repositories over SQL databases
//! (SQLite, PostgreSQL, MySQL).

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod repository;

pub use config::Config;
pub use db::{ConnectionManager, PooledConnection, SqlxDriver};
pub use error::{DbError, DbResult};
pub use repository::{Entity, FieldUpdate, Repository};
