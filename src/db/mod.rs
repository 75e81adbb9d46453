//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - The driver capability boundary and its sqlx implementation
//! - Connection pool management
//! - Per-entity statement registries
//! - Parameter binding and type mappings
//! - Database dispatch macros for reducing code duplication

#[macro_use]
mod macros;
pub mod driver;
pub(crate) mod params;
pub mod pool;
pub mod registry;
pub mod sqlx_driver;
pub mod types;

pub use driver::{Connection, Driver};
pub use pool::{ConnectionManager, DEFAULT_POOL_CAPACITY, PooledConnection};
pub use registry::{QueryKey, QueryRegistry};
pub use sqlx_driver::SqlxDriver;
