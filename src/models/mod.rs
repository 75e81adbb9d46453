//! Data models for the data-access layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod value;

// Re-export commonly used types
pub use connection::{DataSource, DatabaseType};
pub use value::{RawFields, SqlValue};
