//! Error types for the data-access layer.
//!
//! Every failure that affects correctness is surfaced as a [`DbError`]
//! variant carrying a readable message and, where one exists, the
//! underlying cause as its `source`. Only connection-close paths log and
//! swallow errors.

use crate::db::registry::QueryKey;
use thiserror::Error;

/// Boxed cause attached to driver-level errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Driver registration failed: {message}")]
    DriverRegistration {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Connection failed: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Query not found: {key}")]
    QueryNotFound { key: QueryKey },

    #[error("Data access error: {message}")]
    DataAccess {
        message: String,
        /// e.g., "23505" for a unique violation
        sql_state: Option<String>,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl DbError {
    /// Create a driver registration error.
    pub fn driver_registration(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self::DriverRegistration {
            message: message.into(),
            source,
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self::Connection {
            message: message.into(),
            source,
        }
    }

    /// Create a query-not-found error for an unregistered key.
    pub fn query_not_found(key: QueryKey) -> Self {
        Self::QueryNotFound { key }
    }

    /// Create a data access error.
    pub fn data_access(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self::DataAccess {
            message: message.into(),
            sql_state: None,
            source,
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self::Transaction {
            message: message.into(),
            source,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Wrap this error as the cause of a transaction failure.
    ///
    /// Errors that already are transaction errors pass through unchanged.
    pub fn into_transaction(self, message: impl Into<String>) -> Self {
        match self {
            err @ Self::Transaction { .. } => err,
            err => Self::transaction(message, Some(err.into())),
        }
    }

    /// SQLSTATE reported by the database, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::DataAccess { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                let sql_state = db_err.code().map(|c| c.to_string());
                DbError::DataAccess {
                    message,
                    sql_state,
                    source: Some(Box::new(sqlx::Error::Database(db_err))),
                }
            }
            sqlx::Error::Configuration(_)
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_) => {
                let message = err.to_string();
                DbError::connection(message, Some(err.into()))
            }
            sqlx::Error::ColumnNotFound(ref col) => {
                let message = format!("Column not found: {}", col);
                DbError::data_access(message, Some(err.into()))
            }
            _ => {
                let message = err.to_string();
                DbError::data_access(message, Some(err.into()))
            }
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = DbError::configuration("No data source bound");
        assert_eq!(err.to_string(), "Configuration error: No data source bound");
    }

    #[test]
    fn test_query_not_found_names_key() {
        let err = DbError::query_not_found(QueryKey::UpdateByField);
        assert!(err.to_string().contains("UPDATE_BY_FIELD"));
    }

    #[test]
    fn test_into_transaction_keeps_cause() {
        let err = DbError::data_access("disk I/O error", None).into_transaction("Commit failed");
        assert!(matches!(err, DbError::Transaction { .. }));
        let source = err.source().expect("cause attached");
        assert!(source.to_string().contains("disk I/O error"));
    }

    #[test]
    fn test_into_transaction_passthrough() {
        let err = DbError::transaction("Rollback failed", None).into_transaction("ignored");
        assert_eq!(err.to_string(), "Transaction error: Rollback failed");
    }

    #[test]
    fn test_sqlx_row_not_found_is_data_access() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DbError::DataAccess { .. }));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_sqlx_protocol_is_connection() {
        let err: DbError = sqlx::Error::Protocol("unexpected message".to_string()).into();
        assert!(matches!(err, DbError::Connection { .. }));
    }
}
