//! Database error types
//!
//! SQLx errors are first classified into [`DatabaseError`] by PostgreSQL
//! error code, then translated into the ledger's port errors
//! ([`StoreError`] for the record store, [`PortError`] for sequences).

use thiserror::Error;

use core_kernel::PortError;
use domain_billing::StoreError;

/// Errors that can occur during database operations
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to establish a database connection
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Unique constraint violation; carries the constraint name when known
    #[error("Duplicate entry on {constraint}: {message}")]
    DuplicateEntry { constraint: String, message: String },

    /// Check constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Transaction could not be started or committed
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Migration error
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A JSONB body or version column could not be converted
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Pool exhaustion - no available connections
    #[error("Connection pool exhausted")]
    PoolExhausted,
}

impl DatabaseError {
    /// Checks if this error is a constraint violation
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            DatabaseError::DuplicateEntry { .. } | DatabaseError::ConstraintViolation(_)
        )
    }

    /// Checks if this error is a connection-related issue
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            DatabaseError::ConnectionFailed(_) | DatabaseError::PoolExhausted
        )
    }
}

/// Maps SQLx errors to DatabaseError variants by PostgreSQL error code
impl From<sqlx::Error> for DatabaseError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::PoolTimedOut => DatabaseError::PoolExhausted,
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                DatabaseError::ConnectionFailed(error.to_string())
            }
            sqlx::Error::Database(db_err) => {
                // https://www.postgresql.org/docs/current/errcodes-appendix.html
                match db_err.code().as_deref() {
                    Some("23505") => DatabaseError::DuplicateEntry {
                        constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                        message: db_err.message().to_string(),
                    },
                    Some("23514") => DatabaseError::ConstraintViolation(db_err.message().to_string()),
                    _ => DatabaseError::QueryFailed(db_err.message().to_string()),
                }
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DatabaseError::SerializationError(error.to_string())
            }
            _ => DatabaseError::QueryFailed(error.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        DatabaseError::MigrationFailed(error.to_string())
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(error: serde_json::Error) -> Self {
        DatabaseError::SerializationError(error.to_string())
    }
}

/// Anything the store cannot attribute to a version or key race is an
/// availability problem from the ledger's point of view
impl From<DatabaseError> for StoreError {
    fn from(error: DatabaseError) -> Self {
        match error {
            DatabaseError::SerializationError(message) => StoreError::Serialization(message),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

impl From<DatabaseError> for PortError {
    fn from(error: DatabaseError) -> Self {
        if error.is_connection_error() {
            PortError::connection(error.to_string())
        } else {
            PortError::internal(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_connection_error() {
        let err = DatabaseError::from(sqlx::Error::PoolTimedOut);
        assert!(err.is_connection_error());
        assert!(matches!(PortError::from(err), PortError::Connection { .. }));
    }

    #[test]
    fn test_serialization_maps_to_store_serialization() {
        let err = DatabaseError::SerializationError("bad body".into());
        assert!(matches!(StoreError::from(err), StoreError::Serialization(_)));
    }

    #[test]
    fn test_query_failure_is_unavailable() {
        let err = DatabaseError::QueryFailed("relation missing".into());
        assert!(!err.is_constraint_violation());
        assert!(matches!(StoreError::from(err), StoreError::Unavailable(_)));
    }
}
