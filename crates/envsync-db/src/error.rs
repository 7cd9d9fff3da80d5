//! # Store Errors
//!
//! ```text
//! sqlx::Error / MigrateError / serde_json::Error
//!       │
//!       ▼
//! DbError ──► SyncError::Store (engine, fatal for the operation)
//! ```

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    /// Unknown operation or conflict id.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A conflict references an operation that was never stored.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// UNIQUE or CHECK constraint, e.g. a failed operation without a message.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A stored JSON column no longer matches the domain types.
    #[error("Invalid stored data in {column}: {message}")]
    InvalidData { column: String, message: String },

    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn invalid_data(column: impl Into<String>, err: impl std::fmt::Display) -> Self {
        DbError::InvalidData {
            column: column.into(),
            message: err.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound { .. })
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Record", "unknown"),
            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                if message.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation { message }
                } else if message.contains("CHECK constraint failed")
                    || message.contains("UNIQUE constraint failed")
                {
                    DbError::ConstraintViolation(message)
                } else {
                    DbError::QueryFailed(message)
                }
            }
            sqlx::Error::PoolTimedOut => {
                DbError::ConnectionFailed("timed out waiting for a store connection".into())
            }
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("store is closed".into()),
            other => DbError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;
