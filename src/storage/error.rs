//! Database error taxonomy.

use thiserror::Error;

/// How the data access layer reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection lost or never established; recoverable by reconnecting.
    Transient,
    /// Uniqueness or referential rule violated; recoverable only by rollback.
    ConstraintViolation,
    /// Anything else. Always propagated.
    Fatal,
}

/// Errors raised by drivers and the data access layer.
#[derive(Debug, Error)]
pub enum DbError {
    /// Establishing a connection failed.
    #[error("database connect failed: {0}")]
    Connect(String),

    /// The server or file went away mid-operation (stale/dropped connection).
    #[error("operational error: {0}")]
    Operational(String),

    /// Integrity-constraint violation (e.g. duplicate unique key).
    #[error("integrity error: {0}")]
    Integrity(String),

    /// The statement itself is wrong (syntax, unknown table, bad parameters).
    #[error("statement error: {0}")]
    Statement(String),

    /// Unclassified driver failure.
    #[error(transparent)]
    Driver(Box<dyn std::error::Error + Send + Sync>),
}

impl DbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::Connect(_) | DbError::Operational(_) => ErrorKind::Transient,
            DbError::Integrity(_) => ErrorKind::ConstraintViolation,
            DbError::Statement(_) | DbError::Driver(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;
