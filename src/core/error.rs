//! Error type system for the library store
//!
//! Every persistence failure is classified into one of a small set of
//! categories so callers can tell a broken configuration apart from an
//! exhausted pool or a rejected statement. "Not found" and "no rows affected"
//! are never errors; repositories report them as `None`, empty vectors or
//! `false`.

use serde::Serialize;
use std::fmt;

/// Main error type for the library store
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("System initialization failed: {0}")]
    InitializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Pool exhausted past the wait bound, or a connection could not be opened
    #[error("Connection error: {0}")]
    ConnectionError(#[from] r2d2::Error),

    /// Malformed statement, constraint violation or lost connectivity mid-query
    #[error("Database error: {0}")]
    DatabaseError(#[source] rusqlite::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A stored value could not be decoded into its record field
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task error: {0}")]
    TaskError(String),
}

/// Coarse error classes surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Missing or invalid startup configuration; fatal
    Configuration,
    /// Pool exhausted or connectivity lost
    Connection,
    /// Statement rejected by the database or by record validation
    Query,
    /// Anything else (I/O, panicked tasks)
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Connection => "connection",
            ErrorCategory::Query => "query",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl LibraryError {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            LibraryError::InitializationError(_) | LibraryError::ConfigError(_) => {
                ErrorCategory::Configuration
            }
            LibraryError::ConnectionError(_) => ErrorCategory::Connection,
            LibraryError::DatabaseError(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    rusqlite::ErrorCode::CannotOpen
                        | rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                ErrorCategory::Connection
            }
            LibraryError::DatabaseError(_)
            | LibraryError::ValidationError(_)
            | LibraryError::InvalidData(_) => ErrorCategory::Query,
            LibraryError::IoError(_) | LibraryError::TaskError(_) => ErrorCategory::Internal,
        }
    }

    /// Get the error type name, used as a structured log field
    pub fn error_type(&self) -> &'static str {
        match self {
            LibraryError::InitializationError(_) => "InitializationError",
            LibraryError::ConfigError(_) => "ConfigError",
            LibraryError::ConnectionError(_) => "ConnectionError",
            LibraryError::DatabaseError(_) => "DatabaseError",
            LibraryError::ValidationError(_) => "ValidationError",
            LibraryError::InvalidData(_) => "InvalidData",
            LibraryError::IoError(_) => "IoError",
            LibraryError::TaskError(_) => "TaskError",
        }
    }

    /// True when the database rejected a statement because of a
    /// UNIQUE, CHECK, NOT NULL or FOREIGN KEY constraint
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            LibraryError::DatabaseError(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

impl From<rusqlite::Error> for LibraryError {
    /// Column values that cannot be decoded into a record field become
    /// `InvalidData`; everything else stays a `DatabaseError`.
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::FromSqlConversionFailure(index, ty, source) => {
                LibraryError::InvalidData(format!("column {} ({}): {}", index, ty, source))
            }
            rusqlite::Error::InvalidColumnType(index, name, ty) => LibraryError::InvalidData(
                format!("column {} '{}' holds an unexpected {}", index, name, ty),
            ),
            other => LibraryError::DatabaseError(other),
        }
    }
}

impl From<crate::core::config::ConfigError> for LibraryError {
    fn from(err: crate::core::config::ConfigError) -> Self {
        LibraryError::ConfigError(err.to_string())
    }
}

/// Result type alias for operations that can fail with LibraryError
pub type Result<T> = std::result::Result<T, LibraryError>;

/// Context extension trait for adding context to startup errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context to an error using a closure
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| LibraryError::InitializationError(format!("{}: {}", context.into(), e)))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| LibraryError::InitializationError(format!("{}: {}", f(), e)))
    }
}
