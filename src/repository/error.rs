//! Error types for repository operations

use std::fmt;

/// Result type alias for repository operations
pub type RepoResult<T> = Result<T, RepoError>;

/// Errors that can occur while talking to the relational store
#[derive(Debug)]
pub enum RepoError {
    /// Store connection failed
    ConnectionFailed(String),

    /// Query failed
    QueryFailed(String),

    /// Migration failed
    MigrationFailed(String),

    /// The requested row does not exist
    NotFound,
}

impl fmt::Display for RepoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoError::ConnectionFailed(msg) => {
                write!(f, "failed to connect to the store: {}", msg)
            }
            RepoError::QueryFailed(msg) => write!(f, "store query failed: {}", msg),
            RepoError::MigrationFailed(msg) => write!(f, "store migration failed: {}", msg),
            RepoError::NotFound => write!(f, "row not found"),
        }
    }
}

impl std::error::Error for RepoError {}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            _ => RepoError::QueryFailed(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for RepoError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        RepoError::MigrationFailed(err.to_string())
    }
}
