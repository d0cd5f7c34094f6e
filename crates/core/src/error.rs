// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    /// Malformed request, rejected before any row is written
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    /// Deadlock, lock timeout or lost connection; safe to retry the whole operation
    #[error("Transient store error: {0}")]
    TransientStore(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness violation (process name, recurring run)
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Unknown handler: {0}")]
    UnknownHandler(String),

    #[error("Execution error: {0}")]
    Execution(#[from] crate::port::ExecutionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for store failures that a bounded retry can recover from
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::TransientStore(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Note: sqlx::Error conversion is handled in the infra-sqlite crate
// (map_sqlx_error) to keep this crate free of database dependencies

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AppError::TransientStore("database is locked".into()).is_transient());
        assert!(!AppError::Database("disk I/O error".into()).is_transient());
        assert!(!AppError::Validation("queue_name is required".into()).is_transient());
    }

    #[test]
    fn test_not_found_classification() {
        assert!(AppError::NotFound("job 7".into()).is_not_found());
        assert!(!AppError::Conflict("job 7".into()).is_not_found());
    }
}
