// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Lost a compare-and-swap race; the caller may retry
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// State-illegal errors, whether raised by the domain or a service
    pub fn is_state_illegal(&self) -> bool {
        matches!(
            self,
            AppError::InvalidState(_)
                | AppError::Domain(crate::domain::DomainError::InvalidStateTransition { .. })
                | AppError::Domain(crate::domain::DomainError::InvalidBatchTransition { .. })
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Conflict(_))
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Note: sqlx::Error conversion is handled in infra-sqlite crate
// by converting to AppError::Database(String)
