//! Storage error types.

use scopeql_domain::DomainError;
use thiserror::Error;

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No table exists for the model.
    #[error("model not found: {model}")]
    ModelNotFound { model: String },

    /// No row with the given primary key.
    #[error("row not found: {model} pk={pk}")]
    RowNotFound { model: String, pk: String },

    /// A row with the same primary key is already stored.
    #[error("duplicate primary key: {model} pk={pk}")]
    DuplicateKey { model: String, pk: String },

    /// A condition the store cannot evaluate, such as a malformed regex.
    #[error("invalid filter: {message}")]
    InvalidFilter { message: String },

    /// Write data the store cannot accept.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Internal error.
    #[error("internal storage error: {message}")]
    InternalError { message: String },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for DomainError {
    fn from(err: StorageError) -> Self {
        match err {
            // Caller-supplied values the store could not interpret.
            StorageError::InvalidFilter { message } | StorageError::InvalidInput { message } => {
                DomainError::validation(message)
            }
            other => DomainError::Storage {
                message: other.to_string(),
            },
        }
    }
}
