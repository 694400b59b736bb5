//! Domain error types for permission-scoped operations.

use thiserror::Error;

/// Domain-specific errors raised while validating or executing an AST.
///
/// The first four variants are user-visible: their `detail` is safe to
/// return to the caller. Everything else is an internal failure.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Malformed AST, unknown field, computed field in a filter, bad aggregate.
    #[error("{detail}")]
    Validation { detail: String },

    /// Action not granted, field outside the resolved set, object/bulk check failed.
    #[error("{detail}")]
    PermissionDenied { detail: String },

    /// Zero rows for a single-row operation.
    #[error("{detail}")]
    NotFound { detail: String },

    /// More than one row for a single-row operation.
    #[error("{detail}")]
    MultipleObjectsReturned { detail: String },

    /// The requested model was never registered.
    #[error("model not registered: {model}")]
    ModelNotRegistered { model: String },

    /// A model was registered more than once.
    #[error("model registered more than once: {model}")]
    DuplicateRegistration { model: String },

    /// Row store failure.
    #[error("storage error: {message}")]
    Storage { message: String },

    /// Anything else.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl DomainError {
    pub fn validation(detail: impl Into<String>) -> Self {
        Self::Validation {
            detail: detail.into(),
        }
    }

    pub fn permission_denied(detail: impl Into<String>) -> Self {
        Self::PermissionDenied {
            detail: detail.into(),
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::NotFound {
            detail: detail.into(),
        }
    }

    pub fn multiple_objects(detail: impl Into<String>) -> Self {
        Self::MultipleObjectsReturned {
            detail: detail.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } | Self::ModelNotRegistered { .. } => "validation_error",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::NotFound { .. } => "not_found",
            Self::MultipleObjectsReturned { .. } => "multiple_objects_returned",
            Self::DuplicateRegistration { .. } | Self::Storage { .. } | Self::Internal { .. } => {
                "internal_error"
            }
        }
    }

    /// Whether the detail of this error may be shown to the caller.
    pub fn is_user_visible(&self) -> bool {
        !matches!(
            self,
            Self::DuplicateRegistration { .. } | Self::Storage { .. } | Self::Internal { .. }
        )
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
