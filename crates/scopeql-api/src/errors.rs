//! Shared error handling utilities for transport layers.
//!
//! Domain errors are classified into a protocol-agnostic [`ErrorKind`],
//! which maps to a status code and renders as a `{code, detail}` body.
//!
//! # Error Detail Configuration
//!
//! The user-visible kinds (validation, permission, not-found, multiple
//! rows) always keep their detail; it was written for the caller. For
//! everything else [`ErrorConfig`] decides whether the underlying message
//! is shown or replaced with a generic one.
//!
//! ```rust
//! use scopeql_api::errors::{classify_domain_error_with_config, ErrorConfig};
//! use scopeql_domain::DomainError;
//!
//! let err = DomainError::Storage { message: "connection reset by 10.0.0.7".to_string() };
//!
//! let body = classify_domain_error_with_config(&err, &ErrorConfig::production()).body();
//! assert!(!body.detail.contains("10.0.0.7"));
//!
//! let body = classify_domain_error_with_config(&err, &ErrorConfig::development()).body();
//! assert!(body.detail.contains("10.0.0.7"));
//! ```

use serde::Serialize;

use scopeql_domain::DomainError;

/// Generic detail for internal failures in production.
const INTERNAL_DETAIL: &str = "internal error";

/// Configuration for error message detail level.
#[derive(Debug, Clone, Default)]
pub struct ErrorConfig {
    /// Whether internal error messages reach the client.
    ///
    /// When `false` (production mode), internal failures and unknown model
    /// names are replaced with generic messages.
    pub detailed_errors: bool,
}

impl ErrorConfig {
    /// Hides internal details. Recommended for deployments.
    pub fn production() -> Self {
        Self {
            detailed_errors: false,
        }
    }

    /// Shows full error details.
    pub fn development() -> Self {
        Self {
            detailed_errors: true,
        }
    }
}

/// Protocol-agnostic classification of a domain error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Client error - malformed request or too many rows (400)
    InvalidInput { code: &'static str, detail: String },
    /// Caller lacks a permission (403)
    PermissionDenied { detail: String },
    /// No row matched a single-row operation (404)
    NotFound { detail: String },
    /// Unexpected server error (500)
    Internal { detail: String },
}

/// JSON error body returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub detail: String,
}

impl ErrorKind {
    /// HTTP-equivalent status code.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::InvalidInput { .. } => 400,
            ErrorKind::PermissionDenied { .. } => 403,
            ErrorKind::NotFound { .. } => 404,
            ErrorKind::Internal { .. } => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput { code, .. } => code,
            ErrorKind::PermissionDenied { .. } => "permission_denied",
            ErrorKind::NotFound { .. } => "not_found",
            ErrorKind::Internal { .. } => "internal_error",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            ErrorKind::InvalidInput { detail, .. }
            | ErrorKind::PermissionDenied { detail }
            | ErrorKind::NotFound { detail }
            | ErrorKind::Internal { detail } => detail,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            detail: self.detail().to_string(),
        }
    }
}

/// Classifies a domain error in production mode.
///
/// This is the safe default for client-facing responses; use
/// [`classify_domain_error_with_config`] with [`ErrorConfig::development()`]
/// to see internal details.
pub fn classify_domain_error(err: &DomainError) -> ErrorKind {
    classify_domain_error_with_config(err, &ErrorConfig::production())
}

/// Classifies a domain error with configurable detail level.
pub fn classify_domain_error_with_config(err: &DomainError, config: &ErrorConfig) -> ErrorKind {
    match err {
        DomainError::Validation { detail } => ErrorKind::InvalidInput {
            code: err.code(),
            detail: detail.clone(),
        },
        DomainError::MultipleObjectsReturned { detail } => ErrorKind::InvalidInput {
            code: err.code(),
            detail: detail.clone(),
        },
        DomainError::ModelNotRegistered { .. } => ErrorKind::InvalidInput {
            code: err.code(),
            detail: if config.detailed_errors {
                err.to_string()
            } else {
                "model not registered".to_string()
            },
        },
        DomainError::PermissionDenied { detail } => ErrorKind::PermissionDenied {
            detail: detail.clone(),
        },
        DomainError::NotFound { detail } => ErrorKind::NotFound {
            detail: detail.clone(),
        },
        DomainError::DuplicateRegistration { .. }
        | DomainError::Storage { .. }
        | DomainError::Internal { .. } => ErrorKind::Internal {
            detail: if config.detailed_errors {
                err.to_string()
            } else {
                INTERNAL_DETAIL.to_string()
            },
        },
    }
}
