//! scopeql-api: Transport-facing helpers
//!
//! This crate holds what a transport layer needs around the engine:
//! - Classification of domain errors into status codes and `{code, detail}`
//!   bodies, with internal details suppressed in production
//! - Logging initialisation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                scopeql-api                   │
//! ├─────────────────────────────────────────────┤
//! │  errors.rs       - Error classification     │
//! │  observability/  - Logging setup            │
//! └─────────────────────────────────────────────┘
//! ```

pub mod errors;
pub mod observability;

pub use errors::{classify_domain_error, classify_domain_error_with_config, ErrorConfig, ErrorKind};
