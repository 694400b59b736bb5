//! scopeql-storage: Reference row store
//!
//! This crate provides an in-memory implementation of the domain's
//! `RowStore` interface, including:
//! - Predicate evaluation with relation traversal and JSON paths
//! - Text, comparison, set, null, range and regex lookups
//! - Date/time transforms over RFC 3339 strings
//! - Derived-value updates and aggregates
//! - Snapshot transactions
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              scopeql-storage                 │
//! ├─────────────────────────────────────────────┤
//! │  error.rs   - StorageError                  │
//! │  matcher.rs - Lookup & transform evaluation │
//! │  memory.rs  - In-memory RowStore            │
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
mod matcher;
pub mod memory;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use memory::MemoryRowStore;
