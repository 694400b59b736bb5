//! scopeql-server: Operation dispatch and engine configuration
//!
//! This crate turns a parsed AST into a permission-scoped store operation:
//! - Query engine dispatching every operation kind
//! - Permission-scoped query handles with search
//! - Serialization with depth-bounded nesting and the write hook chain
//! - Lifecycle events for writes
//! - Configuration management
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               scopeql-server                 │
//! ├─────────────────────────────────────────────┤
//! │  config.rs   - Configuration management     │
//! │  handlers/   - Operation handlers           │
//! │    dispatcher.rs - Request pipeline         │
//! │    read.rs       - Reads and aggregates     │
//! │    write.rs      - Creates/updates/deletes  │
//! │    serializer.rs - Row output & hooks       │
//! │    events.rs     - Lifecycle events         │
//! └─────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod handlers;

// Re-exports for convenience
pub use config::{ConfigLoadError, EngineConfig};
pub use handlers::{OperationResult, QueryEngine, ResponseType};
