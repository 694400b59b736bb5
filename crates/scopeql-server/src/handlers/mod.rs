//! Operation handlers.
//!
//! [`QueryEngine`] is the entry point: it resolves permissions for a
//! request, validates the AST and dispatches on the operation kind.
//!
//! - `dispatcher` - request pipeline and transaction handling
//! - `read` - list, single-row and aggregate reads
//! - `write` - creates, updates and deletes
//! - `scoped` - permission-scoped query handles
//! - `serializer` - row output and write-data preparation
//! - `events` - lifecycle events raised by writes

mod dispatcher;
mod events;
mod read;
mod scoped;
mod serializer;
mod types;
mod write;

#[cfg(test)]
mod tests;

pub use dispatcher::{register_engine_metrics, QueryEngine};
pub use events::{EventEmitter, EventKind, LifecycleEvent, NullEmitter, GLOBAL_NAMESPACE};
pub use types::{OperationResult, ResponseType};
