//! scopeql-domain: Core permission-scoped execution logic
//!
//! This crate contains everything needed to decide what a caller may touch
//! before an AST reaches the row store:
//! - Model schema reflection and the relationship graph
//! - AST and query-handle types
//! - Permission resolution across providers
//! - Depth-bounded fields-map construction
//! - Predicate validation
//! - Result caching with request coalescing
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               scopeql-domain                 │
//! ├─────────────────────────────────────────────┤
//! │  model/      - Schema, registry & graph     │
//! │  ast/        - Inbound AST types            │
//! │  query/      - Predicates, handles, store   │
//! │  resolver/   - Permissions & fields maps    │
//! │  validation/ - Predicate validation         │
//! │  cache/      - Result cache & coalescer     │
//! └─────────────────────────────────────────────┘
//! ```

pub mod ast;
pub mod cache;
pub mod error;
pub mod model;
pub mod query;
pub mod resolver;
pub mod validation;

// Re-export commonly used types at the crate root
pub use cache::{CacheKey, ResultCache, ResultCacheConfig};
pub use error::{DomainError, DomainResult};
pub use model::{Registry, RegistryBuilder, Row};
pub use resolver::{PermissionResolver, RequestContext};
