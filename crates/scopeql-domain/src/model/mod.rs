//! Model schema, registry and relationship graph.
//!
//! This module contains:
//! - Schema definitions (fields, relations, computed fields)
//! - Per-model registration options
//! - The immutable registry and its schema reflection queries
//! - The arena-backed relationship graph used for bounded traversal

mod config;
mod graph;
mod reflector;
mod registry;
mod schema;

pub use config::{ExposedFields, LifecycleHook, ModelConfig};
pub use graph::{ModelId, ModelNode, RelationEdge, RelationshipGraph};
pub use reflector::PK_ALIAS;
pub use registry::{RegisteredModel, Registry, RegistryBuilder};
pub use schema::{AdditionalField, ComputeFn, FieldDef, FieldKind, ModelSchema, Row};
