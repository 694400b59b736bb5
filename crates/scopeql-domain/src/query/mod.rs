//! Predicates, query handles and the row store interface.

mod handle;
mod predicate;
mod store;

pub use handle::{OrderTerm, QueryHandle, RenderedQuery};
pub use predicate::{
    field_segments, is_modifier, Condition, Lookup, Predicate, Transform, LOOKUP_SEP,
};
pub use store::{AggregateFunction, Changes, FieldUpdate, RowStore, StoreTransaction};
