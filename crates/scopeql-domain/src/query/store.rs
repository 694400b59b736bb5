//! Row store collaborator interface.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::ast::DerivedExpr;
use crate::error::{DomainError, DomainResult};
use crate::model::Row;

use super::handle::QueryHandle;

/// Aggregate function over one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    /// Parses a function name.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for unknown functions.
    pub fn parse(name: &str) -> DomainResult<Self> {
        match name {
            "count" => Ok(Self::Count),
            "sum" => Ok(Self::Sum),
            "avg" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            other => Err(DomainError::validation(format!(
                "Unknown aggregation function: {other}"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

/// New value for one column in an update.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Set(Value),
    /// Evaluated by the store against each matched row.
    Derived(DerivedExpr),
}

/// Column updates keyed by field name.
pub type Changes = BTreeMap<String, FieldUpdate>;

/// Open store transaction.
///
/// Dropping a transaction without committing leaves the store in whatever
/// state the implementation defines; callers always commit or roll back.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn commit(self: Box<Self>) -> DomainResult<()>;

    async fn rollback(self: Box<Self>) -> DomainResult<()>;
}

/// Row store consumed by the dispatcher.
///
/// Implementations evaluate [`QueryHandle`] predicates, follow relations and
/// apply writes. Every handle the engine passes in is already scoped to what
/// the caller may see.
#[async_trait]
pub trait RowStore: Send + Sync + 'static {
    /// Starts a transaction covering every following write until it ends.
    async fn begin(&self) -> DomainResult<Box<dyn StoreTransaction>>;

    /// Rows matching the handle, ordered and windowed.
    async fn query(&self, handle: &QueryHandle) -> DomainResult<Vec<Row>>;

    /// Number of rows matching the handle's window.
    async fn count(&self, handle: &QueryHandle) -> DomainResult<u64>;

    async fn exists(&self, handle: &QueryHandle) -> DomainResult<bool> {
        Ok(self.count(handle).await? > 0)
    }

    /// Aggregates `field` over the handle's rows.
    ///
    /// `Count` returns an integer, `Avg` a float or null, the others the
    /// raw column value (null for no rows).
    async fn aggregate(
        &self,
        handle: &QueryHandle,
        function: AggregateFunction,
        field: &str,
    ) -> DomainResult<Value>;

    /// Inserts one row, returning it as stored (primary key assigned).
    async fn insert(&self, model: &str, row: Row) -> DomainResult<Row>;

    async fn insert_many(&self, model: &str, rows: Vec<Row>) -> DomainResult<Vec<Row>>;

    /// Applies `changes` to every matched row, returning their primary keys.
    async fn update_where(&self, handle: &QueryHandle, changes: &Changes)
        -> DomainResult<Vec<Value>>;

    /// Applies `changes` to one row, returning it as stored.
    async fn update_row(&self, model: &str, pk: &Value, changes: &Changes) -> DomainResult<Row>;

    /// Deletes every matched row, returning their primary keys.
    async fn delete_where(&self, handle: &QueryHandle) -> DomainResult<Vec<Value>>;

    async fn fetch_by_pk(&self, model: &str, pk: &Value) -> DomainResult<Option<Row>>;

    /// Rows reached from `row` through relation `field`.
    async fn fetch_related(&self, model: &str, row: &Row, field: &str) -> DomainResult<Vec<Row>>;
}
