//! Inbound AST types.
//!
//! An AST arrives as untrusted JSON. [`QueryAst::from_value`] turns it into
//! typed form; nothing here checks field references against permissions,
//! that is the validator's job.

mod expr;
mod filter;

pub use expr::{BinaryOp, DerivedExpr, ExprFunction};
pub use filter::FilterNode;

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{DomainError, DomainResult};
use crate::model::Row;
use crate::query::AggregateFunction;

/// Operation requested by an AST.
///
/// The set is closed: dispatch is an exhaustive match over this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperationKind {
    #[default]
    Read,
    Create,
    BulkCreate,
    Update,
    Delete,
    UpdateInstance,
    DeleteInstance,
    Get,
    GetOrCreate,
    UpdateOrCreate,
    First,
    Last,
    Exists,
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Aggregate,
}

impl OperationKind {
    const ALL: [OperationKind; 19] = [
        OperationKind::Read,
        OperationKind::Create,
        OperationKind::BulkCreate,
        OperationKind::Update,
        OperationKind::Delete,
        OperationKind::UpdateInstance,
        OperationKind::DeleteInstance,
        OperationKind::Get,
        OperationKind::GetOrCreate,
        OperationKind::UpdateOrCreate,
        OperationKind::First,
        OperationKind::Last,
        OperationKind::Exists,
        OperationKind::Count,
        OperationKind::Sum,
        OperationKind::Avg,
        OperationKind::Min,
        OperationKind::Max,
        OperationKind::Aggregate,
    ];

    /// Parses an operation name.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for unknown names.
    pub fn parse(name: &str) -> DomainResult<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == name)
            .ok_or_else(|| DomainError::validation(format!("Unsupported operation type: {name}")))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Create => "create",
            OperationKind::BulkCreate => "bulk_create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::UpdateInstance => "update_instance",
            OperationKind::DeleteInstance => "delete_instance",
            OperationKind::Get => "get",
            OperationKind::GetOrCreate => "get_or_create",
            OperationKind::UpdateOrCreate => "update_or_create",
            OperationKind::First => "first",
            OperationKind::Last => "last",
            OperationKind::Exists => "exists",
            OperationKind::Count => "count",
            OperationKind::Sum => "sum",
            OperationKind::Avg => "avg",
            OperationKind::Min => "min",
            OperationKind::Max => "max",
            OperationKind::Aggregate => "aggregate",
        }
    }

    /// Whether the operation may write to the store.
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            OperationKind::Create
                | OperationKind::BulkCreate
                | OperationKind::Update
                | OperationKind::Delete
                | OperationKind::UpdateInstance
                | OperationKind::DeleteInstance
                | OperationKind::GetOrCreate
                | OperationKind::UpdateOrCreate
        )
    }

    /// Aggregate function for the single-field aggregate operations.
    pub fn aggregate_function(self) -> Option<AggregateFunction> {
        match self {
            OperationKind::Count => Some(AggregateFunction::Count),
            OperationKind::Sum => Some(AggregateFunction::Sum),
            OperationKind::Avg => Some(AggregateFunction::Avg),
            OperationKind::Min => Some(AggregateFunction::Min),
            OperationKind::Max => Some(AggregateFunction::Max),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level search request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSpec {
    #[serde(default)]
    pub search_query: Option<String>,
    /// When present, narrows the model's searchable fields.
    #[serde(default)]
    pub search_fields: Option<Vec<String>>,
}

/// One aggregate in an `aggregate` operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSpec {
    pub function: AggregateFunction,
    pub field: String,
}

impl AggregateSpec {
    /// Result key, `<field>_<function>`.
    pub fn alias(&self) -> String {
        format!("{}_{}", self.field, self.function.as_str())
    }
}

/// Output shaping and pagination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializerOptions {
    #[serde(default)]
    pub depth: Option<u32>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawAggregate {
    function: String,
    field: String,
}

/// `aggregates` is accepted as a list of `{function, field}` objects or as
/// a `{function: field}` map.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawAggregates {
    List(Vec<RawAggregate>),
    Map(BTreeMap<String, String>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAst {
    #[serde(rename = "type")]
    kind: Option<String>,
    filter: Option<Value>,
    exclude: Option<Value>,
    data: Option<Value>,
    lookup: Option<Row>,
    defaults: Option<Row>,
    order_by: Option<Vec<String>>,
    select_related: Option<Vec<String>>,
    prefetch_related: Option<Vec<String>>,
    fields: Option<Vec<String>>,
    search: Option<SearchSpec>,
    field: Option<String>,
    aggregates: Option<RawAggregates>,
    serializer_options: Option<SerializerOptions>,
}

/// A parsed, not yet validated, operation request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryAst {
    pub kind: OperationKind,
    pub filter: FilterNode,
    pub exclude: FilterNode,
    /// Object for single writes, list for `bulk_create`.
    pub data: Option<Value>,
    pub lookup: Row,
    pub defaults: Row,
    pub order_by: Vec<String>,
    pub select_related: Vec<String>,
    pub prefetch_related: Vec<String>,
    pub fields: Vec<String>,
    pub search: Option<SearchSpec>,
    /// Target of the single-field aggregate operations.
    pub field: Option<String>,
    pub aggregates: Vec<AggregateSpec>,
    pub options: SerializerOptions,
}

impl QueryAst {
    /// Parses an AST from JSON. A missing `type` means `read`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for unknown operation types,
    /// unknown filter node types, unknown aggregate functions and payloads
    /// of the wrong shape.
    pub fn from_value(value: Value) -> DomainResult<Self> {
        if !value.is_object() {
            return Err(DomainError::validation("AST must be a JSON object"));
        }
        let raw: RawAst = serde_json::from_value(value)
            .map_err(|e| DomainError::validation(format!("Malformed AST: {e}")))?;

        let kind = match raw.kind.as_deref() {
            None => OperationKind::Read,
            Some(name) => OperationKind::parse(name)?,
        };

        let aggregates = match raw.aggregates {
            None => Vec::new(),
            Some(RawAggregates::List(list)) => list
                .into_iter()
                .map(|a| {
                    Ok(AggregateSpec {
                        function: AggregateFunction::parse(&a.function)?,
                        field: a.field,
                    })
                })
                .collect::<DomainResult<Vec<_>>>()?,
            Some(RawAggregates::Map(map)) => map
                .into_iter()
                .map(|(function, field)| {
                    Ok(AggregateSpec {
                        function: AggregateFunction::parse(&function)?,
                        field,
                    })
                })
                .collect::<DomainResult<Vec<_>>>()?,
        };

        Ok(Self {
            kind,
            filter: raw.filter.as_ref().map(FilterNode::parse).transpose()?.unwrap_or_default(),
            exclude: raw.exclude.as_ref().map(FilterNode::parse).transpose()?.unwrap_or_default(),
            data: raw.data,
            lookup: raw.lookup.unwrap_or_default(),
            defaults: raw.defaults.unwrap_or_default(),
            order_by: raw.order_by.unwrap_or_default(),
            select_related: raw.select_related.unwrap_or_default(),
            prefetch_related: raw.prefetch_related.unwrap_or_default(),
            fields: raw.fields.unwrap_or_default(),
            search: raw.search,
            field: raw.field,
            aggregates,
            options: raw.serializer_options.unwrap_or_default(),
        })
    }

    /// Explicitly requested field paths, serializer options first.
    pub fn requested_fields(&self) -> &[String] {
        if self.options.fields.is_empty() {
            &self.fields
        } else {
            &self.options.fields
        }
    }

    /// Read depth: one past the deepest explicit path, else the requested depth.
    pub fn read_depth(&self) -> u32 {
        let requested = self.requested_fields();
        if requested.is_empty() {
            return self.options.depth.unwrap_or(0);
        }
        let deepest = requested
            .iter()
            .map(|f| f.matches(crate::query::LOOKUP_SEP).count())
            .max()
            .unwrap_or(0);
        u32::try_from(deepest).unwrap_or(u32::MAX).saturating_add(1)
    }

    /// `data` as a single object, empty when absent.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `data` is present but not an object.
    pub fn data_object(&self) -> DomainResult<Row> {
        match &self.data {
            None | Some(Value::Null) => Ok(Row::new()),
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(_) => Err(DomainError::validation("'data' must be an object")),
        }
    }

    /// `data` as a list of objects, for bulk creation.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `data` is not a list of objects.
    pub fn data_list(&self) -> DomainResult<Vec<Row>> {
        match &self.data {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_object()
                        .cloned()
                        .ok_or_else(|| DomainError::validation("Each 'data' item must be an object"))
                })
                .collect(),
            _ => Err(DomainError::validation("'data' must be a list for bulk_create")),
        }
    }
}
