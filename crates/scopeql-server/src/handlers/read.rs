//! Read-only operations: list reads, single-row reads and aggregates.

use serde_json::Value;

use scopeql_domain::query::{AggregateFunction, QueryHandle, RowStore};
use scopeql_domain::resolver::{Action, FieldsMap};
use scopeql_domain::{DomainError, DomainResult, Row};

use super::dispatcher::{QueryEngine, RequestScope};
use super::scoped::dependent_models;
use super::types::{OperationResult, ResponseType};

impl<S: RowStore> QueryEngine<S> {
    /// Paginated list read.
    ///
    /// Visibility comes from the row scope alone; no object-level check runs
    /// per row. The window is applied before the cache lookup, so each page
    /// is its own cache entry.
    pub(super) async fn handle_read(&self, scope: &RequestScope<'_>) -> DomainResult<OperationResult> {
        let options = &scope.ast.options;
        let page = scope
            .handle
            .clone()
            .sliced(options.offset.unwrap_or(0), options.limit.or(self.default_limit()));

        let context = format!(
            "read:depth={}:fields={}",
            scope.depth,
            fields_fingerprint(&scope.read_map)
        );
        let key = self.cache_key(scope, &page, &context)?;
        let txn_id = scope.request().txn_id.as_deref().unwrap_or_default();
        let depends_on = dependent_models(self.registry(), &page, &scope.read_map, &[])?;

        let data = self
            .cache()
            .get_or_compute(key, txn_id, &depends_on, || async move {
                let rows = self.store().query(&page).await?;
                scope
                    .serializer(self.store())
                    .serialize_many(scope.model, &rows, &scope.read_map, scope.depth)
                    .await
            })
            .await?;

        Ok(OperationResult::new(data, ResponseType::Queryset).with_flag("read", true))
    }

    pub(super) async fn handle_get(&self, scope: &RequestScope<'_>) -> DomainResult<OperationResult> {
        let row = self.fetch_exactly_one(scope.model, &scope.handle, "query").await?;
        scope
            .resolver
            .check_object_permissions(scope.model, &row, Action::Read)?;

        let data = scope
            .serializer(self.store())
            .serialize_one(scope.model, &row, &scope.read_map, scope.depth)
            .await?;
        Ok(OperationResult::new(data, ResponseType::Instance).with_flag("get", true))
    }

    /// First row of the handle, or the last one when `last` is set.
    ///
    /// Without an ordering, "last" means the highest primary key.
    pub(super) async fn handle_first_or_last(
        &self,
        scope: &RequestScope<'_>,
        last: bool,
    ) -> DomainResult<OperationResult> {
        let handle = if last {
            scope.handle.clone().reversed()
        } else {
            scope.handle.clone()
        };
        let row = self.store().query(&handle.sliced(0, Some(1))).await?.into_iter().next();

        let data = match row {
            Some(row) => {
                scope
                    .resolver
                    .check_object_permissions(scope.model, &row, Action::Read)?;
                scope
                    .serializer(self.store())
                    .serialize_one(scope.model, &row, &scope.read_map, scope.depth)
                    .await?
            }
            None => Value::Null,
        };

        let flag = if last { "last" } else { "first" };
        Ok(OperationResult::new(data, ResponseType::Instance).with_flag(flag, true))
    }

    pub(super) async fn handle_exists(&self, scope: &RequestScope<'_>) -> DomainResult<OperationResult> {
        let exists = self.store().exists(&scope.handle.unsliced()).await?;
        Ok(OperationResult::new(Value::Bool(exists), ResponseType::Boolean).with_flag("exists", exists))
    }

    /// `count`, `sum`, `avg`, `min` and `max` over the AST's `field`.
    pub(super) async fn handle_field_aggregate(
        &self,
        scope: &RequestScope<'_>,
    ) -> DomainResult<OperationResult> {
        let function = scope.ast.kind.aggregate_function().ok_or_else(|| {
            DomainError::internal(format!("{} is not an aggregate operation", scope.ast.kind))
        })?;
        let field = scope
            .ast
            .field
            .as_deref()
            .ok_or_else(|| DomainError::validation("Field must be provided for aggregate operations."))?;

        let value = self.cached_aggregate(scope, function, field).await?;
        Ok(OperationResult::new(value, ResponseType::Number).with_flag(function.as_str(), true))
    }

    /// Several aggregates at once, keyed `<field>_<function>`.
    pub(super) async fn handle_aggregate(&self, scope: &RequestScope<'_>) -> DomainResult<OperationResult> {
        let mut out = Row::new();
        for spec in &scope.ast.aggregates {
            let value = self.cached_aggregate(scope, spec.function, &spec.field).await?;
            out.insert(spec.alias(), value);
        }
        Ok(OperationResult::new(Value::Object(out), ResponseType::Number).with_flag("aggregate", true))
    }

    /// Aggregates go through the cache with the function and field as
    /// context, since they share the row scope of every other aggregate.
    async fn cached_aggregate(
        &self,
        scope: &RequestScope<'_>,
        function: AggregateFunction,
        field: &str,
    ) -> DomainResult<Value> {
        let handle = scope.handle.unsliced();
        let context = format!("{}:{}", function.as_str(), field);
        let key = self.cache_key(scope, &handle, &context)?;
        let txn_id = scope.request().txn_id.as_deref().unwrap_or_default();
        let depends_on = dependent_models(self.registry(), &handle, &FieldsMap::new(), &[field])?;

        self.cache()
            .get_or_compute(key, txn_id, &depends_on, || {
                self.store().aggregate(&handle, function, field)
            })
            .await
    }

    /// The only row matching `handle`.
    ///
    /// `subject` names what was matched in error messages.
    pub(super) async fn fetch_exactly_one(
        &self,
        model: &str,
        handle: &QueryHandle,
        subject: &str,
    ) -> DomainResult<Row> {
        let mut rows = self.store().query(&handle.clone().sliced(0, Some(2))).await?;
        match rows.len() {
            0 => Err(DomainError::not_found(format!(
                "No {model} matches the given {subject}."
            ))),
            1 => Ok(rows.remove(0)),
            _ => Err(DomainError::multiple_objects(format!(
                "Multiple {model} instances match the given {subject}."
            ))),
        }
    }
}

/// Stable text form of a fields map, for cache contexts.
fn fields_fingerprint(map: &FieldsMap) -> String {
    map.models()
        .map(|(model, fields)| {
            let names: Vec<&str> = fields.iter().map(String::as_str).collect();
            format!("{model}({})", names.join(","))
        })
        .collect::<Vec<_>>()
        .join(";")
}
