//! Row serialization and write-data preparation.
//!
//! # Output
//!
//! A row is emitted with its primary key plus every field the fields map
//! permits for its model. Relations within the serializer depth whose
//! target the caller may read are emitted as nested objects; otherwise the
//! related primary key(s) are emitted.
//!
//! # Input
//!
//! Write data passes through the model's hook chain:
//!
//! 1. pre-hooks on the raw caller data
//! 2. permission filtering (unknown keys rejected under the `error` policy)
//! 3. post-hooks, which may add any writable schema field
//! 4. validation of every remaining key against the full schema

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tracing::warn;

use scopeql_domain::ast::DerivedExpr;
use scopeql_domain::model::FieldKind;
use scopeql_domain::query::{Changes, FieldUpdate, RowStore};
use scopeql_domain::resolver::{FieldOperation, FieldsMap, PermissionResolver};
use scopeql_domain::{DomainError, DomainResult, Row};

/// Serializes rows and prepares write data for one request.
pub(crate) struct RowSerializer<'a, S: RowStore> {
    store: &'a S,
    resolver: &'a PermissionResolver,
}

impl<'a, S: RowStore> RowSerializer<'a, S> {
    pub fn new(store: &'a S, resolver: &'a PermissionResolver) -> Self {
        Self { store, resolver }
    }

    pub async fn serialize_one(
        &self,
        model: &str,
        row: &Row,
        fields_map: &FieldsMap,
        depth: u32,
    ) -> DomainResult<Value> {
        self.row_value(model, row, fields_map, 0, depth).await
    }

    pub async fn serialize_many(
        &self,
        model: &str,
        rows: &[Row],
        fields_map: &FieldsMap,
        depth: u32,
    ) -> DomainResult<Value> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(self.row_value(model, row, fields_map, 0, depth).await?);
        }
        Ok(Value::Array(out))
    }

    fn row_value<'b>(
        &'b self,
        model: &'b str,
        row: &'b Row,
        fields_map: &'b FieldsMap,
        level: u32,
        depth: u32,
    ) -> BoxFuture<'b, DomainResult<Value>> {
        async move {
            let registry = self.resolver.registry();
            let pk_name = registry.pk_name(model)?;

            let mut out = Row::new();
            out.insert(
                pk_name.to_string(),
                row.get(pk_name).cloned().unwrap_or(Value::Null),
            );

            let Some(fields) = fields_map.get(model) else {
                return Ok(Value::Object(out));
            };

            for field in fields {
                if field == pk_name {
                    continue;
                }
                if let Some(computed) = registry.additional_field(model, field)? {
                    out.insert(field.clone(), computed.compute(row));
                    continue;
                }
                let Some(kind) = registry.field_kind(model, field)? else {
                    continue;
                };

                let nested_target = kind
                    .target()
                    .filter(|target| level < depth && fields_map.get(target).is_some_and(|f| !f.is_empty()));

                let value = match (kind, nested_target) {
                    (FieldKind::Scalar | FieldKind::Json, _) => {
                        row.get(field).cloned().unwrap_or(Value::Null)
                    }
                    (FieldKind::ToOne { target }, Some(_)) => {
                        let related = self.store.fetch_related(model, row, field).await?;
                        match related.first() {
                            Some(r) => self.row_value(target, r, fields_map, level + 1, depth).await?,
                            None => Value::Null,
                        }
                    }
                    (FieldKind::ToMany { target } | FieldKind::Reverse { target, .. }, Some(_)) => {
                        let related = self.store.fetch_related(model, row, field).await?;
                        let mut items = Vec::with_capacity(related.len());
                        for r in &related {
                            items.push(self.row_value(target, r, fields_map, level + 1, depth).await?);
                        }
                        Value::Array(items)
                    }
                    (FieldKind::ToOne { .. }, None) => row.get(field).cloned().unwrap_or(Value::Null),
                    (FieldKind::ToMany { .. }, None) => {
                        row.get(field).cloned().unwrap_or_else(|| Value::Array(Vec::new()))
                    }
                    (FieldKind::Reverse { target, .. }, None) => {
                        let target_pk = registry.pk_name(target)?;
                        let related = self.store.fetch_related(model, row, field).await?;
                        Value::Array(
                            related
                                .iter()
                                .map(|r| r.get(target_pk).cloned().unwrap_or(Value::Null))
                                .collect(),
                        )
                    }
                };
                out.insert(field.clone(), value);
            }

            Ok(Value::Object(out))
        }
        .boxed()
    }

    /// Runs caller data through the hook chain for `operation`.
    pub fn deserialize(&self, model: &str, data: Row, operation: FieldOperation) -> DomainResult<Row> {
        let registry = self.resolver.registry();
        let config = registry.get(model)?.config();
        let request = self.resolver.request();

        let mut data = data;
        for hook in &config.pre_hooks {
            data = hook(data, request)?;
        }

        let mut data = self.resolver.filter_writable_data(model, data, operation)?;

        // Trusted: may add fields the caller could not write.
        for hook in &config.post_hooks {
            data = hook(data, request)?;
        }

        let writable = registry.writable_fields(model)?;
        let invalid: Vec<&str> = data
            .keys()
            .filter(|k| !writable.contains(*k))
            .map(String::as_str)
            .collect();
        if !invalid.is_empty() {
            return Err(DomainError::validation(format!(
                "Invalid field(s) for model '{model}': {}",
                invalid.join(", ")
            )));
        }

        Ok(data)
    }

    /// Converts prepared update data into column changes.
    ///
    /// Derived-value expressions may only reference fields the caller can
    /// read.
    pub fn build_changes(&self, model: &str, data: Row) -> DomainResult<Changes> {
        let all_fields = self.resolver.registry().all_fields(model)?;
        let readable = self.resolver.fields(model, FieldOperation::Read)?;

        data.into_iter()
            .map(|(field, value)| {
                if !DerivedExpr::is_wrapped(&value) {
                    return Ok((field, FieldUpdate::Set(value)));
                }
                let expr = DerivedExpr::parse_wrapped(&field, &value)?;
                for referenced in expr.referenced_fields() {
                    if !all_fields.contains(&referenced) {
                        return Err(DomainError::validation(format!(
                            "Invalid F expression for field {field}: field '{referenced}' does not exist on model '{model}'"
                        )));
                    }
                    if !readable.contains(&referenced) {
                        warn!(model, field = %referenced, "expression references unreadable field");
                        return Err(DomainError::permission_denied(format!(
                            "No permission to read field '{referenced}' referenced in F expression"
                        )));
                    }
                }
                Ok((field, FieldUpdate::Derived(expr)))
            })
            .collect()
    }

    /// Checks prepared create data holds plain values only.
    pub fn plain_values(&self, data: Row) -> DomainResult<Row> {
        if let Some((field, _)) = data.iter().find(|(_, v)| DerivedExpr::is_wrapped(v)) {
            return Err(DomainError::validation(format!(
                "F expressions are only supported in updates, got one for field {field}"
            )));
        }
        Ok(data)
    }
}
