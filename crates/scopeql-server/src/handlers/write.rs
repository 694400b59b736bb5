//! Mutating operations.
//!
//! Every handler here runs inside the request's store transaction. Caller
//! data goes through [`RowSerializer::deserialize`] before anything is
//! written, and permission checks complete before the first store write,
//! so a rejected request leaves no partial state behind.
//!
//! [`RowSerializer::deserialize`]: super::serializer::RowSerializer::deserialize

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::debug;

use scopeql_domain::ast::FilterNode;
use scopeql_domain::model::PK_ALIAS;
use scopeql_domain::query::{QueryHandle, RowStore, LOOKUP_SEP};
use scopeql_domain::resolver::{Action, FieldOperation, FieldsMap};
use scopeql_domain::{DomainError, DomainResult, Row};

use super::dispatcher::{QueryEngine, RequestScope};
use super::events::{EventKind, PendingEvents};
use super::scoped;
use super::types::{OperationResult, ResponseType};

impl<S: RowStore> QueryEngine<S> {
    pub(super) async fn handle_create(
        &self,
        scope: &RequestScope<'_>,
        events: &mut PendingEvents,
    ) -> DomainResult<OperationResult> {
        let serializer = scope.serializer(self.store());
        let data = serializer.deserialize(scope.model, scope.ast.data_object()?, FieldOperation::Create)?;
        let row = self
            .store()
            .insert(scope.model, serializer.plain_values(data)?)
            .await?;

        let pk_name = scope.pk_name()?;
        events.push(EventKind::Create, scope.model, pk_name, vec![pk_of(&row, pk_name)]);

        let data = serializer
            .serialize_one(scope.model, &row, &scope.read_map, scope.depth)
            .await?;
        Ok(OperationResult::new(data, ResponseType::Instance).with_flag("created", true))
    }

    /// Inserts every row of `data` in one batch; any invalid item rejects the
    /// whole list.
    pub(super) async fn handle_bulk_create(
        &self,
        scope: &RequestScope<'_>,
        events: &mut PendingEvents,
    ) -> DomainResult<OperationResult> {
        let serializer = scope.serializer(self.store());
        let rows = scope
            .ast
            .data_list()?
            .into_iter()
            .map(|item| {
                let data = serializer.deserialize(scope.model, item, FieldOperation::Create)?;
                serializer.plain_values(data)
            })
            .collect::<DomainResult<Vec<_>>>()?;

        let created = self.store().insert_many(scope.model, rows).await?;

        let pk_name = scope.pk_name()?;
        events.push(
            EventKind::BulkCreate,
            scope.model,
            pk_name,
            created.iter().map(|r| pk_of(r, pk_name)).collect(),
        );

        let count = created.len();
        let data = serializer
            .serialize_many(scope.model, &created, &scope.read_map, scope.depth)
            .await?;
        Ok(OperationResult::new(data, ResponseType::Queryset)
            .with_flag("created", true)
            .with_flag("created_count", count))
    }

    /// Updates every row in scope with one batched write.
    ///
    /// The response re-reads only the updated rows, limited to the updated
    /// columns plus their companion columns.
    pub(super) async fn handle_update(
        &self,
        scope: &RequestScope<'_>,
        events: &mut PendingEvents,
    ) -> DomainResult<OperationResult> {
        let serializer = scope.serializer(self.store());
        let data = serializer.deserialize(scope.model, scope.ast.data_object()?, FieldOperation::Update)?;
        let updated_fields: BTreeSet<String> = data.keys().cloned().collect();
        let changes = serializer.build_changes(scope.model, data)?;

        let target = scope.handle.unsliced();
        let rows = self.store().query(&target).await?;
        scope
            .resolver
            .check_bulk_permissions(scope.model, &rows, Action::Update)?;

        let pks = self.store().update_where(&target, &changes).await?;
        debug!(model = scope.model, updated = pks.len(), "bulk update applied");

        let pk_name = scope.pk_name()?;
        events.push(EventKind::BulkUpdate, scope.model, pk_name, pks.clone());

        let count = pks.len();
        let refreshed = self
            .store()
            .query(&QueryHandle::new(scope.model).with_pks(pks))
            .await?;
        let map = self.update_response_map(scope, &updated_fields)?;
        let data = serializer.serialize_many(scope.model, &refreshed, &map, 0).await?;

        Ok(OperationResult::new(data, ResponseType::Queryset)
            .with_flag("updated", true)
            .with_flag("updated_count", count))
    }

    /// Deletes every row in scope, reporting the deleted primary keys.
    pub(super) async fn handle_delete(
        &self,
        scope: &RequestScope<'_>,
        events: &mut PendingEvents,
    ) -> DomainResult<OperationResult> {
        let target = scope.handle.unsliced();
        let rows = self.store().query(&target).await?;
        scope
            .resolver
            .check_bulk_permissions(scope.model, &rows, Action::Delete)?;

        let pks = self.store().delete_where(&target).await?;

        let pk_name = scope.pk_name()?;
        events.push(EventKind::BulkDelete, scope.model, pk_name, pks.clone());

        let rows_deleted: Vec<Value> = pks
            .iter()
            .map(|pk| {
                let mut entry = Row::new();
                entry.insert(pk_name.to_string(), pk.clone());
                Value::Object(entry)
            })
            .collect();

        Ok(OperationResult::new(Value::Null, ResponseType::Number)
            .with_flag("deleted", true)
            .with_flag("deleted_count", pks.len())
            .with_flag("rows_deleted", rows_deleted))
    }

    pub(super) async fn handle_update_instance(
        &self,
        scope: &RequestScope<'_>,
        events: &mut PendingEvents,
    ) -> DomainResult<OperationResult> {
        let row = self.locate_instance(scope).await?;
        scope
            .resolver
            .check_object_permissions(scope.model, &row, Action::Update)?;

        let pk_name = scope.pk_name()?;
        let pk = pk_of(&row, pk_name);
        let updated = self
            .apply_instance_update(scope, &pk, scope.ast.data_object()?)
            .await?;
        events.push(EventKind::Update, scope.model, pk_name, vec![pk]);

        let data = scope
            .serializer(self.store())
            .serialize_one(scope.model, &updated, &scope.read_map, scope.depth)
            .await?;
        Ok(OperationResult::new(data, ResponseType::Instance).with_flag("updated", true))
    }

    pub(super) async fn handle_delete_instance(
        &self,
        scope: &RequestScope<'_>,
        events: &mut PendingEvents,
    ) -> DomainResult<OperationResult> {
        let row = self.locate_instance(scope).await?;
        scope
            .resolver
            .check_object_permissions(scope.model, &row, Action::Delete)?;

        let pk_name = scope.pk_name()?;
        let pk = pk_of(&row, pk_name);
        let deleted = self
            .store()
            .delete_where(&QueryHandle::new(scope.model).with_pks(vec![pk]))
            .await?;
        events.push(EventKind::Delete, scope.model, pk_name, deleted);

        Ok(OperationResult::new(Value::Bool(true), ResponseType::Boolean).with_flag("deleted", true))
    }

    /// `get_or_create`, or `update_or_create` when `update` is set.
    ///
    /// The lookup runs inside the caller's row scope, so a row the caller
    /// cannot see counts as a miss.
    pub(super) async fn handle_get_or_create(
        &self,
        scope: &RequestScope<'_>,
        events: &mut PendingEvents,
        update: bool,
    ) -> DomainResult<OperationResult> {
        let lookup = scoped::lookup_predicate(&scope.ast.lookup)?;
        let existing = self
            .store()
            .query(&scope.handle.clone().filter(lookup).sliced(0, Some(2)))
            .await?;
        if existing.len() > 1 {
            return Err(DomainError::multiple_objects(format!(
                "Multiple {} instances match the given lookup.",
                scope.model
            )));
        }

        let pk_name = scope.pk_name()?;
        let serializer = scope.serializer(self.store());

        let (row, created) = match existing.into_iter().next() {
            Some(row) if update => {
                scope
                    .resolver
                    .check_object_permissions(scope.model, &row, Action::Update)?;
                let pk = pk_of(&row, pk_name);
                let updated = self
                    .apply_instance_update(scope, &pk, scope.ast.defaults.clone())
                    .await?;
                events.push(EventKind::Update, scope.model, pk_name, vec![pk]);
                (updated, false)
            }
            Some(row) => {
                scope
                    .resolver
                    .check_object_permissions(scope.model, &row, Action::Read)?;
                (row, false)
            }
            None => {
                scope.resolver.require_action(scope.model, Action::Create)?;
                let merged = creation_data(&scope.ast.lookup, &scope.ast.defaults, pk_name);
                let data = serializer.deserialize(scope.model, merged, FieldOperation::Create)?;
                let row = self
                    .store()
                    .insert(scope.model, serializer.plain_values(data)?)
                    .await?;
                events.push(EventKind::Create, scope.model, pk_name, vec![pk_of(&row, pk_name)]);
                (row, true)
            }
        };

        let data = serializer
            .serialize_one(scope.model, &row, &scope.read_map, scope.depth)
            .await?;
        let mut result = OperationResult::new(data, ResponseType::Instance).with_flag("created", created);
        if update {
            result = result.with_flag("updated", !created);
        }
        Ok(result)
    }

    /// The single row an `*_instance` operation targets.
    async fn locate_instance(&self, scope: &RequestScope<'_>) -> DomainResult<Row> {
        if scope.ast.filter == FilterNode::Empty {
            return Err(DomainError::validation(format!(
                "Filter is required for {} operation",
                scope.ast.kind
            )));
        }
        self.fetch_exactly_one(scope.model, &scope.handle, "query").await
    }

    async fn apply_instance_update(
        &self,
        scope: &RequestScope<'_>,
        pk: &Value,
        data: Row,
    ) -> DomainResult<Row> {
        let serializer = scope.serializer(self.store());
        let data = serializer.deserialize(scope.model, data, FieldOperation::Update)?;
        let changes = serializer.build_changes(scope.model, data)?;
        self.store().update_row(scope.model, pk, &changes).await
    }

    /// Read fields for an `update` response: the updated columns and the
    /// companions their representation needs, as far as the caller may read
    /// them.
    fn update_response_map(
        &self,
        scope: &RequestScope<'_>,
        updated_fields: &BTreeSet<String>,
    ) -> DomainResult<FieldsMap> {
        let companions = &self.registry().get(scope.model)?.config().companion_fields;
        let readable = scope.resolver.fields(scope.model, FieldOperation::Read)?;

        let mut wanted = updated_fields.clone();
        for field in updated_fields {
            if let Some(extra) = companions.get(field) {
                wanted.extend(extra.iter().cloned());
            }
        }

        let mut map = FieldsMap::new();
        map.extend(
            scope.model,
            wanted.into_iter().filter(|f| readable.contains(f)),
        );
        Ok(map)
    }
}

fn pk_of(row: &Row, pk_name: &str) -> Value {
    row.get(pk_name).cloned().unwrap_or(Value::Null)
}

/// Data for the row `get_or_create` inserts on a miss: the plain lookup
/// keys, overridden by `defaults`.
///
/// Lookup keys carrying a relation path or lookup suffix do not name a
/// column and are left out.
fn creation_data(lookup: &Row, defaults: &Row, pk_name: &str) -> Row {
    let mut data: Row = lookup
        .iter()
        .filter(|(key, _)| !key.contains(LOOKUP_SEP))
        .map(|(key, value)| {
            let key = if key == PK_ALIAS { pk_name } else { key.as_str() };
            (key.to_string(), value.clone())
        })
        .collect();
    for (key, value) in defaults {
        data.insert(key.clone(), value.clone());
    }
    data
}
