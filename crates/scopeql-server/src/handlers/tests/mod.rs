//! Tests for the query engine.
//!
//! The fixture registers three models over a [`MemoryRowStore`]:
//!
//! - `user`: a directory whose only readable field is `name`
//! - `item`: guarded by an owner grant, a public high-value grant and an
//!   exclusion of archived rows
//! - `note`: no providers at all
//!
//! Seeded items (`owner` is a user id):
//!
//! | id | name              | value | owner |
//! |----|-------------------|-------|-------|
//! | 1  | Alice low         | 10    | 1     |
//! | 2  | Alice high        | 500   | 1     |
//! | 3  | Bob high          | 200   | 2     |
//! | 4  | Bob low           | 5     | 2     |
//! | 5  | Archived Alice    | 50    | 1     |
//! | 6  | Archived Bob rich | 900   | 2     |


use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use scopeql_domain::model::{AdditionalField, ModelConfig, ModelSchema, Registry, Row};
use scopeql_domain::query::{
    AggregateFunction, Changes, Condition, Lookup, Predicate, QueryHandle, RowStore, StoreTransaction,
};
use scopeql_domain::resolver::{
    all_actions, Action, ActionSet, FieldOperation, FieldSet, Identity, PermissionProvider,
    RequestContext,
};
use scopeql_domain::{DomainError, DomainResult};
use scopeql_storage::MemoryRowStore;

use super::*;

pub(super) const ALICE: i64 = 1;
pub(super) const BOB: i64 = 2;

// ============================================================
// Test Mocks
// ============================================================

/// Full access to the caller's own items.
struct OwnerPermission;

impl PermissionProvider for OwnerPermission {
    fn allowed_actions(&self, request: &RequestContext, _model: &str) -> ActionSet {
        if request.identity.is_authenticated {
            all_actions()
        } else {
            ActionSet::new()
        }
    }

    fn allowed_fields(&self, _: &RequestContext, _: &str, operation: FieldOperation) -> FieldSet {
        match operation {
            FieldOperation::Read => {
                FieldSet::only(["id", "name", "value", "description", "owner", "label"])
            }
            FieldOperation::Create => FieldSet::only(["name", "value", "description", "owner"]),
            FieldOperation::Update => FieldSet::only(["name", "value", "description"]),
        }
    }

    fn filter_rows(&self, request: &RequestContext, _model: &str) -> Predicate {
        match request.user_id() {
            Some(id) => Predicate::eq("owner", id.clone()),
            None => Predicate::Nothing,
        }
    }

    fn allowed_object_actions(&self, request: &RequestContext, _: &str, row: &Row) -> ActionSet {
        match request.user_id() {
            Some(id) if row.get("owner") == Some(id) => all_actions(),
            _ => ActionSet::new(),
        }
    }
}

/// Anyone may read the name and value of items worth more than 100.
struct HighValuePermission;

impl HighValuePermission {
    fn is_high_value(row: &Row) -> bool {
        row.get("value").and_then(Value::as_i64).is_some_and(|v| v > 100)
    }
}

impl PermissionProvider for HighValuePermission {
    fn allowed_actions(&self, _: &RequestContext, _: &str) -> ActionSet {
        [Action::Read].into_iter().collect()
    }

    fn allowed_fields(&self, _: &RequestContext, _: &str, operation: FieldOperation) -> FieldSet {
        match operation {
            FieldOperation::Read => FieldSet::only(["name", "value"]),
            _ => FieldSet::none(),
        }
    }

    fn filter_rows(&self, _: &RequestContext, _: &str) -> Predicate {
        Predicate::cond(Condition::new("value", Lookup::Gt, json!(100)))
    }

    fn allowed_object_actions(&self, _: &RequestContext, _: &str, row: &Row) -> ActionSet {
        if Self::is_high_value(row) {
            [Action::Read].into_iter().collect()
        } else {
            ActionSet::new()
        }
    }
}

/// Hides archived items from everyone.
struct ArchivedExclusion;

impl PermissionProvider for ArchivedExclusion {
    fn allowed_actions(&self, _: &RequestContext, _: &str) -> ActionSet {
        ActionSet::new()
    }

    fn allowed_fields(&self, _: &RequestContext, _: &str, _: FieldOperation) -> FieldSet {
        FieldSet::none()
    }

    fn filter_rows(&self, _: &RequestContext, _: &str) -> Predicate {
        Predicate::Nothing
    }

    fn exclude_rows(&self, _: &RequestContext, _: &str) -> Predicate {
        Predicate::cond(Condition::new("name", Lookup::StartsWith, json!("Archived")))
    }

    fn allowed_object_actions(&self, _: &RequestContext, _: &str, _: &Row) -> ActionSet {
        ActionSet::new()
    }
}

/// Authenticated callers may read user names.
struct UserDirectoryPermission;

impl PermissionProvider for UserDirectoryPermission {
    fn allowed_actions(&self, request: &RequestContext, _: &str) -> ActionSet {
        if request.identity.is_authenticated {
            [Action::Read].into_iter().collect()
        } else {
            ActionSet::new()
        }
    }

    fn allowed_fields(&self, _: &RequestContext, _: &str, operation: FieldOperation) -> FieldSet {
        match operation {
            FieldOperation::Read => FieldSet::only(["name"]),
            _ => FieldSet::none(),
        }
    }

    fn allowed_object_actions(&self, request: &RequestContext, _: &str, _: &Row) -> ActionSet {
        self.allowed_actions(request, "user")
    }
}

/// Keeps every event it receives.
#[derive(Default)]
pub(super) struct RecordingEmitter {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingEmitter {
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit(&self, event: &LifecycleEvent) -> Result<(), String> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Delegates to a memory store but fails every bulk update after applying it.
pub(super) struct FailingUpdateStore {
    inner: MemoryRowStore,
}

#[async_trait]
impl RowStore for FailingUpdateStore {
    async fn begin(&self) -> DomainResult<Box<dyn StoreTransaction>> {
        self.inner.begin().await
    }

    async fn query(&self, handle: &QueryHandle) -> DomainResult<Vec<Row>> {
        self.inner.query(handle).await
    }

    async fn count(&self, handle: &QueryHandle) -> DomainResult<u64> {
        self.inner.count(handle).await
    }

    async fn aggregate(
        &self,
        handle: &QueryHandle,
        function: AggregateFunction,
        field: &str,
    ) -> DomainResult<Value> {
        self.inner.aggregate(handle, function, field).await
    }

    async fn insert(&self, model: &str, row: Row) -> DomainResult<Row> {
        self.inner.insert(model, row).await
    }

    async fn insert_many(&self, model: &str, rows: Vec<Row>) -> DomainResult<Vec<Row>> {
        self.inner.insert_many(model, rows).await
    }

    async fn update_where(&self, handle: &QueryHandle, changes: &Changes) -> DomainResult<Vec<Value>> {
        self.inner.update_where(handle, changes).await?;
        Err(DomainError::Storage {
            message: "replica lost".to_string(),
        })
    }

    async fn update_row(&self, model: &str, pk: &Value, changes: &Changes) -> DomainResult<Row> {
        self.inner.update_row(model, pk, changes).await
    }

    async fn delete_where(&self, handle: &QueryHandle) -> DomainResult<Vec<Value>> {
        self.inner.delete_where(handle).await
    }

    async fn fetch_by_pk(&self, model: &str, pk: &Value) -> DomainResult<Option<Row>> {
        self.inner.fetch_by_pk(model, pk).await
    }

    async fn fetch_related(&self, model: &str, row: &Row, field: &str) -> DomainResult<Vec<Row>> {
        self.inner.fetch_related(model, row, field).await
    }
}

// ============================================================
// Fixtures
// ============================================================

fn item_config() -> ModelConfig {
    ModelConfig::new()
        .with_provider(OwnerPermission)
        .with_provider(HighValuePermission)
        .with_provider(ArchivedExclusion)
        .with_searchable_fields(["name", "description"])
        .with_companion_fields("value", ["name"])
        .with_additional_field(AdditionalField::new("label", |row| {
            json!(format!(
                "{} ({})",
                row.get("name").and_then(Value::as_str).unwrap_or_default(),
                row.get("value").cloned().unwrap_or(Value::Null)
            ))
        }))
        .with_pre_hook(|mut data, _| {
            if let Some(Value::String(name)) = data.get("name") {
                let trimmed = name.trim().to_string();
                data.insert("name".to_string(), Value::String(trimmed));
            }
            Ok(data)
        })
        .with_post_hook(|mut data, request| {
            if let Some(id) = request.user_id() {
                data.insert("last_editor".to_string(), id.clone());
            }
            Ok(data)
        })
}

pub(super) fn registry() -> Arc<Registry> {
    let registry = Registry::builder()
        .register(
            ModelSchema::new("user", "id").scalar("email").scalar("name"),
            ModelConfig::new().with_provider(UserDirectoryPermission),
        )
        .and_then(|b| {
            b.register(
                ModelSchema::new("item", "id")
                    .scalar("name")
                    .scalar("value")
                    .scalar("description")
                    .scalar("secret")
                    .scalar("last_editor")
                    .to_one("owner", "user"),
                item_config(),
            )
        })
        .and_then(|b| b.register(ModelSchema::new("note", "id").scalar("body"), ModelConfig::new()))
        .and_then(|b| b.build())
        .expect("registry builds");
    Arc::new(registry)
}

pub(super) fn row(value: Value) -> Row {
    value.as_object().cloned().expect("object literal")
}

async fn seed(store: &MemoryRowStore) {
    store
        .insert_many(
            "user",
            vec![
                row(json!({"name": "alice", "email": "alice@example.com"})),
                row(json!({"name": "bob", "email": "bob@example.com"})),
            ],
        )
        .await
        .unwrap();
    store
        .insert_many(
            "item",
            vec![
                row(json!({"name": "Alice low", "value": 10, "owner": ALICE, "description": "blue widget", "secret": "s1"})),
                row(json!({"name": "Alice high", "value": 500, "owner": ALICE, "description": "red gadget", "secret": "s2"})),
                row(json!({"name": "Bob high", "value": 200, "owner": BOB, "description": "green widget", "secret": "s3"})),
                row(json!({"name": "Bob low", "value": 5, "owner": BOB, "description": "plain", "secret": "s4"})),
                row(json!({"name": "Archived Alice", "value": 50, "owner": ALICE, "description": "old", "secret": "s5"})),
                row(json!({"name": "Archived Bob rich", "value": 900, "owner": BOB, "description": "old", "secret": "s6"})),
            ],
        )
        .await
        .unwrap();
}

/// Engine over a seeded memory store, recording its events.
pub(super) struct Fixture {
    pub engine: QueryEngine<MemoryRowStore>,
    pub emitter: Arc<RecordingEmitter>,
}

impl Fixture {
    pub fn store(&self) -> &MemoryRowStore {
        self.engine.store()
    }

    /// The stored item, bypassing permissions.
    pub async fn stored_item(&self, id: i64) -> Option<Row> {
        self.store().fetch_by_pk("item", &json!(id)).await.unwrap()
    }
}

pub(super) async fn fixture() -> Fixture {
    let registry = registry();
    let store = MemoryRowStore::new_shared(Arc::clone(&registry));
    seed(&store).await;

    let emitter = Arc::new(RecordingEmitter::default());
    let engine = QueryEngine::new(registry, store).with_emitter(emitter.clone());
    Fixture { engine, emitter }
}

pub(super) async fn failing_update_engine() -> QueryEngine<FailingUpdateStore> {
    let registry = registry();
    let inner = MemoryRowStore::new(Arc::clone(&registry));
    seed(&inner).await;
    QueryEngine::new(registry, Arc::new(FailingUpdateStore { inner }))
}

pub(super) fn alice() -> RequestContext {
    RequestContext::new(Identity::user(ALICE))
}

pub(super) fn bob() -> RequestContext {
    RequestContext::new(Identity::user(BOB))
}

pub(super) fn anonymous() -> RequestContext {
    RequestContext::anonymous()
}

/// `{"type": "filter", "conditions": ...}`.
pub(super) fn conditions(conditions: Value) -> Value {
    json!({"type": "filter", "conditions": conditions})
}

/// Primary keys of a queryset result, in order.
pub(super) fn ids(result: &OperationResult) -> Vec<i64> {
    result
        .data
        .as_array()
        .expect("queryset data")
        .iter()
        .map(|row| row["id"].as_i64().expect("integer id"))
        .collect()
}

pub(super) fn increment(field: &str, by: i64) -> Value {
    json!({
        "__f_expr": true,
        "ast": {
            "mathjs": "OperatorNode",
            "op": "+",
            "args": [
                {"mathjs": "SymbolNode", "name": field},
                {"mathjs": "ConstantNode", "value": by}
            ]
        }
    })
}
