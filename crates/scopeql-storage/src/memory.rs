//! In-memory row store.
//!
//! One [`Table`] per model, keyed by model name in a `DashMap`. Rows keep
//! insertion order, which is the default ordering of every query. Relation
//! columns hold primary keys: a to-one column holds one key, a to-many
//! column an array of keys. Reverse relations are computed by scanning the
//! related table for rows pointing back.
//!
//! Transactions serialize writers behind a tokio mutex and snapshot every
//! table on `begin`; a rollback, or dropping an unfinished transaction,
//! restores the snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use scopeql_domain::model::{FieldKind, Registry, Row};
use scopeql_domain::query::{
    AggregateFunction, Changes, FieldUpdate, Predicate, QueryHandle, RowStore, StoreTransaction,
    LOOKUP_SEP,
};
use scopeql_domain::{DomainError, DomainResult};
use serde_json::{json, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument};

use crate::error::{StorageError, StorageResult};
use crate::matcher::{self, RegexCache};

/// Rows of one model in insertion order.
#[derive(Debug, Clone, Default)]
struct Table {
    rows: BTreeMap<u64, Row>,
    by_pk: HashMap<String, u64>,
    next_seq: u64,
    last_id: i64,
}

impl Table {
    fn insert(&mut self, model: &str, pk_name: &str, mut row: Row) -> StorageResult<Row> {
        let pk = match row.get(pk_name).filter(|pk| !pk.is_null()).cloned() {
            Some(pk) => pk,
            None => {
                self.last_id += 1;
                let pk = json!(self.last_id);
                row.insert(pk_name.to_string(), pk.clone());
                pk
            }
        };
        if let Some(id) = pk.as_i64() {
            self.last_id = self.last_id.max(id);
        }

        let key = pk_key(&pk);
        if self.by_pk.contains_key(&key) {
            return Err(StorageError::DuplicateKey {
                model: model.to_string(),
                pk: key,
            });
        }
        self.next_seq += 1;
        self.by_pk.insert(key, self.next_seq);
        self.rows.insert(self.next_seq, row.clone());
        Ok(row)
    }

    fn get(&self, pk: &Value) -> Option<&Row> {
        self.by_pk.get(&pk_key(pk)).and_then(|seq| self.rows.get(seq))
    }

    fn get_mut(&mut self, pk: &Value) -> Option<&mut Row> {
        let seq = *self.by_pk.get(&pk_key(pk))?;
        self.rows.get_mut(&seq)
    }

    fn remove(&mut self, pk: &Value) -> Option<Row> {
        let seq = self.by_pk.remove(&pk_key(pk))?;
        self.rows.remove(&seq)
    }
}

/// Index key for a primary key; `1` and `"1"` address the same row.
fn pk_key(pk: &Value) -> String {
    match pk {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => n.to_string(),
        },
        other => other.to_string(),
    }
}

type Tables = DashMap<String, Table>;

/// In-memory implementation of [`RowStore`].
///
/// # Performance Characteristics
///
/// - **Insert / fetch by pk / update by pk**: O(1) average
/// - **Query**: O(N) scan of the model's table, plus relation lookups
///   for conditions that traverse relations
#[derive(Debug)]
pub struct MemoryRowStore {
    registry: Arc<Registry>,
    tables: Arc<Tables>,
    write_lock: Arc<Mutex<()>>,
    regexes: RegexCache,
}

impl MemoryRowStore {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            tables: Arc::new(DashMap::new()),
            write_lock: Arc::new(Mutex::new(())),
            regexes: RegexCache::default(),
        }
    }

    pub fn new_shared(registry: Arc<Registry>) -> Arc<Self> {
        Arc::new(Self::new(registry))
    }

    /// Number of stored rows for `model`.
    pub fn len(&self, model: &str) -> usize {
        self.tables.get(model).map(|t| t.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, model: &str) -> bool {
        self.len(model) == 0
    }

    fn pk_name(&self, model: &str) -> StorageResult<String> {
        self.registry
            .pk_name(model)
            .map(str::to_string)
            .map_err(|_| StorageError::ModelNotFound {
                model: model.to_string(),
            })
    }

    /// Declared kind of `field`, reverse relations included.
    fn kind(&self, model: &str, field: &str) -> StorageResult<Option<FieldKind>> {
        let registered = self.registry.get(model).map_err(|_| StorageError::ModelNotFound {
            model: model.to_string(),
        })?;
        Ok(registered.schema().field(field).map(|f| f.kind.clone()))
    }

    fn snapshot_rows(&self, model: &str) -> StorageResult<Vec<Row>> {
        self.pk_name(model)?;
        Ok(self
            .tables
            .get(model)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default())
    }

    fn fetch(&self, model: &str, pk: &Value) -> Option<Row> {
        self.tables.get(model).and_then(|t| t.get(pk).cloned())
    }

    /// Rows reached from `row` through relation `field`.
    fn related(&self, model: &str, row: &Row, field: &str) -> StorageResult<Vec<Row>> {
        match self.kind(model, field)? {
            Some(FieldKind::ToOne { target }) => Ok(row
                .get(field)
                .filter(|pk| !pk.is_null())
                .and_then(|pk| self.fetch(&target, pk))
                .into_iter()
                .collect()),
            Some(FieldKind::ToMany { target }) => Ok(row
                .get(field)
                .and_then(Value::as_array)
                .map(|pks| pks.iter().filter_map(|pk| self.fetch(&target, pk)).collect())
                .unwrap_or_default()),
            Some(FieldKind::Reverse { target, via }) => {
                let pk_name = self.pk_name(model)?;
                let Some(pk) = row.get(&pk_name) else {
                    return Ok(Vec::new());
                };
                Ok(self
                    .snapshot_rows(&target)?
                    .into_iter()
                    .filter(|candidate| points_at(candidate.get(&via), pk))
                    .collect())
            }
            _ => Err(StorageError::InvalidFilter {
                message: format!("'{field}' is not a relation on model '{model}'"),
            }),
        }
    }

    /// Every value reached from `row` along `segments`.
    ///
    /// Never empty: a path that reaches nothing yields a single null, so
    /// `isnull` and `exact None` behave on empty relations.
    fn path_values(&self, model: &str, row: &Row, segments: &[&str]) -> StorageResult<Vec<Value>> {
        let Some((first, rest)) = segments.split_first() else {
            return Ok(vec![Value::Null]);
        };
        let field = if self.registry.is_pk(model, first).unwrap_or(false) {
            self.pk_name(model)?
        } else {
            (*first).to_string()
        };
        let kind = self.kind(model, &field)?;

        let values = match (kind, rest.is_empty()) {
            (Some(FieldKind::ToMany { .. }), true) => row
                .get(&field)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            (Some(FieldKind::Reverse { target, .. }), true) => {
                let target_pk = self.pk_name(&target)?;
                self.related(model, row, &field)?
                    .into_iter()
                    .filter_map(|r| r.get(&target_pk).cloned())
                    .collect()
            }
            (_, true) => vec![row.get(&field).cloned().unwrap_or(Value::Null)],
            (Some(FieldKind::Json), false) => {
                let mut nested = row.get(&field);
                for key in rest {
                    nested = nested.and_then(|v| json_child(v, key));
                }
                vec![nested.cloned().unwrap_or(Value::Null)]
            }
            (Some(kind), false) if kind.is_relation() => {
                let target = kind.target().unwrap_or_default().to_string();
                let mut out = Vec::new();
                for related in self.related(model, row, &field)? {
                    out.extend(self.path_values(&target, &related, rest)?);
                }
                out
            }
            (_, false) => Vec::new(),
        };

        Ok(if values.is_empty() { vec![Value::Null] } else { values })
    }

    fn eval(&self, model: &str, row: &Row, predicate: &Predicate) -> StorageResult<bool> {
        match predicate {
            Predicate::All => Ok(true),
            Predicate::Nothing => Ok(false),
            Predicate::Cond(condition) => {
                let segments: Vec<&str> = condition.segments().collect();
                let values = self.path_values(model, row, &segments)?;
                matcher::matches(condition, &values, &self.regexes)
            }
            Predicate::And(parts) => {
                for part in parts {
                    if !self.eval(model, row, part)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Or(parts) => {
                for part in parts {
                    if self.eval(model, row, part)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Predicate::Not(inner) => Ok(!self.eval(model, row, inner)?),
        }
    }

    /// Filtered, ordered and windowed rows for `handle`.
    fn select(&self, handle: &QueryHandle) -> StorageResult<Vec<Row>> {
        let model = handle.model();
        if handle.is_empty_scope() {
            self.pk_name(model)?;
            return Ok(Vec::new());
        }

        let mut matched = Vec::new();
        for row in self.snapshot_rows(model)? {
            if self.eval(model, &row, handle.predicate())? {
                matched.push(row);
            }
        }

        if !handle.order_by().is_empty() {
            let mut keyed = Vec::with_capacity(matched.len());
            for row in matched {
                let mut keys = Vec::with_capacity(handle.order_by().len());
                for term in handle.order_by() {
                    let segments: Vec<&str> = term.path.split(LOOKUP_SEP).collect();
                    let first = self.path_values(model, &row, &segments)?.swap_remove(0);
                    keys.push(first);
                }
                keyed.push((keys, row));
            }
            keyed.sort_by(|(a, _), (b, _)| {
                handle
                    .order_by()
                    .iter()
                    .zip(a.iter().zip(b.iter()))
                    .map(|(term, (x, y))| {
                        let ord = matcher::order_values(x, y);
                        if term.descending {
                            ord.reverse()
                        } else {
                            ord
                        }
                    })
                    .find(|ord| ord.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            matched = keyed.into_iter().map(|(_, row)| row).collect();
        }

        let offset = usize::try_from(handle.offset()).unwrap_or(usize::MAX);
        let rows = matched.into_iter().skip(offset);
        Ok(match handle.limit() {
            Some(limit) => rows.take(usize::try_from(limit).unwrap_or(usize::MAX)).collect(),
            None => rows.collect(),
        })
    }

    fn apply_changes(&self, model: &str, row: &mut Row, changes: &Changes) -> DomainResult<()> {
        let pk_name = self.pk_name(model)?;
        if changes.contains_key(&pk_name) {
            return Err(StorageError::InvalidInput {
                message: format!("The primary key of '{model}' cannot be updated"),
            }
            .into());
        }
        let original = row.clone();
        for (field, update) in changes {
            let value = match update {
                FieldUpdate::Set(value) => value.clone(),
                FieldUpdate::Derived(expr) => expr.evaluate(&original)?,
            };
            row.insert(field.clone(), value);
        }
        Ok(())
    }

    fn update_one(&self, model: &str, pk: &Value, changes: &Changes) -> DomainResult<Row> {
        let mut table = self.tables.entry(model.to_string()).or_default();
        let row = table.get_mut(pk).ok_or_else(|| StorageError::RowNotFound {
            model: model.to_string(),
            pk: pk_key(pk),
        })?;
        let mut updated = row.clone();
        self.apply_changes(model, &mut updated, changes)?;
        *row = updated.clone();
        Ok(updated)
    }

    fn pks_of(&self, model: &str, rows: &[Row]) -> StorageResult<Vec<Value>> {
        let pk_name = self.pk_name(model)?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get(&pk_name).cloned())
            .collect())
    }
}

fn json_child<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Whether a relation column value refers to `pk`.
fn points_at(column: Option<&Value>, pk: &Value) -> bool {
    match column {
        Some(Value::Array(pks)) => pks.iter().any(|p| matcher::values_equal(p, pk)),
        Some(value) => matcher::values_equal(value, pk),
        None => false,
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    #[instrument(skip(self))]
    async fn begin(&self) -> DomainResult<Box<dyn StoreTransaction>> {
        let guard = Arc::clone(&self.write_lock).lock_owned().await;
        let snapshot: HashMap<String, Table> = self
            .tables
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        debug!(tables = snapshot.len(), "transaction started");
        Ok(Box::new(MemoryTransaction {
            tables: Arc::clone(&self.tables),
            snapshot: Some(snapshot),
            _guard: guard,
        }))
    }

    #[instrument(skip(self, handle), fields(model = %handle.model()))]
    async fn query(&self, handle: &QueryHandle) -> DomainResult<Vec<Row>> {
        Ok(self.select(handle)?)
    }

    #[instrument(skip(self, handle), fields(model = %handle.model()))]
    async fn count(&self, handle: &QueryHandle) -> DomainResult<u64> {
        Ok(self.select(handle)?.len() as u64)
    }

    #[instrument(skip(self, handle), fields(model = %handle.model(), function = function.as_str()))]
    async fn aggregate(
        &self,
        handle: &QueryHandle,
        function: AggregateFunction,
        field: &str,
    ) -> DomainResult<Value> {
        let model = handle.model();
        let segments: Vec<&str> = field.split(LOOKUP_SEP).collect();
        let mut values = Vec::new();
        for row in self.select(handle)? {
            values.extend(
                self.path_values(model, &row, &segments)?
                    .into_iter()
                    .filter(|v| !v.is_null()),
            );
        }
        aggregate_values(function, field, &values)
    }

    #[instrument(skip(self, row))]
    async fn insert(&self, model: &str, row: Row) -> DomainResult<Row> {
        let pk_name = self.pk_name(model)?;
        let mut table = self.tables.entry(model.to_string()).or_default();
        Ok(table.insert(model, &pk_name, row)?)
    }

    #[instrument(skip(self, rows), fields(count = rows.len()))]
    async fn insert_many(&self, model: &str, rows: Vec<Row>) -> DomainResult<Vec<Row>> {
        let pk_name = self.pk_name(model)?;
        let mut table = self.tables.entry(model.to_string()).or_default();
        // Stage on a copy so a duplicate key leaves the table untouched.
        let mut staged = table.clone();
        let mut created = Vec::with_capacity(rows.len());
        for row in rows {
            created.push(staged.insert(model, &pk_name, row)?);
        }
        *table = staged;
        Ok(created)
    }

    #[instrument(skip(self, handle, changes), fields(model = %handle.model()))]
    async fn update_where(&self, handle: &QueryHandle, changes: &Changes) -> DomainResult<Vec<Value>> {
        let model = handle.model();
        let pks = self.pks_of(model, &self.select(handle)?)?;
        for pk in &pks {
            self.update_one(model, pk, changes)?;
        }
        Ok(pks)
    }

    #[instrument(skip(self, changes))]
    async fn update_row(&self, model: &str, pk: &Value, changes: &Changes) -> DomainResult<Row> {
        self.update_one(model, pk, changes)
    }

    #[instrument(skip(self, handle), fields(model = %handle.model()))]
    async fn delete_where(&self, handle: &QueryHandle) -> DomainResult<Vec<Value>> {
        let model = handle.model();
        let pks = self.pks_of(model, &self.select(handle)?)?;
        if let Some(mut table) = self.tables.get_mut(model) {
            for pk in &pks {
                table.remove(pk);
            }
        }
        Ok(pks)
    }

    async fn fetch_by_pk(&self, model: &str, pk: &Value) -> DomainResult<Option<Row>> {
        self.pk_name(model)?;
        Ok(self.fetch(model, pk))
    }

    async fn fetch_related(&self, model: &str, row: &Row, field: &str) -> DomainResult<Vec<Row>> {
        Ok(self.related(model, row, field)?)
    }
}

fn aggregate_values(function: AggregateFunction, field: &str, values: &[Value]) -> DomainResult<Value> {
    if function == AggregateFunction::Count {
        return Ok(json!(values.len()));
    }
    if values.is_empty() {
        return Ok(Value::Null);
    }

    match function {
        AggregateFunction::Min => Ok(values
            .iter()
            .min_by(|a, b| matcher::order_values(a, b))
            .cloned()
            .unwrap_or(Value::Null)),
        AggregateFunction::Max => Ok(values
            .iter()
            .max_by(|a, b| matcher::order_values(a, b))
            .cloned()
            .unwrap_or(Value::Null)),
        AggregateFunction::Sum | AggregateFunction::Avg => {
            let numbers: Vec<&serde_json::Number> = values
                .iter()
                .map(|v| match v {
                    Value::Number(n) => Ok(n),
                    _ => Err(DomainError::validation(format!(
                        "Cannot compute {} over non-numeric field '{field}'",
                        function.as_str()
                    ))),
                })
                .collect::<DomainResult<_>>()?;

            let as_float: f64 = numbers.iter().filter_map(|n| n.as_f64()).sum();
            if function == AggregateFunction::Avg {
                return Ok(json!(as_float / numbers.len() as f64));
            }
            let ints: Option<Vec<i64>> = numbers.iter().map(|n| n.as_i64()).collect();
            Ok(match ints.and_then(|ints| ints.into_iter().try_fold(0i64, i64::checked_add)) {
                Some(total) => json!(total),
                None => json!(as_float),
            })
        }
        AggregateFunction::Count => Ok(json!(values.len())),
    }
}

/// Snapshot transaction over [`MemoryRowStore`].
struct MemoryTransaction {
    tables: Arc<Tables>,
    /// `None` once committed or rolled back.
    snapshot: Option<HashMap<String, Table>>,
    _guard: OwnedMutexGuard<()>,
}

impl MemoryTransaction {
    fn restore(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.tables.clear();
            for (model, table) in snapshot {
                self.tables.insert(model, table);
            }
            debug!("transaction rolled back");
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn commit(mut self: Box<Self>) -> DomainResult<()> {
        self.snapshot = None;
        debug!("transaction committed");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> DomainResult<()> {
        self.restore();
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.restore();
    }
}
