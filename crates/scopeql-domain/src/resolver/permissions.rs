//! Per-request permission resolution.
//!
//! A [`PermissionResolver`] is created for one request and dropped with it.
//! Every answer it computes is memoized, so nested serialization and
//! validation never consult the providers twice for the same question.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::{DomainError, DomainResult};
use crate::model::{Registry, Row, PK_ALIAS};
use crate::query::{Predicate, QueryHandle};

use super::config::ResolverConfig;
use super::fields_map::FieldsMap;
use super::provider::{Action, ActionSet, FieldOperation, FieldSet};
use super::request::RequestContext;

/// Key for a memoized fields map: model, operation, depth, explicit paths.
type FieldsMapKey = (String, FieldOperation, u32, Vec<String>);

/// Resolves actions, fields and row scopes for one request.
pub struct PermissionResolver {
    registry: Arc<Registry>,
    request: Arc<RequestContext>,
    config: ResolverConfig,
    actions: DashMap<String, Arc<ActionSet>>,
    fields: DashMap<(String, FieldOperation), Arc<BTreeSet<String>>>,
    pub(super) fields_maps: DashMap<FieldsMapKey, Arc<FieldsMap>>,
}

impl std::fmt::Debug for PermissionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionResolver")
            .field("request", &self.request)
            .field("config", &self.config)
            .field("cached_actions", &self.actions.len())
            .field("cached_fields", &self.fields.len())
            .finish()
    }
}

impl PermissionResolver {
    pub fn new(registry: Arc<Registry>, request: Arc<RequestContext>, config: ResolverConfig) -> Self {
        Self {
            registry,
            request,
            config,
            actions: DashMap::new(),
            fields: DashMap::new(),
            fields_maps: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Union of every provider's allowed actions. No providers means no actions.
    pub fn allowed_actions(&self, model: &str) -> DomainResult<Arc<ActionSet>> {
        if let Some(cached) = self.actions.get(model) {
            return Ok(Arc::clone(cached.value()));
        }

        let registered = self.registry.get(model)?;
        let actions: ActionSet = registered
            .config()
            .providers
            .iter()
            .flat_map(|p| p.allowed_actions(&self.request, model))
            .collect();
        let actions = Arc::new(actions);
        self.actions.insert(model.to_string(), Arc::clone(&actions));
        Ok(actions)
    }

    pub fn has_permission(&self, model: &str, action: Action) -> DomainResult<bool> {
        Ok(self.allowed_actions(model)?.contains(&action))
    }

    /// Fails with `PermissionDenied` unless `action` is granted on `model`.
    pub fn require_action(&self, model: &str, action: Action) -> DomainResult<()> {
        if self.has_permission(model, action)? {
            return Ok(());
        }
        warn!(model, action = action.as_str(), "action not permitted");
        Err(DomainError::permission_denied(format!(
            "Permission denied: You do not have {action} permission on model '{model}'"
        )))
    }

    /// Fields permitted for `operation` on `model`.
    ///
    /// Providers that do not grant the operation's action contribute
    /// nothing. A provider granting all fields short-circuits to the
    /// model's full field set. Other sets are intersected with the model's
    /// fields and unioned.
    pub fn fields(&self, model: &str, operation: FieldOperation) -> DomainResult<Arc<BTreeSet<String>>> {
        let key = (model.to_string(), operation);
        if let Some(cached) = self.fields.get(&key) {
            return Ok(Arc::clone(cached.value()));
        }

        let registered = self.registry.get(model)?;
        let all_fields = self.registry.all_fields(model)?;
        let required = operation.required_action();

        let mut allowed = BTreeSet::new();
        for provider in &registered.config().providers {
            if !provider.allowed_actions(&self.request, model).contains(&required) {
                continue;
            }
            match provider.allowed_fields(&self.request, model, operation) {
                FieldSet::All => {
                    allowed = (*all_fields).clone();
                    break;
                }
                FieldSet::Only(granted) => {
                    allowed.extend(granted.intersection(&all_fields).cloned());
                }
            }
        }

        debug!(model, ?operation, count = allowed.len(), "resolved field permissions");
        let allowed = Arc::new(allowed);
        self.fields.insert(key, Arc::clone(&allowed));
        Ok(allowed)
    }

    /// Narrows `handle` to the rows the caller may touch.
    ///
    /// Providers' row grants are ORed first, then every provider's
    /// exclusion is applied in turn. Swapping the two phases would let an
    /// exclusion be undone by another provider's grant.
    pub fn apply_row_scope(&self, model: &str, handle: QueryHandle) -> DomainResult<QueryHandle> {
        let providers = &self.registry.get(model)?.config().providers;
        if providers.is_empty() {
            return Ok(handle);
        }

        let granted = Predicate::any_of(providers.iter().map(|p| p.filter_rows(&self.request, model)));
        let mut scoped = handle.filter(granted);
        for provider in providers {
            scoped = scoped.exclude(provider.exclude_rows(&self.request, model));
        }
        Ok(scoped)
    }

    /// Fails unless some provider allows `action` on this particular row.
    pub fn check_object_permissions(&self, model: &str, row: &Row, action: Action) -> DomainResult<()> {
        let providers = &self.registry.get(model)?.config().providers;
        let granted = providers
            .iter()
            .any(|p| p.allowed_object_actions(&self.request, model, row).contains(&action));
        if granted {
            return Ok(());
        }
        warn!(model, action = action.as_str(), "object-level permission denied");
        Err(DomainError::permission_denied(format!(
            "Object-level permission denied: Missing {action} on object"
        )))
    }

    /// Checks `action` against a set of rows.
    ///
    /// With at most one row the object-level check runs directly. Otherwise
    /// any provider allowing the bulk operation suffices.
    pub fn check_bulk_permissions(&self, model: &str, rows: &[Row], action: Action) -> DomainResult<()> {
        if rows.len() <= 1 {
            for row in rows {
                self.check_object_permissions(model, row, action)?;
            }
            return Ok(());
        }

        let providers = &self.registry.get(model)?.config().providers;
        if providers
            .iter()
            .any(|p| p.bulk_operation_allowed(&self.request, model, action, rows))
        {
            return Ok(());
        }
        warn!(model, action = action.as_str(), rows = rows.len(), "bulk operation denied");
        Err(DomainError::permission_denied(format!(
            "Bulk {action} operation not permitted on queryset"
        )))
    }

    /// Reduces caller-supplied write data to the fields they may write.
    ///
    /// Under the `error` policy, keys the model does not have at all are
    /// rejected. Known keys outside the permitted set, and read-only
    /// fields, are dropped silently.
    pub fn filter_writable_data(&self, model: &str, data: Row, operation: FieldOperation) -> DomainResult<Row> {
        let all_fields = self.registry.all_fields(model)?;

        if self.config.rejects_unknown() {
            let unknown: Vec<&str> = data
                .keys()
                .filter(|k| !all_fields.contains(*k) && k.as_str() != PK_ALIAS)
                .map(String::as_str)
                .collect();
            if !unknown.is_empty() {
                let valid: Vec<&str> = all_fields.iter().map(String::as_str).collect();
                return Err(DomainError::validation(format!(
                    "Unknown field(s): {}. Valid fields are: {}",
                    unknown.join(", "),
                    valid.join(", ")
                )));
            }
        }

        let allowed = self.fields(model, operation)?;
        let writable = self.registry.writable_fields(model)?;
        Ok(data
            .into_iter()
            .filter(|(k, _)| allowed.contains(k) && writable.contains(k))
            .collect())
    }
}
