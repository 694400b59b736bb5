//! Operation dispatcher.
//!
//! [`QueryEngine::execute`] runs one AST against one model:
//!
//! 1. Parse the AST (unknown operation types are validation errors)
//! 2. Build a per-request [`PermissionResolver`]
//! 3. Require the operation's action on the model
//! 4. Validate every field reference in the AST
//! 5. Build the permission-scoped base handle and the read fields map
//! 6. Dispatch on the operation kind; mutations run inside one store
//!    transaction, and their lifecycle events and cache invalidation only
//!    happen after it commits

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, instrument};

use scopeql_domain::ast::{OperationKind, QueryAst};
use scopeql_domain::cache::CacheKey;
use scopeql_domain::query::{QueryHandle, RowStore};
use scopeql_domain::resolver::{
    Action, FieldOperation, FieldsMap, PermissionResolver, RequestContext, ResolverConfig,
};
use scopeql_domain::validation::PredicateValidator;
use scopeql_domain::{DomainResult, Registry, ResultCache, ResultCacheConfig};

use crate::config::{ConfigLoadError, EngineConfig};

use super::events::{EventEmitter, NullEmitter, PendingEvents};
use super::scoped;
use super::serializer::RowSerializer;
use super::types::OperationResult;

/// Everything one request resolved before dispatch.
pub(crate) struct RequestScope<'r> {
    pub model: &'r str,
    pub ast: QueryAst,
    pub resolver: PermissionResolver,
    /// Row-scoped handle with the AST's filter, search, exclude and order applied.
    pub handle: QueryHandle,
    /// Serializer depth, clamped to the configured maximum.
    pub depth: u32,
    pub read_map: Arc<FieldsMap>,
}

impl RequestScope<'_> {
    pub fn request(&self) -> &RequestContext {
        self.resolver.request()
    }

    pub fn serializer<'s, S: RowStore>(&'s self, store: &'s S) -> RowSerializer<'s, S> {
        RowSerializer::new(store, &self.resolver)
    }

    pub fn pk_name(&self) -> DomainResult<&str> {
        self.resolver.registry().pk_name(self.model)
    }
}

/// Executes permission-scoped ASTs against a row store.
pub struct QueryEngine<S: RowStore> {
    registry: Arc<Registry>,
    store: Arc<S>,
    cache: Arc<ResultCache>,
    emitter: Arc<dyn EventEmitter>,
    resolver_config: ResolverConfig,
    default_limit: Option<u64>,
}

impl<S: RowStore> QueryEngine<S> {
    /// Creates an engine with default settings and no event delivery.
    pub fn new(registry: Arc<Registry>, store: Arc<S>) -> Self {
        Self {
            registry,
            store,
            cache: Arc::new(ResultCache::new(ResultCacheConfig::default())),
            emitter: Arc::new(NullEmitter),
            resolver_config: ResolverConfig::default(),
            default_limit: None,
        }
    }

    /// Creates an engine from loaded configuration.
    pub fn from_config(
        registry: Arc<Registry>,
        store: Arc<S>,
        config: &EngineConfig,
    ) -> Result<Self, ConfigLoadError> {
        config.validate()?;
        Ok(Self::new(registry, store)
            .with_resolver_config(config.resolver_config()?)
            .with_cache(Arc::new(ResultCache::new(config.result_cache_config())))
            .with_default_limit(config.engine.default_limit))
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_resolver_config(mut self, config: ResolverConfig) -> Self {
        self.resolver_config = config;
        self
    }

    /// Page size for list reads that give no limit.
    pub fn with_default_limit(mut self, limit: Option<u64>) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub(crate) fn default_limit(&self) -> Option<u64> {
        self.default_limit
    }

    /// Parses and executes a JSON AST against `model`.
    pub async fn execute(
        &self,
        model: &str,
        ast: Value,
        request: RequestContext,
    ) -> DomainResult<OperationResult> {
        let ast = QueryAst::from_value(ast)?;
        self.execute_ast(model, ast, request).await
    }

    /// Executes a parsed AST against `model`.
    #[instrument(skip_all, fields(model = %model, operation = %ast.kind))]
    pub async fn execute_ast(
        &self,
        model: &str,
        ast: QueryAst,
        request: RequestContext,
    ) -> DomainResult<OperationResult> {
        metrics::counter!("scopeql_operations_total", "operation" => ast.kind.as_str()).increment(1);

        let resolver = PermissionResolver::new(
            Arc::clone(&self.registry),
            Arc::new(request),
            self.resolver_config.clone(),
        );
        resolver.require_action(model, required_action(ast.kind))?;
        PredicateValidator::new(&resolver).validate_ast(&ast, model)?;

        let handle = scoped::base_handle(&resolver, model, &ast)?;
        let depth = ast.read_depth().min(self.resolver_config.max_depth);
        let read_map = resolver.fields_map(model, FieldOperation::Read, depth, ast.requested_fields())?;

        let scope = RequestScope {
            model,
            ast,
            resolver,
            handle,
            depth,
            read_map,
        };
        let mut events = PendingEvents::new(scope.request().operation_id.clone());

        if !scope.ast.kind.is_mutation() {
            return self.dispatch(&scope, &mut events).await;
        }

        let txn = self.store.begin().await?;
        match self.dispatch(&scope, &mut events).await {
            Ok(result) => {
                txn.commit().await?;
                if !events.is_empty() {
                    if let Some(txn_id) = &scope.request().txn_id {
                        self.cache.invalidate_model(txn_id, model).await;
                    }
                }
                events.dispatch(self.emitter.as_ref());
                Ok(result)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn dispatch(
        &self,
        scope: &RequestScope<'_>,
        events: &mut PendingEvents,
    ) -> DomainResult<OperationResult> {
        match scope.ast.kind {
            OperationKind::Read => self.handle_read(scope).await,
            OperationKind::Get => self.handle_get(scope).await,
            OperationKind::First => self.handle_first_or_last(scope, false).await,
            OperationKind::Last => self.handle_first_or_last(scope, true).await,
            OperationKind::Exists => self.handle_exists(scope).await,
            OperationKind::Count
            | OperationKind::Sum
            | OperationKind::Avg
            | OperationKind::Min
            | OperationKind::Max => self.handle_field_aggregate(scope).await,
            OperationKind::Aggregate => self.handle_aggregate(scope).await,
            OperationKind::Create => self.handle_create(scope, events).await,
            OperationKind::BulkCreate => self.handle_bulk_create(scope, events).await,
            OperationKind::Update => self.handle_update(scope, events).await,
            OperationKind::Delete => self.handle_delete(scope, events).await,
            OperationKind::UpdateInstance => self.handle_update_instance(scope, events).await,
            OperationKind::DeleteInstance => self.handle_delete_instance(scope, events).await,
            OperationKind::GetOrCreate => self.handle_get_or_create(scope, events, false).await,
            OperationKind::UpdateOrCreate => self.handle_get_or_create(scope, events, true).await,
        }
    }

    /// Cache key for `handle` under `context`, `None` when the request or
    /// model is not cacheable.
    pub(crate) fn cache_key(
        &self,
        scope: &RequestScope<'_>,
        handle: &QueryHandle,
        context: &str,
    ) -> DomainResult<Option<CacheKey>> {
        if !self.registry.get(scope.model)?.config().cacheable {
            return Ok(None);
        }
        Ok(CacheKey::for_request(
            &handle.render(),
            scope.request().txn_id.as_deref(),
            context,
        ))
    }
}

/// Action the caller must hold on the model before anything runs.
///
/// `get_or_create` and `update_or_create` additionally require `create`
/// when the lookup misses.
fn required_action(kind: OperationKind) -> Action {
    match kind {
        OperationKind::Create => Action::Create,
        OperationKind::BulkCreate => Action::BulkCreate,
        OperationKind::Update | OperationKind::UpdateInstance | OperationKind::UpdateOrCreate => {
            Action::Update
        }
        OperationKind::Delete | OperationKind::DeleteInstance => Action::Delete,
        OperationKind::Read
        | OperationKind::Get
        | OperationKind::GetOrCreate
        | OperationKind::First
        | OperationKind::Last
        | OperationKind::Exists
        | OperationKind::Count
        | OperationKind::Sum
        | OperationKind::Avg
        | OperationKind::Min
        | OperationKind::Max
        | OperationKind::Aggregate => Action::Read,
    }
}

/// Describes the dispatcher metrics to the installed recorder.
///
/// # Metrics Registered
///
/// - `scopeql_operations_total{operation}`
pub fn register_engine_metrics() {
    metrics::describe_counter!(
        "scopeql_operations_total",
        "Total number of operations executed, by operation type"
    );
}
