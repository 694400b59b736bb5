//! Per-model registration options.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::error::DomainResult;
use crate::resolver::{PermissionProvider, RequestContext};

use super::schema::{AdditionalField, Row};

/// Server-side hook transforming write data.
///
/// Hooks are trusted code: they run with the request context but are not
/// bound by the caller's field permissions.
pub type LifecycleHook = Arc<dyn Fn(Row, &RequestContext) -> DomainResult<Row> + Send + Sync>;

/// Subset of the model's fields exposed through the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExposedFields {
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl ExposedFields {
    pub fn includes(&self, field: &str) -> bool {
        match self {
            ExposedFields::All => true,
            ExposedFields::Only(fields) => fields.contains(field),
        }
    }

    /// Reverse relations are only reachable when listed here by name.
    pub fn explicitly_includes(&self, field: &str) -> bool {
        match self {
            ExposedFields::All => false,
            ExposedFields::Only(fields) => fields.contains(field),
        }
    }
}

/// Registration options for one model.
#[derive(Clone)]
pub struct ModelConfig {
    /// Permission providers, composed by the resolver.
    pub providers: Vec<Arc<dyn PermissionProvider>>,
    pub fields: ExposedFields,
    pub searchable_fields: BTreeSet<String>,
    /// When non-empty, the only root fields accepted in `orderBy`.
    pub ordering_fields: BTreeSet<String>,
    pub additional_fields: Vec<AdditionalField>,
    /// Columns that must accompany a field whenever it is re-read on its own.
    pub companion_fields: BTreeMap<String, BTreeSet<String>>,
    /// Run on raw caller data, before permission filtering.
    pub pre_hooks: Vec<LifecycleHook>,
    /// Run after permission filtering, before schema validation.
    pub post_hooks: Vec<LifecycleHook>,
    /// Whether read results for this model may be cached.
    pub cacheable: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            fields: ExposedFields::All,
            searchable_fields: BTreeSet::new(),
            ordering_fields: BTreeSet::new(),
            additional_fields: Vec::new(),
            companion_fields: BTreeMap::new(),
            pre_hooks: Vec::new(),
            post_hooks: Vec::new(),
            cacheable: true,
        }
    }
}

impl ModelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: impl PermissionProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    pub fn with_shared_provider(mut self, provider: Arc<dyn PermissionProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = ExposedFields::Only(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_searchable_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.searchable_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ordering_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ordering_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_additional_field(mut self, field: AdditionalField) -> Self {
        self.additional_fields.push(field);
        self
    }

    pub fn with_companion_fields<I, S>(mut self, field: impl Into<String>, companions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.companion_fields.insert(
            field.into(),
            companions.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn with_pre_hook(
        mut self,
        hook: impl Fn(Row, &RequestContext) -> DomainResult<Row> + Send + Sync + 'static,
    ) -> Self {
        self.pre_hooks.push(Arc::new(hook));
        self
    }

    pub fn with_post_hook(
        mut self,
        hook: impl Fn(Row, &RequestContext) -> DomainResult<Row> + Send + Sync + 'static,
    ) -> Self {
        self.post_hooks.push(Arc::new(hook));
        self
    }

    pub fn with_cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let providers: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("ModelConfig")
            .field("providers", &providers)
            .field("fields", &self.fields)
            .field("searchable_fields", &self.searchable_fields)
            .field("ordering_fields", &self.ordering_fields)
            .field("additional_fields", &self.additional_fields)
            .field("companion_fields", &self.companion_fields)
            .field("pre_hooks", &self.pre_hooks.len())
            .field("post_hooks", &self.post_hooks.len())
            .field("cacheable", &self.cacheable)
            .finish()
    }
}
