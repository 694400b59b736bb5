//! Model registry.
//!
//! The registry is an immutable value built once at startup and shared by
//! reference. Nothing here is process-global, so tests can build as many
//! independent registries as they need.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::{DomainError, DomainResult};

use super::config::ModelConfig;
use super::graph::RelationshipGraph;
use super::schema::{FieldKind, ModelSchema};

/// A model schema together with its registration options.
#[derive(Debug, Clone)]
pub struct RegisteredModel {
    schema: ModelSchema,
    config: ModelConfig,
    /// Reflected field names, resolved once at build time.
    pub(crate) all_fields: Arc<BTreeSet<String>>,
}

impl RegisteredModel {
    pub fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }
}

/// Builder collecting model registrations.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    models: Vec<(ModelSchema, ModelConfig)>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::DuplicateRegistration` if a model with the same
    /// name was already registered.
    pub fn register(mut self, schema: ModelSchema, config: ModelConfig) -> DomainResult<Self> {
        if self.models.iter().any(|(s, _)| s.name() == schema.name()) {
            return Err(DomainError::DuplicateRegistration {
                model: schema.name().to_string(),
            });
        }
        self.models.push((schema, config));
        Ok(self)
    }

    /// Freezes the registrations into a [`Registry`].
    ///
    /// # Errors
    ///
    /// Fails if a relation targets an unregistered model, a reverse relation
    /// names a missing back-reference, or a computed field shadows a declared
    /// field.
    pub fn build(self) -> DomainResult<Registry> {
        let mut models = HashMap::with_capacity(self.models.len());
        for (schema, config) in self.models {
            validate_additional_fields(&schema, &config)?;
            let all_fields = Arc::new(reflect_field_names(&schema, &config));
            models.insert(
                schema.name().to_string(),
                RegisteredModel {
                    schema,
                    config,
                    all_fields,
                },
            );
        }

        validate_reverse_relations(&models)?;
        let graph = RelationshipGraph::build(&models)?;

        Ok(Registry { models, graph })
    }
}

/// Immutable set of registered models plus their relationship graph.
#[derive(Debug)]
pub struct Registry {
    pub(crate) models: HashMap<String, RegisteredModel>,
    graph: RelationshipGraph,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Gets a registered model by name.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ModelNotRegistered` if the model is unknown.
    pub fn get(&self, model: &str) -> DomainResult<&RegisteredModel> {
        self.models
            .get(model)
            .ok_or_else(|| DomainError::ModelNotRegistered {
                model: model.to_string(),
            })
    }

    pub fn contains(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn graph(&self) -> &RelationshipGraph {
        &self.graph
    }
}

/// Field names visible through the engine: declared fields (reverse relations
/// only when explicitly exposed) narrowed to the exposed subset, plus
/// computed fields. The primary key is always kept.
fn reflect_field_names(schema: &ModelSchema, config: &ModelConfig) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = schema
        .fields()
        .iter()
        .filter(|f| !f.kind.is_reverse() || config.fields.explicitly_includes(&f.name))
        .filter(|f| f.name == schema.pk() || config.fields.includes(&f.name))
        .map(|f| f.name.clone())
        .collect();
    names.extend(config.additional_fields.iter().map(|f| f.name.clone()));
    names
}

fn validate_additional_fields(schema: &ModelSchema, config: &ModelConfig) -> DomainResult<()> {
    for field in &config.additional_fields {
        if schema.field(&field.name).is_some() {
            return Err(DomainError::internal(format!(
                "computed field '{}' shadows a declared field on model '{}'",
                field.name,
                schema.name()
            )));
        }
    }
    Ok(())
}

fn validate_reverse_relations(models: &HashMap<String, RegisteredModel>) -> DomainResult<()> {
    for registered in models.values() {
        for field in registered.schema().fields() {
            let FieldKind::Reverse { target, via } = &field.kind else {
                continue;
            };
            let target_model = models
                .get(target)
                .ok_or_else(|| DomainError::ModelNotRegistered {
                    model: target.clone(),
                })?;
            let points_back = matches!(
                target_model.schema().field(via).map(|f| &f.kind),
                Some(FieldKind::ToOne { target: back }) if back == registered.name()
            );
            if !points_back {
                return Err(DomainError::internal(format!(
                    "reverse relation '{}.{}' needs '{}.{}' to be a to-one relation back to '{}'",
                    registered.name(),
                    field.name,
                    target,
                    via,
                    registered.name()
                )));
            }
        }
    }
    Ok(())
}
