//! Schema reflection over the registry.
//!
//! Answers the questions every other component asks about a model: which
//! field names exist, which are relations and where they point, which are
//! computed, and what the primary key is called.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::DomainResult;

use super::registry::Registry;
use super::schema::{AdditionalField, FieldKind};

/// Alias accepted for any model's primary key.
pub const PK_ALIAS: &str = "pk";

impl Registry {
    /// Every field name visible for `model`, computed fields included.
    pub fn all_fields(&self, model: &str) -> DomainResult<Arc<BTreeSet<String>>> {
        Ok(Arc::clone(&self.get(model)?.all_fields))
    }

    /// Name of the primary-key field.
    pub fn pk_name(&self, model: &str) -> DomainResult<&str> {
        Ok(self.get(model)?.schema().pk())
    }

    /// Whether `field` names the primary key, directly or via `pk`.
    pub fn is_pk(&self, model: &str, field: &str) -> DomainResult<bool> {
        Ok(field == PK_ALIAS || field == self.pk_name(model)?)
    }

    /// Kind of a declared field.
    ///
    /// Reverse relations that the model does not expose explicitly are
    /// reported as absent. Computed fields are not declared fields and
    /// return `None`; use [`Registry::is_computed`] for those.
    pub fn field_kind(&self, model: &str, field: &str) -> DomainResult<Option<&FieldKind>> {
        let registered = self.get(model)?;
        let kind = registered.schema().field(field).map(|f| &f.kind);
        Ok(match kind {
            Some(k) if k.is_reverse() && !registered.config().fields.explicitly_includes(field) => {
                None
            }
            other => other,
        })
    }

    /// Related model for a traversable relation field.
    pub fn relation_target(&self, model: &str, field: &str) -> DomainResult<Option<&str>> {
        Ok(self.field_kind(model, field)?.and_then(FieldKind::target))
    }

    pub fn is_computed(&self, model: &str, field: &str) -> DomainResult<bool> {
        Ok(self.additional_field(model, field)?.is_some())
    }

    pub fn additional_field(&self, model: &str, field: &str) -> DomainResult<Option<&AdditionalField>> {
        Ok(self
            .get(model)?
            .config()
            .additional_fields
            .iter()
            .find(|f| f.name == field))
    }

    /// Models reached by following `path` (`__`-separated) from `model`.
    ///
    /// Every relation segment counts, exposed or not, since row-scope
    /// predicates from providers may traverse unexposed relations. The walk
    /// stops at the first segment that is not a relation.
    pub fn models_along(&self, model: &str, path: &str) -> DomainResult<Vec<String>> {
        let mut reached = Vec::new();
        let mut current = model.to_string();
        for segment in path.split(crate::query::LOOKUP_SEP) {
            let target = self
                .get(&current)?
                .schema()
                .field(segment)
                .and_then(|f| f.kind.target())
                .map(str::to_string);
            match target {
                Some(target) => {
                    reached.push(target.clone());
                    current = target;
                }
                None => break,
            }
        }
        Ok(reached)
    }

    /// Declared, non-computed fields a write may target.
    pub fn writable_fields(&self, model: &str) -> DomainResult<BTreeSet<String>> {
        let registered = self.get(model)?;
        Ok(registered
            .schema()
            .fields()
            .iter()
            .filter(|f| !f.kind.is_reverse())
            .map(|f| f.name.clone())
            .collect())
    }
}
