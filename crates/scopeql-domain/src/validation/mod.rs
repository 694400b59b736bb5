//! Predicate validation.
//!
//! Every field path the caller names, in filters, exclusions, ordering,
//! aggregates or the requested field list, is walked hop by hop against
//! the schema and the caller's read permissions before anything reaches
//! the row store. At each hop:
//!
//! 1. computed fields are rejected as structural errors, never as denials
//! 2. existence is checked, so unknown fields are told apart from denied ones
//! 3. the segment must be in the hop model's read set
//!
//! A JSON column accepts any remaining segments once its own gate passes.

use tracing::warn;

use crate::ast::{FilterNode, QueryAst};
use crate::error::{DomainError, DomainResult};
use crate::model::FieldKind;
use crate::query::{field_segments, OrderTerm};
use crate::resolver::{FieldOperation, PermissionResolver};

/// Where a field path appears; decides the wording of errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathUse {
    Filter,
    Order,
    Aggregate,
    Requested,
}

impl PathUse {
    fn missing(self, path: &str, model: &str) -> DomainError {
        match self {
            PathUse::Order => DomainError::validation(format!(
                "Cannot order by '{path}': field does not exist on model '{model}'."
            )),
            _ => DomainError::validation(format!(
                "Field '{path}' does not exist on model '{model}'."
            )),
        }
    }

    fn denied(self, path: &str) -> DomainError {
        let detail = match self {
            PathUse::Filter => {
                format!("Permission denied: You do not have access to filter on field '{path}'")
            }
            PathUse::Order => {
                format!("Permission denied: You do not have access to order by field '{path}'")
            }
            PathUse::Aggregate => {
                format!("Permission denied: You do not have access to aggregate field '{path}'")
            }
            PathUse::Requested => format!("Access to field '{path}' is not permitted."),
        };
        DomainError::permission_denied(detail)
    }

    fn computed(self, field: &str) -> Option<DomainError> {
        let detail = match self {
            PathUse::Filter => format!(
                "Cannot filter on computed field '{field}'. Computed fields are read-only and cannot be used in filters."
            ),
            PathUse::Order => format!("Cannot order by computed field '{field}'."),
            PathUse::Aggregate => format!("Cannot aggregate on computed field '{field}'."),
            PathUse::Requested => return None,
        };
        Some(DomainError::validation(detail))
    }
}

/// Validates AST field references for one request.
pub struct PredicateValidator<'a> {
    resolver: &'a PermissionResolver,
}

impl<'a> PredicateValidator<'a> {
    pub fn new(resolver: &'a PermissionResolver) -> Self {
        Self { resolver }
    }

    /// Validates one filter key such as `author__name__icontains`.
    ///
    /// The root model's primary key is always filterable.
    pub fn validate_filterable(&self, model: &str, key: &str) -> DomainResult<()> {
        self.walk(model, key, PathUse::Filter)
    }

    /// Validates every condition key in a filter tree.
    pub fn validate_filter_tree(&self, node: &FilterNode, model: &str) -> DomainResult<()> {
        for key in node.condition_keys() {
            self.validate_filterable(model, key)?;
        }
        Ok(())
    }

    /// Validates the explicitly requested field paths.
    ///
    /// Under the `ignore` policy, paths naming unknown fields are skipped
    /// rather than rejected. Denials are never skipped.
    pub fn validate_requested_fields(&self, fields: &[String], model: &str) -> DomainResult<()> {
        let strict = self.resolver.config().rejects_unknown();
        for field in fields {
            match self.walk(model, field, PathUse::Requested) {
                Err(DomainError::Validation { .. }) if !strict => continue,
                other => other?,
            }
        }
        Ok(())
    }

    /// Validates `orderBy` terms: existence, then read permission, then the
    /// model's `ordering_fields` restriction.
    pub fn validate_order_by(&self, order_by: &[String], model: &str) -> DomainResult<()> {
        let ordering_fields = &self.resolver.registry().get(model)?.config().ordering_fields;
        for raw in order_by {
            let term = OrderTerm::parse(raw);
            self.walk(model, &term.path, PathUse::Order)?;

            let root = field_segments(&term.path)[0];
            if !ordering_fields.is_empty()
                && !ordering_fields.contains(root)
                && !self.resolver.registry().is_pk(model, root)?
            {
                return Err(DomainError::validation(format!(
                    "Cannot order by '{raw}': ordering is not enabled for this field on model '{model}'."
                )));
            }
        }
        Ok(())
    }

    /// Validates a field used inside an aggregate.
    pub fn validate_aggregate_field(&self, model: &str, field: &str) -> DomainResult<()> {
        self.walk(model, field, PathUse::Aggregate)
    }

    /// Validates every field reference in an AST against `model`.
    pub fn validate_ast(&self, ast: &QueryAst, model: &str) -> DomainResult<()> {
        self.validate_requested_fields(ast.requested_fields(), model)?;
        self.validate_filter_tree(&ast.filter, model)?;
        self.validate_filter_tree(&ast.exclude, model)?;
        for key in ast.lookup.keys() {
            self.validate_filterable(model, key)?;
        }
        self.validate_order_by(&ast.order_by, model)?;
        if ast.kind.aggregate_function().is_some() {
            if let Some(field) = &ast.field {
                self.validate_aggregate_field(model, field)?;
            }
        }
        for spec in &ast.aggregates {
            self.validate_aggregate_field(model, &spec.field)?;
        }
        Ok(())
    }

    fn walk(&self, model: &str, path: &str, usage: PathUse) -> DomainResult<()> {
        let registry = self.resolver.registry();
        let segments = field_segments(path);
        let mut current = model.to_string();

        for (i, segment) in segments.iter().copied().enumerate() {
            let last = i + 1 == segments.len();
            if segment.is_empty() {
                return Err(usage.missing(path, &current));
            }
            let allowed = self.resolver.fields(&current, FieldOperation::Read)?;

            if registry.is_pk(&current, segment)? {
                if i > 0 && allowed.is_empty() {
                    return Err(self.deny(usage, path, &current));
                }
                return Ok(());
            }

            if registry.is_computed(&current, segment)? {
                if let Some(err) = usage.computed(segment) {
                    return Err(err);
                }
                if !allowed.contains(segment) {
                    return Err(self.deny(usage, path, &current));
                }
                return if last { Ok(()) } else { Err(usage.missing(path, &current)) };
            }

            let Some(kind) = registry.field_kind(&current, segment)? else {
                return Err(usage.missing(path, &current));
            };

            if !allowed.contains(segment) {
                return Err(self.deny(usage, path, &current));
            }

            match kind {
                FieldKind::Json => return Ok(()),
                FieldKind::Scalar => {
                    if !last {
                        return Err(usage.missing(path, &current));
                    }
                }
                FieldKind::ToOne { target }
                | FieldKind::ToMany { target }
                | FieldKind::Reverse { target, .. } => {
                    current = target.clone();
                }
            }
        }
        Ok(())
    }

    fn deny(&self, usage: PathUse, path: &str, model: &str) -> DomainError {
        warn!(model, path, ?usage, "field access denied");
        usage.denied(path)
    }
}
