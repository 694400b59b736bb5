//! Permission-scoped query handles.
//!
//! Every handle the dispatcher runs starts from [`base_handle`]: the
//! model's rows narrowed by the providers' row scope. The AST's filter,
//! search, exclude, ordering and related-loading hints are layered on top,
//! so nothing the caller sends can widen the scope.

use std::collections::BTreeSet;

use serde_json::Value;

use scopeql_domain::ast::{FilterNode, QueryAst, SearchSpec};
use scopeql_domain::query::{Condition, Lookup, OrderTerm, Predicate, QueryHandle};
use scopeql_domain::resolver::{FieldOperation, FieldsMap, PermissionResolver};
use scopeql_domain::{DomainResult, Registry, Row};

/// Builds the request's handle for `model`: row scope first, then the AST.
pub(crate) fn base_handle(
    resolver: &PermissionResolver,
    model: &str,
    ast: &QueryAst,
) -> DomainResult<QueryHandle> {
    let mut handle = resolver.apply_row_scope(model, QueryHandle::new(model))?;

    handle = handle.filter(ast.filter.to_predicate()?);
    if let Some(search) = search_predicate(resolver, model, ast.search.as_ref())? {
        handle = handle.filter(search);
    }
    if ast.exclude != FilterNode::Empty {
        handle = handle.exclude(ast.exclude.to_predicate()?);
    }
    if !ast.order_by.is_empty() {
        handle = handle.ordered_by(ast.order_by.iter().map(|t| OrderTerm::parse(t)).collect());
    }

    Ok(handle
        .with_select_related(ast.select_related.clone())
        .with_prefetch_related(ast.prefetch_related.clone()))
}

/// Models whose rows can change the cached result of `handle`.
///
/// That is the handle's own model, every model `read_map` serializes along
/// with the targets of their relation fields (pks are emitted even beyond
/// depth), and every model reached by a predicate path, an ordering path or
/// one of `extra_paths`.
pub(crate) fn dependent_models(
    registry: &Registry,
    handle: &QueryHandle,
    read_map: &FieldsMap,
    extra_paths: &[&str],
) -> DomainResult<BTreeSet<String>> {
    let mut models = BTreeSet::from([handle.model().to_string()]);

    for (model, fields) in read_map.models() {
        models.insert(model.to_string());
        for field in fields {
            models.extend(registry.models_along(model, field)?);
        }
    }

    let paths = handle
        .predicate()
        .conditions()
        .into_iter()
        .map(|c| c.path.as_str())
        .chain(handle.order_by().iter().map(|t| t.path.as_str()))
        .chain(extra_paths.iter().copied());
    for path in paths {
        models.extend(registry.models_along(handle.model(), path)?);
    }
    Ok(models)
}

/// Conjunction of exact matches for a `lookup` payload.
pub(crate) fn lookup_predicate(lookup: &Row) -> DomainResult<Predicate> {
    let parts = lookup
        .iter()
        .map(|(key, value)| Condition::parse(key, value.clone()).map(Predicate::cond))
        .collect::<DomainResult<Vec<_>>>()?;
    Ok(Predicate::all_of(parts))
}

/// Case-insensitive containment over the searchable fields.
///
/// The fields searched are the model's configured searchable fields,
/// narrowed by the caller's `searchFields` when given, and limited to what
/// the caller may read. No configured fields or an empty query means no
/// search at all.
pub(crate) fn search_predicate(
    resolver: &PermissionResolver,
    model: &str,
    search: Option<&SearchSpec>,
) -> DomainResult<Option<Predicate>> {
    let Some(search) = search else {
        return Ok(None);
    };
    let query = search.search_query.as_deref().map(str::trim).unwrap_or_default();
    if query.is_empty() {
        return Ok(None);
    }

    let configured = &resolver.registry().get(model)?.config().searchable_fields;
    if configured.is_empty() {
        return Ok(None);
    }

    let readable = resolver.fields(model, FieldOperation::Read)?;
    let mut fields: BTreeSet<&String> = configured.intersection(&readable).collect();
    if let Some(requested) = &search.search_fields {
        fields.retain(|f| requested.contains(*f));
    }
    if fields.is_empty() {
        return Ok(None);
    }

    Ok(Some(Predicate::any_of(fields.into_iter().map(|field| {
        Predicate::cond(Condition::new(
            field.clone(),
            Lookup::IContains,
            Value::String(query.to_string()),
        ))
    }))))
}
