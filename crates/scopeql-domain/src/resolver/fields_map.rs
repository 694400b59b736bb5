//! Depth-bounded fields-map construction.
//!
//! A fields map records, per model, the fields one operation may touch.
//! It is built breadth-first over the relationship graph from the root
//! model, visiting each (model, depth) pair at most once so cyclic schemas
//! terminate. Explicit field paths then replace the eager map: each path is
//! walked segment by segment, resolving permissions on demand for models
//! the depth bound did not reach.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::error::{DomainError, DomainResult};
use crate::model::{FieldKind, ModelId, PK_ALIAS};
use crate::query::LOOKUP_SEP;

use super::permissions::PermissionResolver;
use super::provider::FieldOperation;

/// Permitted fields per model for one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldsMap {
    models: BTreeMap<String, BTreeSet<String>>,
}

impl FieldsMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, model: &str) -> Option<&BTreeSet<String>> {
        self.models.get(model)
    }

    pub fn contains_model(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    pub fn contains(&self, model: &str, field: &str) -> bool {
        self.models.get(model).is_some_and(|f| f.contains(field))
    }

    pub fn models(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.models.iter().map(|(m, f)| (m.as_str(), f))
    }

    /// Adds `fields` to the set recorded for `model`.
    pub fn extend(&mut self, model: &str, fields: impl IntoIterator<Item = String>) {
        self.models.entry(model.to_string()).or_default().extend(fields);
    }

    fn insert_field(&mut self, model: &str, field: &str) {
        self.models
            .entry(model.to_string())
            .or_default()
            .insert(field.to_string());
    }
}

impl PermissionResolver {
    /// Builds, or returns the memoized, fields map for `model`.
    ///
    /// `depth` is clamped to the configured maximum. Create and update
    /// callers pass depth 0 since nested writes are not supported.
    ///
    /// # Errors
    ///
    /// Under the `error` unknown-field policy, an explicit path through a
    /// relation the caller may not traverse, or through a segment that is
    /// not a relation, fails with `DomainError::Validation`.
    pub fn fields_map(
        &self,
        model: &str,
        operation: FieldOperation,
        depth: u32,
        explicit_paths: &[String],
    ) -> DomainResult<Arc<FieldsMap>> {
        let depth = depth.min(self.config().max_depth);
        let key = (model.to_string(), operation, depth, explicit_paths.to_vec());
        if let Some(cached) = self.fields_maps.get(&key) {
            return Ok(Arc::clone(cached.value()));
        }

        let mut available = self.expand_to_depth(model, operation, depth)?;
        let map = if explicit_paths.is_empty() {
            available
        } else {
            self.resolve_explicit_paths(model, operation, explicit_paths, &mut available)?
        };

        debug!(model, ?operation, depth, models = map.models.len(), "built fields map");
        let map = Arc::new(map);
        self.fields_maps.insert(key, Arc::clone(&map));
        Ok(map)
    }

    fn expand_to_depth(&self, root: &str, operation: FieldOperation, depth: u32) -> DomainResult<FieldsMap> {
        let graph = self.registry().graph();
        let root_id = graph
            .id(root)
            .ok_or_else(|| DomainError::ModelNotRegistered {
                model: root.to_string(),
            })?;

        let mut map = FieldsMap::new();
        let mut visited: HashSet<(ModelId, u32)> = HashSet::new();
        let mut queue: VecDeque<(ModelId, u32)> = VecDeque::new();
        queue.push_back((root_id, 0));

        while let Some((id, level)) = queue.pop_front() {
            if !visited.insert((id, level)) {
                continue;
            }

            let name = graph.name(id);
            let allowed = self.fields(name, operation)?;
            if allowed.is_empty() {
                continue;
            }
            map.extend(name, allowed.iter().cloned());

            if level >= depth {
                continue;
            }
            for edge in graph.edges(id) {
                if allowed.contains(&edge.field) {
                    queue.push_back((edge.target, level + 1));
                }
            }
        }

        Ok(map)
    }

    fn resolve_explicit_paths(
        &self,
        root: &str,
        operation: FieldOperation,
        paths: &[String],
        available: &mut FieldsMap,
    ) -> DomainResult<FieldsMap> {
        let registry = self.registry();
        let strict = self.config().rejects_unknown();

        let mut map = FieldsMap::new();
        map.models.entry(root.to_string()).or_default();

        for path in paths {
            let segments: Vec<&str> = path.split(LOOKUP_SEP).collect();
            let mut current = root.to_string();

            for (i, segment) in segments.iter().enumerate() {
                if !available.contains_model(&current) {
                    let resolved = self.fields(&current, operation)?;
                    if !resolved.is_empty() {
                        available.extend(&current, resolved.iter().cloned());
                    }
                }

                if available.contains(&current, segment) {
                    map.insert_field(&current, segment);
                }

                let kind = registry.field_kind(&current, segment)?;

                if i == segments.len() - 1 {
                    let permitted = available.contains(&current, segment);
                    if let Some(target) = kind.and_then(FieldKind::target).filter(|_| permitted) {
                        if !available.contains_model(target) {
                            let resolved = self.fields(target, operation)?;
                            if !resolved.is_empty() {
                                available.extend(target, resolved.iter().cloned());
                            }
                        }
                        if let Some(fields) = available.get(target) {
                            let fields: Vec<String> = fields.iter().cloned().collect();
                            map.extend(target, fields);
                        }
                    }
                    break;
                }

                if !available.contains(&current, segment) {
                    if strict && *segment != PK_ALIAS {
                        return Err(DomainError::validation(format!(
                            "Field '{segment}' is not permitted on model '{current}'."
                        )));
                    }
                    break;
                }

                match kind {
                    Some(kind) if kind.is_relation() => {
                        if let Some(target) = kind.target() {
                            current = target.to_string();
                        }
                    }
                    // Structured columns swallow the rest of the path.
                    Some(FieldKind::Json) => break,
                    _ => {
                        if strict && !registry.is_computed(&current, segment)? {
                            return Err(DomainError::validation(format!(
                                "Field '{segment}' does not exist on model '{current}'."
                            )));
                        }
                        break;
                    }
                }
            }
        }

        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelConfig, ModelSchema, Registry};
    use crate::resolver::{
        Action, ActionSet, AllowAllPermission, FieldSet, PermissionProvider, RequestContext,
        ResolverConfig, UnknownFieldPolicy,
    };
    use crate::model::Row;

    struct Hidden;

    impl PermissionProvider for Hidden {
        fn allowed_actions(&self, _: &RequestContext, _: &str) -> ActionSet {
            ActionSet::new()
        }
        fn allowed_fields(&self, _: &RequestContext, _: &str, _: FieldOperation) -> FieldSet {
            FieldSet::none()
        }
        fn allowed_object_actions(&self, _: &RequestContext, _: &str, _: &Row) -> ActionSet {
            ActionSet::new()
        }
    }

    struct ReadFields(&'static [&'static str]);

    impl PermissionProvider for ReadFields {
        fn allowed_actions(&self, _: &RequestContext, _: &str) -> ActionSet {
            [Action::Read].into_iter().collect()
        }
        fn allowed_fields(&self, _: &RequestContext, _: &str, _: FieldOperation) -> FieldSet {
            FieldSet::only(self.0.iter().copied())
        }
        fn allowed_object_actions(&self, _: &RequestContext, _: &str, _: &Row) -> ActionSet {
            ActionSet::new()
        }
    }

    /// user -> manager (user), user -> team (team), team -> secret_plan (plan, hidden).
    fn resolver(policy: UnknownFieldPolicy) -> PermissionResolver {
        let registry = Registry::builder()
            .register(
                ModelSchema::new("user", "id")
                    .scalar("name")
                    .json("prefs")
                    .to_one("manager", "user")
                    .to_one("team", "team"),
                ModelConfig::new().with_provider(AllowAllPermission),
            )
            .and_then(|b| {
                b.register(
                    ModelSchema::new("team", "id")
                        .scalar("title")
                        .scalar("budget")
                        .to_one("secret_plan", "plan"),
                    ModelConfig::new().with_provider(ReadFields(&["id", "title", "secret_plan"])),
                )
            })
            .and_then(|b| {
                b.register(
                    ModelSchema::new("plan", "id").scalar("body"),
                    ModelConfig::new().with_provider(Hidden),
                )
            })
            .and_then(|b| b.build())
            .unwrap();
        PermissionResolver::new(
            Arc::new(registry),
            Arc::new(RequestContext::anonymous()),
            ResolverConfig::default().with_unknown_fields(policy),
        )
    }

    fn names(set: Option<&BTreeSet<String>>) -> Vec<&str> {
        set.map(|s| s.iter().map(String::as_str).collect()).unwrap_or_default()
    }

    // ====== Section 1: Breadth-first expansion ======

    #[test]
    fn test_depth_zero_only_contains_root() {
        let resolver = resolver(UnknownFieldPolicy::Error);
        let map = resolver.fields_map("user", FieldOperation::Read, 0, &[]).unwrap();

        assert_eq!(map.models().count(), 1);
        assert_eq!(names(map.get("user")), vec!["id", "manager", "name", "prefs", "team"]);
    }

    #[test]
    fn test_depth_one_follows_permitted_relations() {
        let resolver = resolver(UnknownFieldPolicy::Error);
        let map = resolver.fields_map("user", FieldOperation::Read, 1, &[]).unwrap();

        assert_eq!(names(map.get("team")), vec!["id", "secret_plan", "title"]);
        assert!(!map.contains_model("plan"));
    }

    #[test]
    fn test_model_without_permitted_fields_is_skipped() {
        let resolver = resolver(UnknownFieldPolicy::Error);
        let map = resolver.fields_map("user", FieldOperation::Read, 3, &[]).unwrap();
        assert!(!map.contains_model("plan"));
    }

    #[test]
    fn test_self_referential_schema_terminates_at_depth() {
        let resolver = resolver(UnknownFieldPolicy::Error);
        let map = resolver.fields_map("user", FieldOperation::Read, 5, &[]).unwrap();
        assert!(map.contains("user", "manager"));
    }

    #[test]
    fn test_depth_is_clamped_to_configured_maximum() {
        let resolver = resolver(UnknownFieldPolicy::Error);
        let a = resolver.fields_map("user", FieldOperation::Read, 5, &[]).unwrap();
        let b = resolver.fields_map("user", FieldOperation::Read, 500, &[]).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    // ====== Section 2: Explicit paths ======

    #[test]
    fn test_explicit_path_beyond_depth_resolves_lazily() {
        let resolver = resolver(UnknownFieldPolicy::Error);
        let paths = vec!["team__title".to_string()];

        let map = resolver.fields_map("user", FieldOperation::Read, 0, &paths).unwrap();

        assert_eq!(names(map.get("user")), vec!["team"]);
        assert_eq!(names(map.get("team")), vec!["title"]);
    }

    #[test]
    fn test_path_ending_in_relation_pulls_in_target_fields() {
        let resolver = resolver(UnknownFieldPolicy::Error);
        let paths = vec!["name".to_string(), "team".to_string()];

        let map = resolver.fields_map("user", FieldOperation::Read, 0, &paths).unwrap();

        assert_eq!(names(map.get("user")), vec!["name", "team"]);
        assert_eq!(names(map.get("team")), vec!["id", "secret_plan", "title"]);
    }

    #[test]
    fn test_unpermitted_relation_in_path_is_rejected_under_error_policy() {
        let resolver = resolver(UnknownFieldPolicy::Error);
        let paths = vec!["team__budget__x".to_string()];

        let err = resolver
            .fields_map("user", FieldOperation::Read, 0, &paths)
            .unwrap_err();
        assert_eq!(err.to_string(), "Field 'budget' is not permitted on model 'team'.");
    }

    #[test]
    fn test_scalar_in_middle_of_path_is_rejected_under_error_policy() {
        let resolver = resolver(UnknownFieldPolicy::Error);
        let paths = vec!["name__first".to_string()];

        let err = resolver
            .fields_map("user", FieldOperation::Read, 0, &paths)
            .unwrap_err();
        assert_eq!(err.to_string(), "Field 'name' does not exist on model 'user'.");
    }

    #[test]
    fn test_json_field_accepts_nested_segments() {
        let resolver = resolver(UnknownFieldPolicy::Error);
        let paths = vec!["prefs__theme__color".to_string()];
        let map = resolver.fields_map("user", FieldOperation::Read, 0, &paths).unwrap();
        assert_eq!(names(map.get("user")), vec!["prefs"]);
    }

    #[test]
    fn test_ignore_policy_stops_silently() {
        let resolver = resolver(UnknownFieldPolicy::Ignore);
        let paths = vec!["team__budget__x".to_string(), "nope__x".to_string()];

        let map = resolver.fields_map("user", FieldOperation::Read, 0, &paths).unwrap();

        assert_eq!(names(map.get("user")), vec!["team"]);
        assert!(names(map.get("team")).is_empty());
    }

    #[test]
    fn test_explicit_and_eager_agree_on_path_end_model() {
        let resolver = resolver(UnknownFieldPolicy::Error);
        let paths = vec!["manager__team__title".to_string()];

        let lazy = resolver.fields_map("user", FieldOperation::Read, 0, &paths).unwrap();
        let eager = resolver.fields_map("user", FieldOperation::Read, 3, &[]).unwrap();

        assert!(lazy.contains("team", "title"));
        assert!(eager.contains("team", "title"));
    }
}
