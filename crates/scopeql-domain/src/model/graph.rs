//! Relationship graph over registered models.
//!
//! Models live in an arena indexed by [`ModelId`]; edges reference targets by
//! index, so self-referential and mutually-referential schemas need no
//! shared ownership and traversal state can be keyed by plain integers.

use std::collections::HashMap;

use crate::error::{DomainError, DomainResult};

use super::registry::RegisteredModel;

/// Index of a model in the relationship graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(usize);

impl ModelId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A field pointing at another model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationEdge {
    pub field: String,
    pub target: ModelId,
    pub reverse: bool,
}

/// One model and its outgoing relation edges.
#[derive(Debug, Clone)]
pub struct ModelNode {
    pub name: String,
    pub edges: Vec<RelationEdge>,
}

/// Directed graph: model -> relation field -> related model.
#[derive(Debug, Clone, Default)]
pub struct RelationshipGraph {
    nodes: Vec<ModelNode>,
    index: HashMap<String, ModelId>,
}

impl RelationshipGraph {
    /// Builds the graph from registered models.
    ///
    /// Reverse relations only become edges when the owning model exposes
    /// them explicitly.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ModelNotRegistered` if a relation targets an
    /// unknown model.
    pub(crate) fn build(models: &HashMap<String, RegisteredModel>) -> DomainResult<Self> {
        let mut names: Vec<&String> = models.keys().collect();
        names.sort();

        let index: HashMap<String, ModelId> = names
            .iter()
            .enumerate()
            .map(|(i, name)| ((*name).clone(), ModelId(i)))
            .collect();

        let mut nodes = Vec::with_capacity(names.len());
        for name in names {
            let registered = &models[name];
            let mut edges = Vec::new();
            for field in registered.schema().fields() {
                let Some(target) = field.kind.target() else {
                    continue;
                };
                if field.kind.is_reverse()
                    && !registered.config().fields.explicitly_includes(&field.name)
                {
                    continue;
                }
                let target_id =
                    *index
                        .get(target)
                        .ok_or_else(|| DomainError::ModelNotRegistered {
                            model: target.to_string(),
                        })?;
                edges.push(RelationEdge {
                    field: field.name.clone(),
                    target: target_id,
                    reverse: field.kind.is_reverse(),
                });
            }
            nodes.push(ModelNode {
                name: name.clone(),
                edges,
            });
        }

        Ok(Self { nodes, index })
    }

    pub fn id(&self, model: &str) -> Option<ModelId> {
        self.index.get(model).copied()
    }

    pub fn node(&self, id: ModelId) -> &ModelNode {
        &self.nodes[id.0]
    }

    pub fn name(&self, id: ModelId) -> &str {
        &self.nodes[id.0].name
    }

    pub fn edges(&self, id: ModelId) -> &[RelationEdge] {
        &self.nodes[id.0].edges
    }

    /// Looks up the edge for `field` on `id`, if that field is a traversable relation.
    pub fn edge(&self, id: ModelId, field: &str) -> Option<&RelationEdge> {
        self.nodes[id.0].edges.iter().find(|e| e.field == field)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{ModelConfig, ModelSchema, Registry};

    fn cyclic_registry() -> Registry {
        Registry::builder()
            .register(
                ModelSchema::new("user", "id")
                    .scalar("name")
                    .to_one("manager", "user")
                    .reverse("posts", "post", "author"),
                ModelConfig::new(),
            )
            .and_then(|b| {
                b.register(
                    ModelSchema::new("post", "id")
                        .scalar("title")
                        .to_one("author", "user"),
                    ModelConfig::new(),
                )
            })
            .and_then(|b| b.build())
            .unwrap()
    }

    #[test]
    fn test_self_referential_relation_points_back_at_same_node() {
        let registry = cyclic_registry();
        let graph = registry.graph();
        let user = graph.id("user").unwrap();

        let edge = graph.edge(user, "manager").unwrap();
        assert_eq!(edge.target, user);
    }

    #[test]
    fn test_reverse_relation_is_not_an_edge_unless_exposed() {
        let registry = cyclic_registry();
        let graph = registry.graph();
        let user = graph.id("user").unwrap();

        assert!(graph.edge(user, "posts").is_none());
        assert_eq!(graph.edges(user).len(), 1);
    }

    #[test]
    fn test_explicitly_exposed_reverse_relation_becomes_edge() {
        let registry = Registry::builder()
            .register(
                ModelSchema::new("user", "id")
                    .scalar("name")
                    .reverse("posts", "post", "author"),
                ModelConfig::new().with_fields(["id", "name", "posts"]),
            )
            .and_then(|b| {
                b.register(
                    ModelSchema::new("post", "id").to_one("author", "user"),
                    ModelConfig::new(),
                )
            })
            .and_then(|b| b.build())
            .unwrap();
        let graph = registry.graph();
        let user = graph.id("user").unwrap();

        let edge = graph.edge(user, "posts").unwrap();
        assert!(edge.reverse);
        assert_eq!(graph.name(edge.target), "post");
    }

    #[test]
    fn test_unknown_relation_target_fails_build() {
        let result = Registry::builder()
            .register(
                ModelSchema::new("post", "id").to_one("author", "ghost"),
                ModelConfig::new(),
            )
            .and_then(|b| b.build());
        assert!(result.is_err());
    }
}
