//! Filter trees.

use serde_json::Value;

use crate::error::{DomainError, DomainResult};
use crate::model::Row;
use crate::query::{Condition, Predicate};

/// One node of a caller-supplied filter tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum FilterNode {
    /// `conditions` are ANDed; the `Q` groups are ORed together, each
    /// group ANDing its own conditions.
    Filter { conditions: Row, any: Vec<Row> },
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Not(Box<FilterNode>),
    /// Placeholder for search; search is applied separately.
    Search,
    /// Matches every row.
    #[default]
    Empty,
}

impl FilterNode {
    /// Parses a filter tree from JSON.
    ///
    /// A node without `type` but with `conditions` is treated as a filter
    /// node. An `exclude` node negates its `child`, or its own conditions
    /// when it has no child.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for unknown node types or
    /// malformed payloads.
    pub fn parse(value: &Value) -> DomainResult<Self> {
        let node = match value {
            Value::Null => return Ok(FilterNode::Empty),
            Value::Object(node) if node.is_empty() => return Ok(FilterNode::Empty),
            Value::Object(node) => node,
            other => {
                return Err(DomainError::validation(format!(
                    "Filter node must be an object, got {other}"
                )))
            }
        };

        let Some(node_type) = node.get("type").and_then(Value::as_str) else {
            return if node.contains_key("conditions") {
                parse_filter(node)
            } else {
                Ok(FilterNode::Empty)
            };
        };

        match node_type {
            "filter" => parse_filter(node),
            "and" => Ok(FilterNode::And(parse_children(node)?)),
            "or" => Ok(FilterNode::Or(parse_children(node)?)),
            "exclude" | "not" => match node.get("child") {
                Some(child) if !child.is_null() => {
                    Ok(FilterNode::Not(Box::new(FilterNode::parse(child)?)))
                }
                _ => Ok(FilterNode::Not(Box::new(parse_filter(node)?))),
            },
            "search" => Ok(FilterNode::Search),
            other => Err(DomainError::validation(format!(
                "Unsupported AST node type: {other}"
            ))),
        }
    }

    /// Every condition key in the tree, whatever its nesting.
    pub fn condition_keys(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_keys(&mut out);
        out
    }

    fn collect_keys<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            FilterNode::Filter { conditions, any } => {
                out.extend(conditions.keys().map(String::as_str));
                for group in any {
                    out.extend(group.keys().map(String::as_str));
                }
            }
            FilterNode::And(children) | FilterNode::Or(children) => {
                for child in children {
                    child.collect_keys(out);
                }
            }
            FilterNode::Not(child) => child.collect_keys(out),
            FilterNode::Search | FilterNode::Empty => {}
        }
    }

    /// Converts the tree into a predicate.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for malformed condition keys.
    pub fn to_predicate(&self) -> DomainResult<Predicate> {
        Ok(match self {
            FilterNode::Filter { conditions, any } => {
                let mut parts = vec![conjunction(conditions)?];
                if !any.is_empty() {
                    let groups = any.iter().map(conjunction).collect::<DomainResult<Vec<_>>>()?;
                    parts.push(Predicate::any_of(groups));
                }
                Predicate::all_of(parts)
            }
            FilterNode::And(children) => Predicate::all_of(
                children
                    .iter()
                    .map(FilterNode::to_predicate)
                    .collect::<DomainResult<Vec<_>>>()?,
            ),
            // An empty `or` is the identity, not "no rows".
            FilterNode::Or(children) if children.is_empty() => Predicate::All,
            FilterNode::Or(children) => Predicate::any_of(
                children
                    .iter()
                    .map(FilterNode::to_predicate)
                    .collect::<DomainResult<Vec<_>>>()?,
            ),
            FilterNode::Not(child) => child.to_predicate()?.negate(),
            FilterNode::Search | FilterNode::Empty => Predicate::All,
        })
    }
}

fn conjunction(conditions: &Row) -> DomainResult<Predicate> {
    let parts = conditions
        .iter()
        .map(|(key, value)| Condition::parse(key, value.clone()).map(Predicate::cond))
        .collect::<DomainResult<Vec<_>>>()?;
    Ok(Predicate::all_of(parts))
}

fn parse_filter(node: &Row) -> DomainResult<FilterNode> {
    let conditions = match node.get("conditions") {
        None | Some(Value::Null) => Row::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            return Err(DomainError::validation(format!(
                "Filter conditions must be an object, got {other}"
            )))
        }
    };

    let any = match node.get("Q") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(groups)) => groups
            .iter()
            .map(|g| {
                g.as_object().cloned().ok_or_else(|| {
                    DomainError::validation("Each entry of 'Q' must be an object")
                })
            })
            .collect::<DomainResult<Vec<_>>>()?,
        Some(_) => return Err(DomainError::validation("'Q' must be a list")),
    };

    Ok(FilterNode::Filter { conditions, any })
}

fn parse_children(node: &Row) -> DomainResult<Vec<FilterNode>> {
    match node.get("children") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(children)) => children.iter().map(FilterNode::parse).collect(),
        Some(_) => Err(DomainError::validation("'children' must be a list")),
    }
}
