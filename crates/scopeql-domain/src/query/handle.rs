//! Chainable query handles.

use serde_json::Value;

use crate::model::PK_ALIAS;

use super::predicate::{Lookup, Predicate};

/// One `orderBy` term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    pub path: String,
    pub descending: bool,
}

impl OrderTerm {
    /// Parses `field` or `-field`.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('-') {
            Some(path) => Self {
                path: path.to_string(),
                descending: true,
            },
            None => Self {
                path: raw.to_string(),
                descending: false,
            },
        }
    }
}

/// Deterministic text form of a handle plus its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedQuery {
    pub text: String,
    pub params: Vec<Value>,
}

impl RenderedQuery {
    /// Parameters as canonical JSON. `serde_json` maps are key-ordered, so
    /// equal values always serialize identically.
    pub fn params_json(&self) -> String {
        Value::Array(self.params.clone()).to_string()
    }
}

/// Rows of one model satisfying a predicate, with ordering, a window and
/// relations to load.
///
/// Handles are plain values: every builder method consumes the handle and
/// returns the narrowed one. A handle is owned by a single request.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHandle {
    model: String,
    predicate: Predicate,
    order_by: Vec<OrderTerm>,
    offset: u64,
    limit: Option<u64>,
    select_related: Vec<String>,
    prefetch_related: Vec<String>,
}

impl QueryHandle {
    /// All rows of `model`.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            predicate: Predicate::All,
            order_by: Vec::new(),
            offset: 0,
            limit: None,
            select_related: Vec::new(),
            prefetch_related: Vec::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn order_by(&self) -> &[OrderTerm] {
        &self.order_by
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn select_related(&self) -> &[String] {
        &self.select_related
    }

    pub fn prefetch_related(&self) -> &[String] {
        &self.prefetch_related
    }

    /// Narrows to rows also matching `predicate`.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        let current = std::mem::replace(&mut self.predicate, Predicate::All);
        self.predicate = Predicate::all_of([current, predicate]);
        self
    }

    /// Narrows to rows not matching `predicate`.
    pub fn exclude(self, predicate: Predicate) -> Self {
        self.filter(predicate.negate())
    }

    /// Narrows to the rows with the given primary keys.
    pub fn with_pks(self, pks: Vec<Value>) -> Self {
        if pks.is_empty() {
            return self.filter(Predicate::Nothing);
        }
        self.filter(Predicate::cond(super::Condition::new(
            PK_ALIAS,
            Lookup::In,
            Value::Array(pks),
        )))
    }

    pub fn ordered_by(mut self, terms: Vec<OrderTerm>) -> Self {
        self.order_by = terms;
        self
    }

    /// Applies an offset/limit window on top of any existing one.
    pub fn sliced(mut self, offset: u64, limit: Option<u64>) -> Self {
        self.offset += offset;
        self.limit = match (self.limit, limit) {
            (Some(current), Some(new)) => Some(current.saturating_sub(offset).min(new)),
            (Some(current), None) => Some(current.saturating_sub(offset)),
            (None, new) => new,
        };
        self
    }

    /// Same rows without ordering or window, for counting and mutation.
    pub fn unsliced(&self) -> Self {
        Self {
            order_by: Vec::new(),
            offset: 0,
            limit: None,
            ..self.clone()
        }
    }

    /// Reverses every ordering term, ordering by primary key when there are none.
    pub fn reversed(mut self) -> Self {
        if self.order_by.is_empty() {
            self.order_by.push(OrderTerm {
                path: PK_ALIAS.to_string(),
                descending: true,
            });
        } else {
            for term in &mut self.order_by {
                term.descending = !term.descending;
            }
        }
        self
    }

    pub fn with_select_related(mut self, fields: Vec<String>) -> Self {
        self.select_related = fields;
        self
    }

    pub fn with_prefetch_related(mut self, fields: Vec<String>) -> Self {
        self.prefetch_related = fields;
        self
    }

    /// Whether the handle can never match a row.
    pub fn is_empty_scope(&self) -> bool {
        self.predicate.is_nothing() || self.limit == Some(0)
    }

    /// Deterministic low-level representation used for cache identity.
    pub fn render(&self) -> RenderedQuery {
        let mut text = format!("SELECT {} WHERE ", self.model);
        let mut params = Vec::new();
        self.predicate.render_into(&mut text, &mut params);

        if !self.order_by.is_empty() {
            let terms: Vec<String> = self
                .order_by
                .iter()
                .map(|t| format!("{} {}", t.path, if t.descending { "DESC" } else { "ASC" }))
                .collect();
            text.push_str(&format!(" ORDER BY {}", terms.join(", ")));
        }
        if let Some(limit) = self.limit {
            text.push_str(&format!(" LIMIT {limit}"));
        }
        if self.offset > 0 {
            text.push_str(&format!(" OFFSET {}", self.offset));
        }
        if !self.select_related.is_empty() {
            text.push_str(&format!(" JOIN {}", self.select_related.join(",")));
        }
        if !self.prefetch_related.is_empty() {
            text.push_str(&format!(" PREFETCH {}", self.prefetch_related.join(",")));
        }

        RenderedQuery { text, params }
    }
}
