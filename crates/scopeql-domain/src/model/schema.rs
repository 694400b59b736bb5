//! Model schema definitions.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// A stored row: field name to JSON value.
pub type Row = serde_json::Map<String, Value>;

/// The kind of a declared model field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Plain column.
    Scalar,
    /// Opaque structured column; nested path segments are never checked.
    Json,
    /// Holds the primary key of one `target` row.
    ToOne { target: String },
    /// Holds a list of `target` primary keys.
    ToMany { target: String },
    /// Rows of `target` whose `via` field points back at this row.
    Reverse { target: String, via: String },
}

impl FieldKind {
    /// Returns the related model name for relation kinds.
    pub fn target(&self) -> Option<&str> {
        match self {
            FieldKind::ToOne { target }
            | FieldKind::ToMany { target }
            | FieldKind::Reverse { target, .. } => Some(target),
            FieldKind::Scalar | FieldKind::Json => None,
        }
    }

    pub fn is_relation(&self) -> bool {
        self.target().is_some()
    }

    pub fn is_reverse(&self) -> bool {
        matches!(self, FieldKind::Reverse { .. })
    }
}

/// A declared field of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

/// Declared shape of a model: name, primary key and fields.
///
/// The primary key is always present as a scalar field.
///
/// ```ignore
/// let post = ModelSchema::new("post", "id")
///     .scalar("title")
///     .to_one("author", "user")
///     .reverse("comments", "comment", "post");
/// ```
#[derive(Debug, Clone)]
pub struct ModelSchema {
    name: String,
    pk: String,
    fields: Vec<FieldDef>,
}

impl ModelSchema {
    /// Creates a schema with only its primary-key field.
    pub fn new(name: impl Into<String>, pk: impl Into<String>) -> Self {
        let pk = pk.into();
        Self {
            name: name.into(),
            fields: vec![FieldDef {
                name: pk.clone(),
                kind: FieldKind::Scalar,
            }],
            pk,
        }
    }

    pub fn scalar(self, name: impl Into<String>) -> Self {
        self.with_field(name, FieldKind::Scalar)
    }

    pub fn json(self, name: impl Into<String>) -> Self {
        self.with_field(name, FieldKind::Json)
    }

    pub fn to_one(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.with_field(
            name,
            FieldKind::ToOne {
                target: target.into(),
            },
        )
    }

    pub fn to_many(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.with_field(
            name,
            FieldKind::ToMany {
                target: target.into(),
            },
        )
    }

    pub fn reverse(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        via: impl Into<String>,
    ) -> Self {
        self.with_field(
            name,
            FieldKind::Reverse {
                target: target.into(),
                via: via.into(),
            },
        )
    }

    /// Adds a field, replacing any earlier field with the same name.
    pub fn with_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        self.fields.retain(|f| f.name != name);
        self.fields.push(FieldDef { name, kind });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pk(&self) -> &str {
        &self.pk
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Function computing an additional field from a stored row.
pub type ComputeFn = Arc<dyn Fn(&Row) -> Value + Send + Sync>;

/// A computed, read-only field registered alongside a model.
#[derive(Clone)]
pub struct AdditionalField {
    pub name: String,
    compute: ComputeFn,
}

impl AdditionalField {
    pub fn new(
        name: impl Into<String>,
        compute: impl Fn(&Row) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            compute: Arc::new(compute),
        }
    }

    /// Evaluates the field against a stored row.
    pub fn compute(&self, row: &Row) -> Value {
        (self.compute)(row)
    }
}

impl fmt::Debug for AdditionalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdditionalField")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
