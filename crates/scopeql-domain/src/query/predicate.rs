//! Row predicates.
//!
//! A [`Predicate`] is the resolved, store-independent form of every filter,
//! exclusion and permission row scope. Predicates are always built through
//! [`Predicate::all_of`], [`Predicate::any_of`] and [`Predicate::negate`],
//! which flatten nested combinators and fold away trivial terms. Two
//! structurally different filter trees that mean the same thing therefore
//! end up with the same predicate and the same rendered text.

use std::fmt;

use serde_json::Value;

use crate::error::{DomainError, DomainResult};

/// Path separator inside condition keys (`author__name__icontains`).
pub const LOOKUP_SEP: &str = "__";

/// Comparison applied to a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lookup {
    Exact,
    IExact,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    IsNull,
    Range,
    Regex,
    IRegex,
}

impl Lookup {
    /// Parses a lookup suffix. `eq` is accepted as an alias of `exact`.
    pub fn parse(segment: &str) -> Option<Self> {
        let lookup = match segment {
            "exact" | "eq" => Lookup::Exact,
            "iexact" => Lookup::IExact,
            "contains" => Lookup::Contains,
            "icontains" => Lookup::IContains,
            "startswith" => Lookup::StartsWith,
            "istartswith" => Lookup::IStartsWith,
            "endswith" => Lookup::EndsWith,
            "iendswith" => Lookup::IEndsWith,
            "gt" => Lookup::Gt,
            "gte" => Lookup::Gte,
            "lt" => Lookup::Lt,
            "lte" => Lookup::Lte,
            "in" => Lookup::In,
            "isnull" => Lookup::IsNull,
            "range" => Lookup::Range,
            "regex" => Lookup::Regex,
            "iregex" => Lookup::IRegex,
            _ => return None,
        };
        Some(lookup)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Lookup::Exact => "exact",
            Lookup::IExact => "iexact",
            Lookup::Contains => "contains",
            Lookup::IContains => "icontains",
            Lookup::StartsWith => "startswith",
            Lookup::IStartsWith => "istartswith",
            Lookup::EndsWith => "endswith",
            Lookup::IEndsWith => "iendswith",
            Lookup::Gt => "gt",
            Lookup::Gte => "gte",
            Lookup::Lt => "lt",
            Lookup::Lte => "lte",
            Lookup::In => "in",
            Lookup::IsNull => "isnull",
            Lookup::Range => "range",
            Lookup::Regex => "regex",
            Lookup::IRegex => "iregex",
        }
    }
}

/// Date/time part extracted from a field before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transform {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Week,
    WeekDay,
    IsoWeekDay,
    Quarter,
    IsoYear,
    Date,
    Time,
}

impl Transform {
    pub fn parse(segment: &str) -> Option<Self> {
        let transform = match segment {
            "year" => Transform::Year,
            "month" => Transform::Month,
            "day" => Transform::Day,
            "hour" => Transform::Hour,
            "minute" => Transform::Minute,
            "second" => Transform::Second,
            "week" => Transform::Week,
            "week_day" => Transform::WeekDay,
            "iso_week_day" => Transform::IsoWeekDay,
            "quarter" => Transform::Quarter,
            "iso_year" => Transform::IsoYear,
            "date" => Transform::Date,
            "time" => Transform::Time,
            _ => return None,
        };
        Some(transform)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Transform::Year => "year",
            Transform::Month => "month",
            Transform::Day => "day",
            Transform::Hour => "hour",
            Transform::Minute => "minute",
            Transform::Second => "second",
            Transform::Week => "week",
            Transform::WeekDay => "week_day",
            Transform::IsoWeekDay => "iso_week_day",
            Transform::Quarter => "quarter",
            Transform::IsoYear => "iso_year",
            Transform::Date => "date",
            Transform::Time => "time",
        }
    }
}

/// Whether a key segment is a lookup or transform rather than a field name.
pub fn is_modifier(segment: &str) -> bool {
    Lookup::parse(segment).is_some() || Transform::parse(segment).is_some()
}

/// Splits a condition key into its field segments, dropping trailing
/// lookup and transform modifiers.
pub fn field_segments(key: &str) -> Vec<&str> {
    let mut segments: Vec<&str> = key.split(LOOKUP_SEP).collect();
    if segments.len() > 1 && segments.last().is_some_and(|s| Lookup::parse(s).is_some()) {
        segments.pop();
    }
    if segments.len() > 1 && segments.last().is_some_and(|s| Transform::parse(s).is_some()) {
        segments.pop();
    }
    segments
}

/// One `path [transform] lookup value` comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Field path with `__` separators, modifiers removed.
    pub path: String,
    pub transform: Option<Transform>,
    pub lookup: Lookup,
    pub value: Value,
}

impl Condition {
    pub fn new(path: impl Into<String>, lookup: Lookup, value: Value) -> Self {
        Self {
            path: path.into(),
            transform: None,
            lookup,
            value,
        }
    }

    /// Parses a filter key such as `created__year__gte`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the key has no field segment or
    /// the value does not fit the lookup.
    pub fn parse(key: &str, value: Value) -> DomainResult<Self> {
        let mut segments: Vec<&str> = key.split(LOOKUP_SEP).collect();
        let mut lookup = Lookup::Exact;
        let mut transform = None;

        if segments.len() > 1 {
            if let Some(parsed) = segments.last().and_then(|s| Lookup::parse(s)) {
                lookup = parsed;
                segments.pop();
            }
        }
        if segments.len() > 1 {
            if let Some(parsed) = segments.last().and_then(|s| Transform::parse(s)) {
                transform = Some(parsed);
                segments.pop();
            }
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(DomainError::validation(format!(
                "Invalid filter key '{key}'"
            )));
        }

        match lookup {
            Lookup::In if !value.is_array() => {
                return Err(DomainError::validation(format!(
                    "Lookup 'in' on '{key}' expects a list"
                )));
            }
            Lookup::Range if value.as_array().map_or(true, |v| v.len() != 2) => {
                return Err(DomainError::validation(format!(
                    "Lookup 'range' on '{key}' expects a list of two values"
                )));
            }
            Lookup::IsNull if !value.is_boolean() => {
                return Err(DomainError::validation(format!(
                    "Lookup 'isnull' on '{key}' expects a boolean"
                )));
            }
            _ => {}
        }

        Ok(Self {
            path: segments.join(LOOKUP_SEP),
            transform,
            lookup,
            value,
        })
    }

    /// Path segments of the field this condition compares.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split(LOOKUP_SEP)
    }
}

/// Boolean combination of conditions over a model's rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Every row.
    All,
    /// No row.
    Nothing,
    Cond(Condition),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn cond(condition: Condition) -> Self {
        Predicate::Cond(condition)
    }

    /// `field == value`.
    pub fn eq(path: impl Into<String>, value: Value) -> Self {
        Predicate::Cond(Condition::new(path, Lookup::Exact, value))
    }

    /// Conjunction. `All` terms vanish and any `Nothing` term wins.
    pub fn all_of(parts: impl IntoIterator<Item = Predicate>) -> Self {
        let mut terms = Vec::new();
        for part in parts {
            match part {
                Predicate::All => {}
                Predicate::Nothing => return Predicate::Nothing,
                Predicate::And(inner) => terms.extend(inner),
                other => terms.push(other),
            }
        }
        match terms.len() {
            0 => Predicate::All,
            1 => terms.remove(0),
            _ => Predicate::And(terms),
        }
    }

    /// Disjunction. `Nothing` terms vanish and any `All` term wins.
    pub fn any_of(parts: impl IntoIterator<Item = Predicate>) -> Self {
        let mut terms = Vec::new();
        for part in parts {
            match part {
                Predicate::Nothing => {}
                Predicate::All => return Predicate::All,
                Predicate::Or(inner) => terms.extend(inner),
                other => terms.push(other),
            }
        }
        match terms.len() {
            0 => Predicate::Nothing,
            1 => terms.remove(0),
            _ => Predicate::Or(terms),
        }
    }

    pub fn negate(self) -> Self {
        match self {
            Predicate::All => Predicate::Nothing,
            Predicate::Nothing => Predicate::All,
            Predicate::Not(inner) => *inner,
            other => Predicate::Not(Box::new(other)),
        }
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Predicate::Nothing)
    }

    /// Every condition in the tree, depth first.
    pub fn conditions(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect_conditions(&mut out);
        out
    }

    fn collect_conditions<'a>(&'a self, out: &mut Vec<&'a Condition>) {
        match self {
            Predicate::All | Predicate::Nothing => {}
            Predicate::Cond(c) => out.push(c),
            Predicate::And(parts) | Predicate::Or(parts) => {
                for part in parts {
                    part.collect_conditions(out);
                }
            }
            Predicate::Not(inner) => inner.collect_conditions(out),
        }
    }

    /// Appends the textual form to `text`, pushing bound values to `params`.
    pub(crate) fn render_into(&self, text: &mut String, params: &mut Vec<Value>) {
        match self {
            Predicate::All => text.push_str("TRUE"),
            Predicate::Nothing => text.push_str("FALSE"),
            Predicate::Cond(c) => {
                params.push(c.value.clone());
                match c.transform {
                    Some(t) => text.push_str(&format!("{}({})", t.as_str().to_uppercase(), c.path)),
                    None => text.push_str(&c.path),
                }
                text.push_str(&format!(" {} ${}", c.lookup.as_str().to_uppercase(), params.len()));
            }
            Predicate::And(parts) | Predicate::Or(parts) => {
                let joiner = if matches!(self, Predicate::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                text.push('(');
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        text.push_str(joiner);
                    }
                    part.render_into(text, params);
                }
                text.push(')');
            }
            Predicate::Not(inner) => {
                text.push_str("NOT ");
                inner.render_into(text, params);
            }
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut text = String::new();
        let mut params = Vec::new();
        self.render_into(&mut text, &mut params);
        f.write_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_key_defaults_to_exact() {
        let cond = Condition::parse("title", json!("x")).unwrap();
        assert_eq!(cond.path, "title");
        assert_eq!(cond.lookup, Lookup::Exact);
        assert_eq!(cond.transform, None);
    }

    #[test]
    fn test_parse_relation_path_with_transform_and_lookup() {
        let cond = Condition::parse("author__joined__year__gte", json!(2020)).unwrap();
        assert_eq!(cond.path, "author__joined");
        assert_eq!(cond.transform, Some(Transform::Year));
        assert_eq!(cond.lookup, Lookup::Gte);
    }

    #[test]
    fn test_eq_is_an_alias_of_exact() {
        let cond = Condition::parse("value__eq", json!(3)).unwrap();
        assert_eq!(cond.lookup, Lookup::Exact);
        assert_eq!(cond.path, "value");
    }

    #[test]
    fn test_lone_modifier_name_is_a_field() {
        // A model may have a field literally called "year".
        let cond = Condition::parse("year", json!(1999)).unwrap();
        assert_eq!(cond.path, "year");
        assert_eq!(cond.transform, None);
    }

    #[test]
    fn test_in_lookup_requires_list() {
        assert!(Condition::parse("id__in", json!(1)).is_err());
        assert!(Condition::parse("id__in", json!([1, 2])).is_ok());
    }

    #[test]
    fn test_field_segments_strip_modifiers() {
        assert_eq!(field_segments("a__b__c__icontains"), vec!["a", "b", "c"]);
        assert_eq!(field_segments("created__date__lt"), vec!["created"]);
        assert_eq!(field_segments("name"), vec!["name"]);
    }

    #[test]
    fn test_all_of_flattens_and_folds() {
        let a = Predicate::eq("a", json!(1));
        let b = Predicate::eq("b", json!(2));
        let nested = Predicate::all_of([Predicate::All, Predicate::all_of([a.clone()]), b.clone()]);
        assert_eq!(nested, Predicate::And(vec![a.clone(), b]));

        assert_eq!(Predicate::all_of([a, Predicate::Nothing]), Predicate::Nothing);
    }

    #[test]
    fn test_any_of_flattens_and_folds() {
        let a = Predicate::eq("a", json!(1));
        assert_eq!(Predicate::any_of(Vec::new()), Predicate::Nothing);
        assert_eq!(Predicate::any_of([Predicate::Nothing, a.clone()]), a);
        assert_eq!(Predicate::any_of([a, Predicate::All]), Predicate::All);
    }

    #[test]
    fn test_double_negation_cancels() {
        let a = Predicate::eq("a", json!(1));
        assert_eq!(a.clone().negate().negate(), a);
        assert_eq!(Predicate::All.negate(), Predicate::Nothing);
    }

    #[test]
    fn test_display_numbers_parameters_in_order() {
        let p = Predicate::all_of([
            Predicate::eq("a", json!(1)),
            Predicate::cond(Condition::parse("b__gt", json!(2)).unwrap()).negate(),
        ]);
        assert_eq!(p.to_string(), "(a EXACT $1 AND NOT b GT $2)");
    }
}
