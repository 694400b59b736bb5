//! Condition evaluation over JSON column values.
//!
//! A condition matches a row when any of the values reached through its
//! field path satisfies the lookup, so a path through a to-many relation
//! matches if at least one related row does.

use std::cmp::Ordering;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use dashmap::DashMap;
use regex::{Regex, RegexBuilder};
use scopeql_domain::query::{Condition, Lookup, Transform};
use serde_json::{json, Value};

use crate::error::{StorageError, StorageResult};

/// Compiled patterns keyed by (pattern, case-insensitive).
#[derive(Debug, Default)]
pub(crate) struct RegexCache {
    compiled: DashMap<(String, bool), Regex>,
}

impl RegexCache {
    fn get(&self, pattern: &str, insensitive: bool) -> StorageResult<Regex> {
        let key = (pattern.to_string(), insensitive);
        if let Some(regex) = self.compiled.get(&key) {
            return Ok(regex.clone());
        }
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(insensitive)
            .build()
            .map_err(|e| StorageError::InvalidFilter {
                message: format!("Invalid regular expression '{pattern}': {e}"),
            })?;
        self.compiled.insert(key, regex.clone());
        Ok(regex)
    }
}

/// Whether any of `values` satisfies `condition`.
pub(crate) fn matches(condition: &Condition, values: &[Value], regexes: &RegexCache) -> StorageResult<bool> {
    for value in values {
        let value = match condition.transform {
            Some(transform) => apply_transform(transform, value),
            None => value.clone(),
        };
        if test(condition.lookup, &value, &condition.value, regexes)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn test(lookup: Lookup, actual: &Value, expected: &Value, regexes: &RegexCache) -> StorageResult<bool> {
    if lookup == Lookup::IsNull {
        let want_null = expected.as_bool().unwrap_or(true);
        return Ok(actual.is_null() == want_null);
    }
    if actual.is_null() {
        return Ok(lookup == Lookup::Exact && expected.is_null());
    }

    Ok(match lookup {
        Lookup::Exact => values_equal(actual, expected),
        Lookup::IExact => text_test(actual, expected, |a, e| a.to_lowercase() == e.to_lowercase()),
        Lookup::Contains => match actual {
            Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
            _ => text_test(actual, expected, |a, e| a.contains(e)),
        },
        Lookup::IContains => {
            text_test(actual, expected, |a, e| a.to_lowercase().contains(&e.to_lowercase()))
        }
        Lookup::StartsWith => text_test(actual, expected, |a, e| a.starts_with(e)),
        Lookup::IStartsWith => {
            text_test(actual, expected, |a, e| a.to_lowercase().starts_with(&e.to_lowercase()))
        }
        Lookup::EndsWith => text_test(actual, expected, |a, e| a.ends_with(e)),
        Lookup::IEndsWith => {
            text_test(actual, expected, |a, e| a.to_lowercase().ends_with(&e.to_lowercase()))
        }
        Lookup::Gt => compare_values(actual, expected) == Some(Ordering::Greater),
        Lookup::Gte => matches!(
            compare_values(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Lookup::Lt => compare_values(actual, expected) == Some(Ordering::Less),
        Lookup::Lte => matches!(
            compare_values(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Lookup::In => expected
            .as_array()
            .is_some_and(|options| options.iter().any(|o| values_equal(actual, o))),
        Lookup::Range => match expected.as_array().map(Vec::as_slice) {
            Some([low, high]) => {
                matches!(compare_values(actual, low), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(compare_values(actual, high), Some(Ordering::Less | Ordering::Equal))
            }
            _ => false,
        },
        Lookup::Regex | Lookup::IRegex => {
            let Some(pattern) = expected.as_str() else {
                return Err(StorageError::InvalidFilter {
                    message: "Regular expression lookups need a string pattern".to_string(),
                });
            };
            let regex = regexes.get(pattern, lookup == Lookup::IRegex)?;
            as_text(actual).is_some_and(|text| regex.is_match(&text))
        }
        // Answered before the match.
        Lookup::IsNull => false,
    })
}

fn text_test(actual: &Value, expected: &Value, op: impl Fn(&str, &str) -> bool) -> bool {
    match (as_text(actual), as_text(expected)) {
        (Some(a), Some(e)) => op(&a, &e),
        _ => false,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Equality that treats `1` and `1.0` as the same number.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

/// Orders two values of the same kind; `None` across kinds.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Total order used for sorting: null, bool, number, string, array, object.
pub(crate) fn order_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    rank(a)
        .cmp(&rank(b))
        .then_with(|| compare_values(a, b).unwrap_or(Ordering::Equal))
}

/// Applies a date/time transform; values that do not parse become null.
pub(crate) fn apply_transform(transform: Transform, value: &Value) -> Value {
    let Some(text) = value.as_str() else {
        return Value::Null;
    };

    if let Some(dt) = parse_datetime(text) {
        return match transform {
            Transform::Year => json!(dt.year()),
            Transform::Month => json!(dt.month()),
            Transform::Day => json!(dt.day()),
            Transform::Hour => json!(dt.hour()),
            Transform::Minute => json!(dt.minute()),
            Transform::Second => json!(dt.second()),
            Transform::Week => json!(dt.iso_week().week()),
            Transform::WeekDay => json!(dt.weekday().number_from_sunday()),
            Transform::IsoWeekDay => json!(dt.weekday().number_from_monday()),
            Transform::Quarter => json!((dt.month() - 1) / 3 + 1),
            Transform::IsoYear => json!(dt.iso_week().year()),
            Transform::Date => json!(dt.format("%Y-%m-%d").to_string()),
            Transform::Time => json!(dt.format("%H:%M:%S").to_string()),
        };
    }

    match (NaiveTime::parse_from_str(text, "%H:%M:%S%.f"), transform) {
        (Ok(t), Transform::Hour) => json!(t.hour()),
        (Ok(t), Transform::Minute) => json!(t.minute()),
        (Ok(t), Transform::Second) => json!(t.second()),
        (Ok(t), Transform::Time) => json!(t.format("%H:%M:%S").to_string()),
        _ => Value::Null,
    }
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cond(key: &str, value: Value) -> Condition {
        Condition::parse(key, value).unwrap()
    }

    fn check(key: &str, expected: Value, actual: Value) -> bool {
        matches(&cond(key, expected), &[actual], &RegexCache::default()).unwrap()
    }

    #[test]
    fn test_exact_treats_integer_and_float_alike() {
        assert!(check("n", json!(1), json!(1.0)));
        assert!(!check("n", json!(1), json!(2)));
    }

    #[test]
    fn test_exact_null_matches_missing_values() {
        assert!(check("n", Value::Null, Value::Null));
        assert!(!check("n", json!(1), Value::Null));
    }

    #[test]
    fn test_text_lookups() {
        assert!(check("s__icontains", json!("WOR"), json!("hello world")));
        assert!(check("s__startswith", json!("he"), json!("hello")));
        assert!(!check("s__startswith", json!("He"), json!("hello")));
        assert!(check("s__iendswith", json!("LO"), json!("hello")));
        assert!(check("s__iexact", json!("HELLO"), json!("hello")));
    }

    #[test]
    fn test_comparison_and_range_lookups() {
        assert!(check("n__gt", json!(100), json!(150)));
        assert!(!check("n__gt", json!(100), json!(100)));
        assert!(check("n__lte", json!(100), json!(100)));
        assert!(check("n__range", json!([1, 5]), json!(5)));
        assert!(!check("n__range", json!([1, 5]), json!(6)));
        assert!(!check("n__gt", json!(1), json!("text")));
    }

    #[test]
    fn test_in_and_isnull_lookups() {
        assert!(check("n__in", json!([1, 2, 3]), json!(2)));
        assert!(!check("n__in", json!([1, 2, 3]), json!(4)));
        assert!(check("n__isnull", json!(true), Value::Null));
        assert!(check("n__isnull", json!(false), json!(0)));
    }

    #[test]
    fn test_contains_on_json_array() {
        assert!(check("tags__contains", json!("a"), json!(["a", "b"])));
    }

    #[test]
    fn test_regex_lookups_and_bad_pattern() {
        assert!(check("s__regex", json!("^h.*o$"), json!("hello")));
        assert!(check("s__iregex", json!("^H"), json!("hello")));

        let result = matches(
            &cond("s__regex", json!("(")),
            &[json!("x")],
            &RegexCache::default(),
        );
        assert!(matches!(result, Err(StorageError::InvalidFilter { .. })));
    }

    #[test]
    fn test_date_transforms() {
        let ts = json!("2024-03-15T10:30:45Z");
        assert!(check("created__year", json!(2024), ts.clone()));
        assert!(check("created__month__gte", json!(3), ts.clone()));
        assert!(check("created__quarter", json!(1), ts.clone()));
        assert!(check("created__hour", json!(10), ts.clone()));
        assert!(check("created__date", json!("2024-03-15"), ts.clone()));
        // 2024-03-15 was a Friday.
        assert!(check("created__week_day", json!(6), ts.clone()));
        assert!(check("created__iso_week_day", json!(5), ts));
    }

    #[test]
    fn test_transform_on_unparsable_value_is_null() {
        assert_eq!(apply_transform(Transform::Year, &json!("not a date")), Value::Null);
        assert_eq!(apply_transform(Transform::Year, &json!(5)), Value::Null);
        assert_eq!(apply_transform(Transform::Year, &json!("2020-01-02")), json!(2020));
    }

    #[test]
    fn test_any_value_match_semantics() {
        let c = cond("tags__name", json!("b"));
        let regexes = RegexCache::default();
        assert!(matches(&c, &[json!("a"), json!("b")], &regexes).unwrap());
        assert!(!matches(&c, &[], &regexes).unwrap());
    }

    #[test]
    fn test_sort_order_puts_null_first() {
        let mut values = vec![json!("b"), Value::Null, json!(3), json!("a"), json!(1)];
        values.sort_by(order_values);
        assert_eq!(values, vec![Value::Null, json!(1), json!(3), json!("a"), json!("b")]);
    }
}
