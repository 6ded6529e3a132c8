//! Filter, update and sort vocabulary shared by every store backend.
//!
//! Documents are plain JSON. Dotted paths descend into nested objects and
//! fan out across arrays, so `cast.name` matches any cast member's name.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Serialize a value into the store's document representation.
pub fn to_value(value: impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

// ============================================================================
// Sort
// ============================================================================

/// Sort direction for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

impl SortDirection {
    /// Parse `asc`/`desc`, returning `None` for anything else.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "asc" | "ascending" => Some(Self::Ascending),
            "desc" | "descending" => Some(Self::Descending),
            _ => None,
        }
    }

    /// Parse from string, returning default if invalid.
    pub fn from_str_or_default(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }

    /// MongoDB sort specifier.
    pub const fn as_i32(&self) -> i32 {
        match self {
            Self::Ascending => 1,
            Self::Descending => -1,
        }
    }
}

/// Sort, skip and limit for `find`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Vec<(String, SortDirection)>,
    pub skip: u64,
    pub limit: Option<u64>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push((field.into(), direction));
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

// ============================================================================
// Filter
// ============================================================================

/// A predicate over documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    Ne(String, Value),
    In(String, Vec<Value>),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    /// Case-insensitive substring.
    Contains(String, String),
    /// Case-insensitive prefix.
    StartsWith(String, String),
    Exists(String, bool),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Serialize) -> Self {
        Self::Eq(field.to_string(), to_value(value))
    }

    pub fn ne(field: &str, value: impl Serialize) -> Self {
        Self::Ne(field.to_string(), to_value(value))
    }

    pub fn is_in<V: Serialize>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Self::In(field.to_string(), values.into_iter().map(to_value).collect())
    }

    pub fn gt(field: &str, value: impl Serialize) -> Self {
        Self::Gt(field.to_string(), to_value(value))
    }

    pub fn gte(field: &str, value: impl Serialize) -> Self {
        Self::Gte(field.to_string(), to_value(value))
    }

    pub fn lt(field: &str, value: impl Serialize) -> Self {
        Self::Lt(field.to_string(), to_value(value))
    }

    pub fn lte(field: &str, value: impl Serialize) -> Self {
        Self::Lte(field.to_string(), to_value(value))
    }

    pub fn contains(field: &str, needle: &str) -> Self {
        Self::Contains(field.to_string(), needle.to_string())
    }

    pub fn starts_with(field: &str, prefix: &str) -> Self {
        Self::StartsWith(field.to_string(), prefix.to_string())
    }

    pub fn exists(field: &str, present: bool) -> Self {
        Self::Exists(field.to_string(), present)
    }

    /// Conjunction. `All` operands are dropped and nested `And`s flattened.
    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        let mut parts = Vec::new();
        for f in filters {
            match f {
                Filter::All => {}
                Filter::And(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Filter::All,
            1 => parts.remove(0),
            _ => Filter::And(parts),
        }
    }

    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    /// Combine with another filter using AND.
    pub fn with(self, other: Filter) -> Self {
        Filter::and([self, other])
    }

    /// Evaluate against a JSON document.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, expected) => {
                if expected.is_null() {
                    return candidates(doc, field).is_empty()
                        || candidates(doc, field).iter().any(|v| v.is_null());
                }
                candidates(doc, field)
                    .iter()
                    .any(|v| values_equal(v, expected))
            }
            Filter::Ne(field, expected) => !Filter::Eq(field.clone(), expected.clone()).matches(doc),
            Filter::In(field, options) => candidates(doc, field)
                .iter()
                .any(|v| options.iter().any(|o| values_equal(v, o))),
            Filter::Gt(field, bound) => compare_any(doc, field, bound, |o| o == Ordering::Greater),
            Filter::Gte(field, bound) => compare_any(doc, field, bound, |o| o != Ordering::Less),
            Filter::Lt(field, bound) => compare_any(doc, field, bound, |o| o == Ordering::Less),
            Filter::Lte(field, bound) => compare_any(doc, field, bound, |o| o != Ordering::Greater),
            Filter::Contains(field, needle) => {
                let needle = needle.to_lowercase();
                candidates(doc, field).iter().any(|v| {
                    v.as_str()
                        .map(|s| s.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
            }
            Filter::StartsWith(field, prefix) => {
                let prefix = prefix.to_lowercase();
                candidates(doc, field).iter().any(|v| {
                    v.as_str()
                        .map(|s| s.to_lowercase().starts_with(&prefix))
                        .unwrap_or(false)
                })
            }
            Filter::Exists(field, present) => {
                let found = lookup(doc, field).iter().any(|v| !v.is_null());
                found == *present
            }
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
        }
    }
}

/// Values reached by a dotted path, fanning out across arrays.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![doc];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => {
                    if let Some(child) = map.get(segment) {
                        next.push(child);
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        if let Some(child) = item.as_object().and_then(|m| m.get(segment)) {
                            next.push(child);
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }
    current
}

/// Leaf values for matching: arrays contribute each element and themselves.
fn candidates<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut out = Vec::new();
    for value in lookup(doc, path) {
        if let Value::Array(items) = value {
            out.extend(items.iter());
        }
        out.push(value);
    }
    out
}

fn compare_any(doc: &Value, field: &str, bound: &Value, pred: impl Fn(Ordering) -> bool) -> bool {
    candidates(doc, field)
        .iter()
        .any(|v| compare_values(v, bound).map(&pred).unwrap_or(false))
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Compare two scalar values of the same kind.
///
/// Strings that both parse as RFC 3339 timestamps compare chronologically.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (parse_datetime(x), parse_datetime(y)) {
            (Some(dx), Some(dy)) => Some(dx.cmp(&dy)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Some(Ordering::Equal) || a == b
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total order used for sorting; missing fields sort first ascending.
pub fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or_else(|| type_rank(a).cmp(&type_rank(b))),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

// ============================================================================
// Update
// ============================================================================

/// A partial document update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub set: Vec<(String, Value)>,
    pub unset: Vec<String>,
    pub inc: Vec<(String, i64)>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Serialize) -> Self {
        self.set.push((field.to_string(), to_value(value)));
        self
    }

    pub fn unset(mut self, field: &str) -> Self {
        self.unset.push(field.to_string());
        self
    }

    pub fn inc(mut self, field: &str, by: i64) -> Self {
        self.inc.push((field.to_string(), by));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty() && self.inc.is_empty()
    }

    /// Apply in place to a JSON document.
    pub fn apply(&self, doc: &mut Value) {
        for (path, value) in &self.set {
            set_path(doc, path, value.clone());
        }
        for path in &self.unset {
            remove_path(doc, path);
        }
        for (path, by) in &self.inc {
            let current = lookup(doc, path).first().and_then(|v| v.as_i64()).unwrap_or(0);
            set_path(doc, path, Value::from(current.saturating_add(*by)));
        }
    }
}

fn set_path(doc: &mut Value, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = match segments.pop() {
        Some(last) => last,
        None => return,
    };

    let mut current = doc;
    for segment in segments {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let map = match current.as_object_mut() {
            Some(map) => map,
            None => return,
        };
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Some(map) = current.as_object_mut() {
        map.insert(last.to_string(), value);
    }
}

fn remove_path(doc: &mut Value, path: &str) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = match segments.pop() {
        Some(last) => last,
        None => return,
    };

    let mut current = doc;
    for segment in segments {
        current = match current.get_mut(segment) {
            Some(next) => next,
            None => return,
        };
    }
    if let Some(map) = current.as_object_mut() {
        map.remove(last);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn movie() -> Value {
        json!({
            "id": "c1",
            "title": "The Long Night",
            "genres": ["Drama", "Thriller"],
            "cast": [{"name": "Ada Stone"}, {"name": "Rui Park"}],
            "rating": 7.5,
            "view_count": 10,
            "release_date": "2021-06-01T00:00:00Z",
            "status": "published"
        })
    }

    #[test]
    fn test_eq_matches_array_elements() {
        assert!(Filter::eq("genres", "Drama").matches(&movie()));
        assert!(!Filter::eq("genres", "Comedy").matches(&movie()));
        assert!(Filter::is_in("genres", ["Comedy", "Thriller"]).matches(&movie()));
    }

    #[test]
    fn test_nested_array_path() {
        assert!(Filter::contains("cast.name", "rui").matches(&movie()));
        assert!(!Filter::contains("cast.name", "zed").matches(&movie()));
    }

    #[test]
    fn test_ranges_compare_numbers_and_dates() {
        assert!(Filter::gte("rating", 7).matches(&movie()));
        assert!(!Filter::gt("rating", 7.5).matches(&movie()));
        assert!(Filter::and([
            Filter::gte("release_date", "2021-01-01T00:00:00Z"),
            Filter::lt("release_date", "2022-01-01T00:00:00Z"),
        ])
        .matches(&movie()));
        // Mixed precision timestamps still compare chronologically.
        assert!(Filter::lt("release_date", "2021-06-01T00:00:00.500+00:00").matches(&movie()));
    }

    #[test]
    fn test_starts_with_is_case_insensitive() {
        assert!(Filter::starts_with("title", "the l").matches(&movie()));
        assert!(!Filter::starts_with("title", "night").matches(&movie()));
    }

    #[test]
    fn test_ne_and_exists() {
        assert!(Filter::ne("id", "c2").matches(&movie()));
        assert!(!Filter::ne("id", "c1").matches(&movie()));
        assert!(Filter::exists("title", true).matches(&movie()));
        assert!(Filter::exists("missing", false).matches(&movie()));
        assert!(Filter::eq("missing", Value::Null).matches(&movie()));
    }

    #[test]
    fn test_and_flattens() {
        let f = Filter::and([Filter::All, Filter::eq("a", 1)]);
        assert_eq!(f, Filter::eq("a", 1));
        assert_eq!(Filter::and(Vec::new()), Filter::All);
    }

    #[test]
    fn test_update_apply() {
        let mut doc = movie();
        Update::new()
            .set("status", "archived")
            .set("subscription.status", "active")
            .inc("view_count", 1)
            .inc("like_count", 2)
            .unset("rating")
            .apply(&mut doc);

        assert_eq!(doc["status"], "archived");
        assert_eq!(doc["subscription"]["status"], "active");
        assert_eq!(doc["view_count"], 11);
        assert_eq!(doc["like_count"], 2);
        assert!(doc.get("rating").is_none());
    }

    #[test]
    fn test_sort_order_puts_missing_first() {
        let a = json!(1);
        assert_eq!(sort_order(None, Some(&a)), Ordering::Less);
        assert_eq!(sort_order(Some(&json!(2)), Some(&a)), Ordering::Greater);
    }
}
