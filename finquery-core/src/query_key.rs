//! # Query Keys
//!
//! Structural identity for fetch requests.
//!
//! A [`QueryKey`] is the tuple `[resource, parts]` where `parts` is any
//! serializable value (pagination, ordering, search text, filters...).
//! Keys are normalized on construction: object members are sorted, so two
//! keys built from maps with different insertion order are equal and hash
//! to the same cache slot.

use crate::{QueryError, QueryResult};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Structural identity of a fetch request.
///
/// # Examples
///
/// ```
/// use finquery_core::QueryKey;
/// use serde_json::json;
///
/// let a = QueryKey::new("transactions", &json!({"page": 1, "search": "aapl"})).unwrap();
/// let b = QueryKey::new("transactions", &json!({"search": "aapl", "page": 1})).unwrap();
/// assert_eq!(a, b);
/// assert!(a.has_prefix("transactions"));
/// ```
#[derive(Clone)]
pub struct QueryKey {
    resource: String,
    parts: Value,
    canonical: String,
}

impl QueryKey {
    /// Builds a key from a resource name and any serializable structural parts.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::KeySerialization`](crate::QueryError::KeySerialization)
    /// if `parts` cannot be represented as JSON (e.g. a map with non-string keys).
    pub fn new<P>(resource: impl Into<String>, parts: &P) -> QueryResult<Self>
    where
        P: Serialize + ?Sized,
    {
        let parts = serde_json::to_value(parts)
            .map_err(|err| QueryError::KeySerialization(err.to_string()))?;
        Ok(Self::from_value(resource, parts))
    }

    /// Builds a key that is only identified by its resource name.
    pub fn resource(resource: impl Into<String>) -> Self {
        Self::from_value(resource, Value::Null)
    }

    /// Builds a key from an already materialized JSON value.
    pub fn from_value(resource: impl Into<String>, parts: Value) -> Self {
        let resource = resource.into();
        let parts = normalize(parts);
        let canonical =
            Value::Array(vec![Value::String(resource.clone()), parts.clone()]).to_string();
        Self {
            resource,
            parts,
            canonical,
        }
    }

    /// The first segment of the key.
    pub fn resource_name(&self) -> &str {
        &self.resource
    }

    /// The normalized structural parts.
    pub fn parts(&self) -> &Value {
        &self.parts
    }

    /// Looks up a top-level member of the parts object.
    pub fn part(&self, name: &str) -> Option<&Value> {
        self.parts.get(name)
    }

    /// Returns the canonical serialized form used for equality and hashing.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// Returns `true` when the key belongs to `resource`.
    pub fn has_prefix(&self, resource: &str) -> bool {
        self.resource == resource
    }
}

/// Free-function form of [`QueryKey::new`].
pub fn build_key<P: Serialize + ?Sized>(resource: &str, parts: &P) -> QueryResult<QueryKey> {
    QueryKey::new(resource, parts)
}

fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut members: Vec<(String, Value)> = map.into_iter().collect();
            members.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (name, member) in members {
                sorted.insert(name, normalize(member));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        other => other,
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryKey({})", self.canonical)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// Selects a set of cache keys.
///
/// Used as the predicate of invalidation and optimistic patching.
///
/// # Examples
///
/// ```
/// use finquery_core::{KeyFilter, QueryKey};
/// use serde_json::json;
///
/// let key = QueryKey::new("assets-indicators", &json!({"asset_id": 7})).unwrap();
/// assert!(KeyFilter::resource("assets-indicators").matches(&key));
/// assert!(KeyFilter::scoped("assets-indicators", "asset_id", json!(7)).matches(&key));
/// assert!(!KeyFilter::scoped("assets-indicators", "asset_id", json!(8)).matches(&key));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum KeyFilter {
    /// Every key in the cache.
    All,
    /// Every key whose resource name equals the given prefix.
    Resource(String),
    /// Exactly one key.
    Exact(QueryKey),
    /// Keys of a resource whose parts carry `field == value`.
    Scoped {
        resource: String,
        field: String,
        value: Value,
    },
}

impl KeyFilter {
    pub fn resource(resource: impl Into<String>) -> Self {
        Self::Resource(resource.into())
    }

    pub fn scoped(resource: impl Into<String>, field: impl Into<String>, value: Value) -> Self {
        Self::Scoped {
            resource: resource.into(),
            field: field.into(),
            value,
        }
    }

    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            Self::All => true,
            Self::Resource(resource) => key.has_prefix(resource),
            Self::Exact(exact) => exact == key,
            Self::Scoped {
                resource,
                field,
                value,
            } => key.has_prefix(resource) && key.part(field) == Some(value),
        }
    }
}

impl From<QueryKey> for KeyFilter {
    fn from(key: QueryKey) -> Self {
        Self::Exact(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::{BTreeMap, HashSet};

    #[test]
    fn test_nested_member_order_is_irrelevant() {
        let a = QueryKey::new(
            "transactions",
            &json!({"filters": {"action": ["BUY"], "asset": "7"}, "page_index": 0}),
        )
        .unwrap();
        let b = QueryKey::new(
            "transactions",
            &json!({"page_index": 0, "filters": {"asset": "7", "action": ["BUY"]}}),
        )
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), b.as_str());

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_array_order_is_significant() {
        let a = QueryKey::new("t", &json!({"action": ["BUY", "SELL"]})).unwrap();
        let b = QueryKey::new("t", &json!({"action": ["SELL", "BUY"]})).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_resource_is_part_of_identity() {
        let a = QueryKey::new("revenues", &json!({"page": 1})).unwrap();
        let b = QueryKey::new("expenses", &json!({"page": 1})).unwrap();
        assert_ne!(a, b);
        assert!(!a.has_prefix("expenses"));
    }

    #[test]
    fn test_non_string_map_keys_fail() {
        let mut parts = BTreeMap::new();
        parts.insert(vec![1u8], 1);
        assert!(QueryKey::new("t", &parts).is_err());
    }

    #[test]
    fn test_filters() {
        let key = QueryKey::new("reports-historic", &json!({"month": 3})).unwrap();
        assert!(KeyFilter::All.matches(&key));
        assert!(KeyFilter::from(key.clone()).matches(&key));
        assert!(!KeyFilter::resource("reports").matches(&key));
    }

    proptest! {
        #[test]
        fn prop_insertion_order_never_changes_identity(
            entries in proptest::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..8)
        ) {
            let mut forward = Map::new();
            for (k, v) in entries.iter() {
                forward.insert(k.clone(), json!(v));
            }
            let mut backward = Map::new();
            for (k, v) in entries.iter().rev() {
                backward.insert(k.clone(), json!(v));
            }
            let a = QueryKey::from_value("r", Value::Object(forward));
            let b = QueryKey::from_value("r", Value::Object(backward));
            prop_assert_eq!(a, b);
        }
    }
}
