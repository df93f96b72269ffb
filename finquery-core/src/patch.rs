//! # Optimistic Patches
//!
//! Pure transforms over cached list payloads, applied to every live entry of a
//! resource right after a mutation succeeds so the visible table updates
//! without a round trip.
//!
//! List payloads have the shape `{ "results": [...], "count": n }` and rows are
//! identified by their `"id"` member.

use crate::KeyFilter;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

const RESULTS: &str = "results";
const COUNT: &str = "count";
const ID: &str = "id";

type Transform<V> = Arc<dyn Fn(&mut V) -> bool + Send + Sync>;

/// A transform bound to the set of cache keys it applies to.
///
/// The transform returns `true` when it changed the value; only changed
/// entries notify their subscribers.
///
/// # Examples
///
/// ```
/// use finquery_core::{KeyFilter, OptimisticPatch};
/// use finquery_core::patch::remove_row;
/// use serde_json::json;
///
/// let patch = OptimisticPatch::new(KeyFilter::resource("transactions"), remove_row(json!(4)));
/// let mut page = json!({"results": [{"id": 3}, {"id": 4}], "count": 12});
///
/// assert!(patch.apply(&mut page));
/// assert_eq!(page, json!({"results": [{"id": 3}], "count": 11}));
/// ```
pub struct OptimisticPatch<V> {
    pub filter: KeyFilter,
    transform: Transform<V>,
}

impl<V> OptimisticPatch<V> {
    pub fn new<F>(filter: KeyFilter, transform: F) -> Self
    where
        F: Fn(&mut V) -> bool + Send + Sync + 'static,
    {
        Self {
            filter,
            transform: Arc::new(transform),
        }
    }

    pub fn apply(&self, value: &mut V) -> bool {
        (self.transform)(value)
    }
}

impl<V> Clone for OptimisticPatch<V> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            transform: Arc::clone(&self.transform),
        }
    }
}

impl<V> fmt::Debug for OptimisticPatch<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticPatch")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

/// Removes the row with `id` from a list payload and decrements its `count`.
///
/// `count` is the server-side total for the request, so it is decremented on
/// every page of the resource, including pages that do not hold the row.
/// It never goes below zero.
pub fn remove_row(id: Value) -> impl Fn(&mut Value) -> bool + Send + Sync + 'static {
    move |page: &mut Value| {
        let mut changed = false;
        if let Some(rows) = page.get_mut(RESULTS).and_then(Value::as_array_mut) {
            let before = rows.len();
            rows.retain(|row| row.get(ID) != Some(&id));
            changed = rows.len() != before;
        }
        if let Some(count) = page.get_mut(COUNT) {
            if let Some(n) = count.as_u64() {
                if n > 0 {
                    *count = Value::from(n - 1);
                    changed = true;
                }
            }
        }
        changed
    }
}

/// Overwrites `fields` on the row with `id`, leaving every other member and
/// every other row untouched.
pub fn merge_row(
    id: Value,
    fields: Map<String, Value>,
) -> impl Fn(&mut Value) -> bool + Send + Sync + 'static {
    move |page: &mut Value| {
        let Some(rows) = page.get_mut(RESULTS).and_then(Value::as_array_mut) else {
            return false;
        };
        let mut changed = false;
        for row in rows.iter_mut().filter(|row| row.get(ID) == Some(&id)) {
            if let Some(object) = row.as_object_mut() {
                for (name, value) in &fields {
                    if object.get(name) != Some(value) {
                        object.insert(name.clone(), value.clone());
                        changed = true;
                    }
                }
            }
        }
        changed
    }
}
