use finquery_core::{InvalidationGraph, MutationEffects, QueryResult};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::query_cache::{InvalidateOptions, QueryCache};
use crate::QueryValue;

/// Summary of what a successful mutation did to the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedEffects {
    /// Entries rewritten by optimistic patches.
    pub patched: usize,
    /// Entries marked stale.
    pub invalidated: usize,
}

/// Runs mutations and applies their cache effects.
///
/// On success, optimistic patches are applied first, synchronously, so that
/// every view shows the patched data before any refetch triggered by the
/// invalidation resolves. On failure, the cache is left untouched and the
/// error is returned as is.
pub struct Mutator<V: QueryValue> {
    cache: QueryCache<V>,
    graph: Arc<InvalidationGraph>,
}

impl<V: QueryValue> Clone for Mutator<V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            graph: Arc::clone(&self.graph),
        }
    }
}

impl<V: QueryValue> Mutator<V> {
    pub fn new(cache: QueryCache<V>, graph: Arc<InvalidationGraph>) -> Self {
        Self { cache, graph }
    }

    pub fn cache(&self) -> &QueryCache<V> {
        &self.cache
    }

    pub fn graph(&self) -> &InvalidationGraph {
        &self.graph
    }

    /// Awaits `request` and, if it succeeds, applies the effects computed from its output.
    ///
    /// # Arguments
    ///
    /// * `request` - The mutation request
    /// * `effects` - Computes the cache effects from the successful response
    ///
    /// # Errors
    ///
    /// Returns the request's error unchanged; no effect is applied in that case.
    pub async fn run<T, Fut, E>(&self, request: Fut, effects: E) -> QueryResult<T>
    where
        Fut: Future<Output = QueryResult<T>>,
        E: FnOnce(&T) -> MutationEffects<V>,
    {
        match request.await {
            Ok(output) => {
                self.apply(&effects(&output));
                Ok(output)
            }
            Err(err) => {
                warn!(error = %err, "mutation failed; cache left untouched");
                Err(err)
            }
        }
    }

    /// Applies patches, then invalidates the caches the graph resolves for the intent.
    pub fn apply(&self, effects: &MutationEffects<V>) -> AppliedEffects {
        let patched = effects
            .patches
            .iter()
            .map(|patch| self.cache.apply_patch(patch))
            .sum();

        let options = InvalidateOptions {
            refetch_active: self.cache.config().refetch_active,
        };
        let filters = self.graph.resolve(effects.entity, &effects.intent);
        let invalidated = self
            .cache
            .invalidate(|key| filters.iter().any(|filter| filter.matches(key)), options);

        debug!(
            entity = ?effects.entity,
            patched,
            invalidated,
            "mutation effects applied"
        );
        AppliedEffects {
            patched,
            invalidated,
        }
    }
}
