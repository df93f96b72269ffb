#[cfg(feature = "stats")]
use finquery_core::CacheStats;
use finquery_core::{
    CacheEntry, KeyFilter, OptimisticPatch, QueryClientConfig, QueryError, QueryKey, QueryOptions,
    QueryResult,
};
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, trace};

use crate::QueryValue;

/// Boxed future returned by fetchers.
pub type FetchFuture<V> = BoxFuture<'static, QueryResult<V>>;

/// A function that issues one network request for a key.
pub type Fetcher<V> = Arc<dyn Fn() -> FetchFuture<V> + Send + Sync>;

pub(crate) type Listener<V> = Arc<dyn Fn(&CacheEntry<V>) + Send + Sync>;

/// A key together with the function that fetches it.
///
/// # Examples
///
/// ```ignore
/// use finquery_async::Query;
/// use finquery_core::QueryKey;
///
/// let query = Query::new(QueryKey::resource("currencies"), || async {
///     api::currencies().await
/// });
/// ```
pub struct Query<V> {
    pub key: QueryKey,
    pub(crate) fetcher: Fetcher<V>,
    pub(crate) options: Option<QueryOptions>,
}

impl<V: QueryValue> Query<V> {
    pub fn new<F, Fut>(key: QueryKey, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueryResult<V>> + Send + 'static,
    {
        Self {
            key,
            fetcher: Arc::new(move || fetch().boxed()),
            options: None,
        }
    }

    pub fn from_fetcher(key: QueryKey, fetcher: Fetcher<V>) -> Self {
        Self {
            key,
            fetcher,
            options: None,
        }
    }

    /// Overrides the per-resource options from the client configuration.
    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = Some(options);
        self
    }
}

impl<V> Clone for Query<V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            fetcher: Arc::clone(&self.fetcher),
            options: self.options,
        }
    }
}

/// Options accepted by [`QueryCache::invalidate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidateOptions {
    /// Refetch matching entries that have subscribers right away.
    pub refetch_active: bool,
}

impl Default for InvalidateOptions {
    fn default() -> Self {
        Self {
            refetch_active: true,
        }
    }
}

pub(crate) struct Slot<V> {
    /// Distinguishes this slot from one recreated under the same key after eviction.
    pub(crate) epoch: u64,
    pub(crate) entry: CacheEntry<V>,
    pub(crate) fetcher: Option<Fetcher<V>>,
    pub(crate) options: QueryOptions,
    pub(crate) listeners: Vec<(u64, Listener<V>)>,
    pub(crate) in_flight: Option<Shared<FetchFuture<V>>>,
}

impl<V: QueryValue> Slot<V> {
    fn new(key: QueryKey, options: QueryOptions, epoch: u64) -> Self {
        Self {
            epoch,
            entry: CacheEntry::new(key),
            fetcher: None,
            options,
            listeners: Vec::new(),
            in_flight: None,
        }
    }

    /// Drops the request in flight so its response is discarded when it lands.
    pub(crate) fn supersede_in_flight(&mut self) -> bool {
        self.in_flight.take().is_some() && self.entry.cancel_fetch()
    }

    /// Time left before an unobserved slot may be evicted, or `None` while it
    /// has subscribers.
    pub(crate) fn remaining_grace(&self) -> Option<Duration> {
        if self.entry.has_subscribers() {
            return None;
        }
        let gc_time = self.options.gc_time;
        Some(
            self.entry
                .inactive_since
                .map(|since| gc_time.saturating_sub(since.elapsed()))
                .unwrap_or(gc_time),
        )
    }

    /// Snapshot handed to listeners once the shard lock is released.
    pub(crate) fn notification(&self) -> Notification<V> {
        Notification {
            entry: self.entry.clone(),
            listeners: self.listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
        }
    }
}

pub(crate) struct Notification<V> {
    entry: CacheEntry<V>,
    listeners: Vec<Listener<V>>,
}

impl<V> Notification<V> {
    pub(crate) fn deliver(self) {
        for listener in &self.listeners {
            listener(&self.entry);
        }
    }
}

pub(crate) struct CacheInner<V> {
    pub(crate) slots: DashMap<QueryKey, Slot<V>>,
    pub(crate) config: QueryClientConfig,
    pub(crate) runtime: Handle,
    next_id: AtomicU64,
    #[cfg(feature = "stats")]
    pub(crate) stats: CacheStats,
}

/// The cache store: one entry per [`QueryKey`], shared by every view.
///
/// All writes go through this type. Listeners registered with
/// [`subscribe`](Self::subscribe) are called synchronously after each change
/// to their key, outside of any internal lock.
///
/// Cloning is cheap and yields a handle to the same store.
///
/// # Thread Safety
///
/// Entries live in a `DashMap`, so the store can be shared across tasks.
/// Fetches and garbage collection timers are spawned on the tokio runtime
/// captured at construction.
pub struct QueryCache<V> {
    pub(crate) inner: Arc<CacheInner<V>>,
}

impl<V> Clone for QueryCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: QueryValue> QueryCache<V> {
    /// Creates a store bound to the current tokio runtime.
    ///
    /// # Errors
    ///
    /// [`QueryError::NoRuntime`] when called outside of a tokio runtime.
    pub fn new(config: QueryClientConfig) -> QueryResult<Self> {
        let runtime = Handle::try_current().map_err(|_| QueryError::NoRuntime)?;
        Ok(Self::with_runtime(config, runtime))
    }

    pub fn with_runtime(config: QueryClientConfig, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                slots: DashMap::new(),
                config,
                runtime,
                next_id: AtomicU64::new(1),
                #[cfg(feature = "stats")]
                stats: CacheStats::new(),
            }),
        }
    }

    pub fn config(&self) -> &QueryClientConfig {
        &self.inner.config
    }

    #[cfg(feature = "stats")]
    pub fn stats(&self) -> &CacheStats {
        &self.inner.stats
    }

    /// Registers interest in `query.key`.
    ///
    /// Creates the entry on first use and fetches it if it is missing or stale.
    /// `on_change` runs after every change of the entry until the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, query: &Query<V>, on_change: F) -> Subscription<V>
    where
        F: Fn(&CacheEntry<V>) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let listener: Listener<V> = Arc::new(on_change);
        {
            let mut slot = self.register(query);
            slot.entry.add_subscriber();
            slot.listeners.push((id, listener));
        }
        trace!(key = %query.key, "subscribed");
        self.ensure_fresh(&query.key);

        Subscription {
            cache: self.clone(),
            key: query.key.clone(),
            id,
            active: true,
        }
    }

    /// Creates the slot if needed and records the query's fetcher and options.
    pub(crate) fn register(
        &self,
        query: &Query<V>,
    ) -> dashmap::mapref::one::RefMut<'_, QueryKey, Slot<V>> {
        let options = query
            .options
            .unwrap_or_else(|| self.inner.config.options_for(query.key.resource_name()));
        let mut slot = self
            .inner
            .slots
            .entry(query.key.clone())
            .or_insert_with(|| Slot::new(query.key.clone(), options, self.next_id()));
        slot.fetcher = Some(Arc::clone(&query.fetcher));
        slot.options = options;
        slot
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn unsubscribe(&self, key: &QueryKey, id: u64) {
        let gc_time = {
            let Some(mut slot) = self.inner.slots.get_mut(key) else {
                return;
            };
            slot.listeners.retain(|(listener, _)| *listener != id);
            slot.entry.remove_subscriber();
            if slot.entry.has_subscribers() {
                return;
            }
            slot.options.gc_time
        };
        trace!(key = %key, "last subscriber left");
        self.schedule_gc(key.clone(), gc_time);
    }

    /// Returns a snapshot of the entry stored for `key`.
    pub fn get_entry(&self, key: &QueryKey) -> Option<CacheEntry<V>> {
        self.inner.slots.get(key).map(|slot| slot.entry.clone())
    }

    pub fn get_data(&self, key: &QueryKey) -> Option<V> {
        self.inner
            .slots
            .get(key)
            .and_then(|slot| slot.entry.data.clone())
    }

    /// Stores `data` as a successful response and notifies subscribers.
    ///
    /// Creates the entry if the key was never seen.
    pub fn set_data(&self, key: &QueryKey, data: V) {
        self.write(key, |entry| entry.apply_data(data));
    }

    /// Marks the entry as failed, keeping its previous data, and notifies subscribers.
    pub fn set_error(&self, key: &QueryKey, error: QueryError) {
        self.write(key, |entry| entry.apply_error(error));
    }

    fn write<F: FnOnce(&mut CacheEntry<V>)>(&self, key: &QueryKey, update: F) {
        let mut created = false;
        let (notification, gc_time) = {
            let mut slot = self.inner.slots.entry(key.clone()).or_insert_with(|| {
                created = true;
                let options = self.inner.config.options_for(key.resource_name());
                Slot::new(key.clone(), options, self.next_id())
            });
            update(&mut slot.entry);
            (slot.notification(), slot.options.gc_time)
        };
        notification.deliver();
        if created {
            self.schedule_gc(key.clone(), gc_time);
        }
    }

    /// Marks every entry whose key satisfies `predicate` as stale.
    ///
    /// With `refetch_active`, entries that currently have subscribers are
    /// refetched immediately; the others are refetched on their next
    /// subscription. A request already in flight for an entry that is not
    /// refetched is superseded, so a response issued before the invalidation
    /// cannot mark the entry fresh again.
    ///
    /// # Returns
    ///
    /// Number of entries invalidated.
    pub fn invalidate<P>(&self, predicate: P, options: InvalidateOptions) -> usize
    where
        P: Fn(&QueryKey) -> bool,
    {
        let keys = self.keys_matching(predicate);
        for key in &keys {
            let (refetch, superseded) = {
                let Some(mut slot) = self.inner.slots.get_mut(key) else {
                    continue;
                };
                slot.entry.is_invalidated = true;
                if options.refetch_active && slot.entry.has_subscribers() {
                    (true, None)
                } else if slot.supersede_in_flight() {
                    trace!(key = %key, "superseded request in flight");
                    (false, Some((slot.notification(), slot.remaining_grace())))
                } else {
                    (false, None)
                }
            };
            if refetch {
                self.refetch(key);
            }
            if let Some((notification, idle)) = superseded {
                self.settle(key, notification, idle);
            }
        }
        debug!(count = keys.len(), refetch_active = options.refetch_active, "invalidated");
        keys.len()
    }

    pub fn invalidate_matching(&self, filter: &KeyFilter, options: InvalidateOptions) -> usize {
        self.invalidate(|key| filter.matches(key), options)
    }

    /// Applies `transform` to the data of every entry matched by `filter`.
    ///
    /// Runs synchronously: subscribers see the patched value before this call
    /// returns. Entries without data are skipped. A request in flight for a
    /// patched entry is superseded and the entry is left invalidated, so the
    /// response cannot bring back what the patch removed.
    ///
    /// # Returns
    ///
    /// Number of entries the transform changed.
    pub fn patch_lists<F>(&self, filter: &KeyFilter, transform: F) -> usize
    where
        F: Fn(&mut V) -> bool,
    {
        let mut patched = 0;
        for key in self.keys_matching(|key| filter.matches(key)) {
            let (notification, idle) = {
                let Some(mut slot) = self.inner.slots.get_mut(&key) else {
                    continue;
                };
                if !slot.entry.data.as_mut().map(&transform).unwrap_or(false) {
                    continue;
                }
                let idle = if slot.supersede_in_flight() {
                    trace!(key = %key, "patch superseded request in flight");
                    slot.entry.is_invalidated = true;
                    slot.remaining_grace()
                } else {
                    None
                };
                (slot.notification(), idle)
            };
            patched += 1;
            self.settle(&key, notification, idle);
        }
        debug!(?filter, patched, "patched cached lists");
        patched
    }

    /// Notifies listeners and, for an unobserved entry that is no longer
    /// fetching, arms its eviction timer.
    pub(crate) fn settle(
        &self,
        key: &QueryKey,
        notification: Notification<V>,
        idle: Option<Duration>,
    ) {
        notification.deliver();
        if let Some(remaining) = idle {
            self.schedule_gc(key.clone(), remaining);
        }
    }

    pub fn apply_patch(&self, patch: &OptimisticPatch<V>) -> usize {
        self.patch_lists(&patch.filter, |value| patch.apply(value))
    }

    /// Evicts every entry that is unobserved, idle and past its grace window.
    ///
    /// # Returns
    ///
    /// Number of entries evicted.
    pub fn collect_garbage(&self) -> usize {
        self.keys_matching(|_| true)
            .iter()
            .filter(|key| self.collect_key(key))
            .count()
    }

    pub(crate) fn collect_key(&self, key: &QueryKey) -> bool {
        let removed = self
            .inner
            .slots
            .remove_if(key, |_, slot| slot.entry.is_collectable(slot.options.gc_time))
            .is_some();
        if removed {
            debug!(key = %key, "evicted unused entry");
            #[cfg(feature = "stats")]
            self.inner.stats.record_evicted();
        }
        removed
    }

    /// Arms a timer that evicts `key` once `delay` has elapsed, unless it was
    /// resubscribed or is fetching by then.
    pub(crate) fn schedule_gc(&self, key: QueryKey, delay: Duration) {
        let cache: Weak<CacheInner<V>> = Arc::downgrade(&self.inner);
        self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = cache.upgrade() {
                QueryCache { inner }.collect_key(&key);
            }
        });
    }

    pub(crate) fn keys_matching<P>(&self, predicate: P) -> Vec<QueryKey>
    where
        P: Fn(&QueryKey) -> bool,
    {
        self.inner
            .slots
            .iter()
            .filter(|slot| predicate(slot.key()))
            .map(|slot| slot.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.inner.slots.contains_key(key)
    }

    /// Drops every entry. Responses still in flight are discarded when they land.
    pub fn clear(&self) {
        self.inner.slots.clear();
    }
}

/// Live interest in one key.
///
/// Dropping the subscription (or calling [`unsubscribe`](Self::unsubscribe))
/// releases it. Requests already in flight are not cancelled.
pub struct Subscription<V: QueryValue> {
    cache: QueryCache<V>,
    key: QueryKey,
    id: u64,
    active: bool,
}

impl<V: QueryValue> Subscription<V> {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn entry(&self) -> Option<CacheEntry<V>> {
        self.cache.get_entry(&self.key)
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.active {
            self.active = false;
            self.cache.unsubscribe(&self.key, self.id);
        }
    }
}

impl<V: QueryValue> Drop for Subscription<V> {
    fn drop(&mut self) {
        self.release();
    }
}
