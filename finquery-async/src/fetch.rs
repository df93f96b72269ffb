//! Fetch coordination: deduplication, versioning and response application.
//!
//! At most one request per key is in flight. Callers that ask for a key while
//! its request is pending join that request instead of issuing a new one.
//! Every request carries the version it was started with; when it resolves,
//! the response is applied only if that version is still the entry's current
//! one. A refetch bumps the version, so an older response that lands late is
//! dropped instead of overwriting newer data.

use finquery_core::{QueryError, QueryKey, QueryResult};
use futures_util::future::{FutureExt, Shared};
use tracing::{trace, warn};

use crate::query_cache::{FetchFuture, Query, QueryCache, Slot};
use crate::QueryValue;

/// Handle on a request in flight. Cloning it does not issue a new request.
pub struct FetchHandle<V> {
    shared: Shared<FetchFuture<V>>,
}

impl<V> Clone for FetchHandle<V> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<V: QueryValue> FetchHandle<V> {
    /// Waits for the request and returns its raw outcome.
    ///
    /// The outcome is returned even if a newer request superseded this one and
    /// the cache discarded it.
    pub async fn wait(self) -> QueryResult<V> {
        self.shared.await
    }
}

/// What [`QueryCache::ensure_fresh`] did for a key.
pub enum FetchOutcome<V> {
    /// Cached data was fresh; nothing was requested.
    Fresh,
    /// A request was already in flight and the caller joined it.
    Joined(FetchHandle<V>),
    /// A new request was issued.
    Started(FetchHandle<V>),
    /// The key is unknown or has no fetcher registered.
    Unavailable,
}

impl<V> FetchOutcome<V> {
    pub fn handle(self) -> Option<FetchHandle<V>> {
        match self {
            Self::Joined(handle) | Self::Started(handle) => Some(handle),
            Self::Fresh | Self::Unavailable => None,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}

struct Started<V> {
    epoch: u64,
    version: u64,
    shared: Shared<FetchFuture<V>>,
}

impl<V: QueryValue> QueryCache<V> {
    /// Makes sure `key` is either fresh or being fetched.
    ///
    /// Joins the in-flight request if there is one, serves fresh data without
    /// a network call, and otherwise starts a new request.
    pub fn ensure_fresh(&self, key: &QueryKey) -> FetchOutcome<V> {
        let (started, notification) = {
            let Some(mut slot) = self.inner.slots.get_mut(key) else {
                return FetchOutcome::Unavailable;
            };
            if let Some(in_flight) = &slot.in_flight {
                trace!(key = %key, "joining request in flight");
                #[cfg(feature = "stats")]
                self.inner.stats.record_deduplicated();
                return FetchOutcome::Joined(FetchHandle {
                    shared: in_flight.clone(),
                });
            }
            if !slot.entry.is_stale(slot.options.stale_time) {
                #[cfg(feature = "stats")]
                self.inner.stats.record_hit();
                return FetchOutcome::Fresh;
            }
            match Self::begin(&mut slot) {
                Some(started) => (started, slot.notification()),
                None => return FetchOutcome::Unavailable,
            }
        };
        notification.deliver();
        FetchOutcome::Started(self.drive(key.clone(), started))
    }

    /// Starts a new request for `key`, superseding any request in flight.
    ///
    /// Returns `None` when the key is unknown or has no fetcher.
    pub fn refetch(&self, key: &QueryKey) -> Option<FetchHandle<V>> {
        let (started, notification) = {
            let mut slot = self.inner.slots.get_mut(key)?;
            let started = Self::begin(&mut slot)?;
            (started, slot.notification())
        };
        notification.deliver();
        Some(self.drive(key.clone(), started))
    }

    /// Fetches `query` without subscribing to it.
    ///
    /// Resolves with the cached data when it is fresh, otherwise with the
    /// outcome of the request that serves it.
    pub async fn fetch(&self, query: &Query<V>) -> QueryResult<V> {
        drop(self.register(query));
        match self.ensure_fresh(&query.key) {
            FetchOutcome::Joined(handle) | FetchOutcome::Started(handle) => handle.wait().await,
            FetchOutcome::Fresh | FetchOutcome::Unavailable => self
                .get_data(&query.key)
                .ok_or_else(|| QueryError::network(format!("no data for {}", query.key))),
        }
    }

    /// Bumps the version and records a lazy request on the slot.
    ///
    /// The fetcher is not invoked here; the request starts when the driver
    /// task first polls it, outside of the shard lock.
    fn begin(slot: &mut Slot<V>) -> Option<Started<V>> {
        let fetcher = slot.fetcher.clone()?;
        let version = slot.entry.begin_fetch();
        let shared = async move { fetcher().await }.boxed().shared();
        slot.in_flight = Some(shared.clone());
        Some(Started {
            epoch: slot.epoch,
            version,
            shared,
        })
    }

    fn drive(&self, key: QueryKey, started: Started<V>) -> FetchHandle<V> {
        trace!(key = %key, version = started.version, "request started");
        #[cfg(feature = "stats")]
        self.inner.stats.record_miss();

        let cache = self.clone();
        let driver = started.shared.clone();
        self.inner.runtime.spawn(async move {
            let result = driver.await;
            match cache.complete(&key, started.epoch, started.version, result) {
                // Superseded responses are reported through logs and stats only.
                Ok(()) | Err(QueryError::StaleOverwriteDiscarded) => {}
                Err(err) => warn!(key = %key, error = %err, "response not applied"),
            }
        });
        FetchHandle {
            shared: started.shared,
        }
    }

    /// Applies a response if it belongs to the entry's current request.
    ///
    /// # Errors
    ///
    /// [`QueryError::StaleOverwriteDiscarded`] when the entry was evicted or
    /// cleared, or a newer request was started after this one.
    pub(crate) fn complete(
        &self,
        key: &QueryKey,
        epoch: u64,
        version: u64,
        result: QueryResult<V>,
    ) -> QueryResult<()> {
        let (notification, idle) = {
            let current = self
                .inner
                .slots
                .get_mut(key)
                .filter(|slot| slot.epoch == epoch && slot.entry.request_version == version);
            let Some(mut slot) = current else {
                trace!(key = %key, version, "discarding superseded response");
                #[cfg(feature = "stats")]
                self.inner.stats.record_discarded();
                return Err(QueryError::StaleOverwriteDiscarded);
            };

            slot.in_flight = None;
            slot.entry.is_fetching = false;
            match result {
                Ok(data) => slot.entry.apply_data(data),
                Err(err) => {
                    warn!(key = %key, error = %err, "fetch failed");
                    slot.entry.apply_error(err);
                }
            }

            (slot.notification(), slot.remaining_grace())
        };

        self.settle(key, notification, idle);
        Ok(())
    }
}
