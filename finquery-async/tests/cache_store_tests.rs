//! Integration tests for the cache store: writes, invalidation, patching and garbage collection

use finquery_async::{InvalidateOptions, Query, QueryCache};
use finquery_core::patch::remove_row;
use finquery_core::{
    KeyFilter, OptimisticPatch, QueryClientConfig, QueryError, QueryKey, QueryOptions, StaleTime,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn page_key(resource: &str, page_index: usize) -> QueryKey {
    QueryKey::new(resource, &json!({"page_index": page_index, "page_size": 10})).unwrap()
}

fn counting_query(key: QueryKey, calls: Arc<AtomicUsize>, delay: u64) -> Query<Value> {
    Query::new(key, move || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            sleep(ms(delay)).await;
            Ok(json!({"results": [{"id": 1}, {"id": 2}], "count": 2, "call": n}))
        }
    })
}

fn short_gc(gc: Duration) -> QueryClientConfig {
    QueryClientConfig::default().with_defaults(QueryOptions::default().with_gc_time(gc))
}

#[tokio::test]
async fn test_set_data_creates_entry_and_notifies() {
    let cache: QueryCache<Value> = QueryCache::new(QueryClientConfig::default()).unwrap();
    let key = page_key("transactions", 0);
    let notified = Arc::new(AtomicUsize::new(0));

    // Subscribing with a fetcher that never resolves keeps the test in control
    let query = Query::new(key.clone(), || std::future::pending());
    let counter = Arc::clone(&notified);
    let _sub = cache.subscribe(&query, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let before = notified.load(Ordering::SeqCst);

    cache.set_data(&key, json!({"results": [], "count": 0}));
    assert_eq!(notified.load(Ordering::SeqCst), before + 1);
    assert_eq!(cache.get_data(&key), Some(json!({"results": [], "count": 0})));

    // Writing an unseen key creates its entry
    let other = page_key("revenues", 0);
    cache.set_data(&other, json!(1));
    assert!(cache.contains(&other));
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn test_set_error_keeps_data() {
    let cache = QueryCache::new(QueryClientConfig::default()).unwrap();
    let key = page_key("transactions", 0);

    cache.set_data(&key, json!({"count": 3}));
    cache.set_error(&key, QueryError::server(500, json!({"detail": "boom"})));

    let entry = cache.get_entry(&key).unwrap();
    assert!(entry.is_error());
    assert_eq!(entry.data, Some(json!({"count": 3})));
    assert_eq!(entry.error.and_then(|e| e.status()), Some(500));
}

#[tokio::test(start_paused = true)]
async fn test_entry_evicted_after_grace_window() {
    let cache = QueryCache::new(short_gc(ms(1000))).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = page_key("transactions", 0);
    let query = counting_query(key.clone(), Arc::clone(&calls), 10);

    let sub = cache.subscribe(&query, |_| {});
    sleep(ms(50)).await;
    drop(sub);

    sleep(ms(500)).await;
    assert!(cache.contains(&key));

    sleep(ms(600)).await;
    assert!(!cache.contains(&key));
    assert!(cache.is_empty());

    #[cfg(feature = "stats")]
    assert_eq!(cache.stats().evicted(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_within_grace_window_keeps_entry() {
    let cache = QueryCache::new(short_gc(ms(1000))).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = page_key("transactions", 0);
    let query = counting_query(key.clone(), Arc::clone(&calls), 10);

    let first = cache.subscribe(&query, |_| {});
    sleep(ms(50)).await;
    drop(first);

    sleep(ms(800)).await;
    let _second = cache.subscribe(&query, |_| {});

    // The first timer fires while the key is observed again
    sleep(ms(2000)).await;
    assert!(cache.contains(&key));
}

#[tokio::test(start_paused = true)]
async fn test_entry_not_evicted_mid_flight() {
    let cache = QueryCache::new(short_gc(ms(100))).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = page_key("transactions", 0);
    let query = counting_query(key.clone(), Arc::clone(&calls), 500);

    let sub = cache.subscribe(&query, |_| {});
    sleep(ms(10)).await;
    drop(sub);

    // Grace window has elapsed but the request is still in flight
    sleep(ms(200)).await;
    assert!(cache.contains(&key));
    assert!(cache.get_entry(&key).unwrap().is_fetching);

    // Once the response lands the zero-subscriber rule applies
    sleep(ms(400)).await;
    assert!(!cache.contains(&key));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_collect_garbage_spares_observed_entries() {
    let cache: QueryCache<Value> = QueryCache::new(short_gc(Duration::ZERO)).unwrap();
    let observed = page_key("transactions", 0);
    let idle = page_key("transactions", 1);

    let query = Query::new(observed.clone(), || std::future::pending());
    let _sub = cache.subscribe(&query, |_| {});
    cache.set_data(&idle, json!({}));

    assert_eq!(cache.collect_garbage(), 1);
    assert!(cache.contains(&observed));
    assert!(!cache.contains(&idle));
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_refetches_active_and_marks_inactive() {
    let cache = QueryCache::new(QueryClientConfig::default()).unwrap();
    let active_calls = Arc::new(AtomicUsize::new(0));
    let inactive_calls = Arc::new(AtomicUsize::new(0));
    let active = counting_query(
        QueryKey::resource("transactions-indicators"),
        Arc::clone(&active_calls),
        10,
    );
    let inactive = counting_query(
        QueryKey::new("transactions-indicators", &json!({"asset_id": 3})).unwrap(),
        Arc::clone(&inactive_calls),
        10,
    );

    let _sub = cache.subscribe(&active, |_| {});
    cache.fetch(&inactive).await.unwrap();
    sleep(ms(20)).await;

    let invalidated = cache.invalidate_matching(
        &KeyFilter::resource("transactions-indicators"),
        InvalidateOptions::default(),
    );
    assert_eq!(invalidated, 2);
    sleep(ms(20)).await;

    // Active entry refetched in the background
    assert_eq!(active_calls.load(Ordering::SeqCst), 2);
    assert!(!cache.get_entry(&active.key).unwrap().is_invalidated);

    // Inactive entry only marked stale until someone subscribes
    assert_eq!(inactive_calls.load(Ordering::SeqCst), 1);
    assert!(cache.get_entry(&inactive.key).unwrap().is_invalidated);

    let _late = cache.subscribe(&inactive, |_| {});
    sleep(ms(20)).await;
    assert_eq!(inactive_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_without_refetch_only_marks() {
    let cache = QueryCache::new(QueryClientConfig::default()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let query = counting_query(page_key("reports-historic", 0), Arc::clone(&calls), 10);
    let _sub = cache.subscribe(&query, |_| {});
    sleep(ms(20)).await;

    let invalidated = cache.invalidate(
        |key| key.has_prefix("reports-historic"),
        InvalidateOptions {
            refetch_active: false,
        },
    );
    sleep(ms(20)).await;

    assert_eq!(invalidated, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(cache.get_entry(&query.key).unwrap().is_invalidated);
}

#[tokio::test(start_paused = true)]
async fn test_invalidation_during_unobserved_fetch_is_not_lost() {
    let config = QueryClientConfig::default().with_resource(
        "reports-historic",
        QueryOptions::default().with_stale_time(StaleTime::Infinite),
    );
    let cache = QueryCache::new(config).unwrap();
    let key = QueryKey::resource("reports-historic");
    let calls = Arc::new(AtomicUsize::new(0));
    let query = counting_query(key.clone(), Arc::clone(&calls), 100);

    // A prefetch issued before the mutation is still in flight when it invalidates
    let invalidate = async {
        sleep(ms(10)).await;
        cache.invalidate_matching(
            &KeyFilter::resource("reports-historic"),
            InvalidateOptions::default(),
        )
    };
    let (prefetched, invalidated) = tokio::join!(cache.fetch(&query), invalidate);
    assert_eq!(invalidated, 1);
    assert_eq!(prefetched.unwrap()["call"], json!(0));
    sleep(ms(5)).await;

    // Its caller got the response, the cache did not
    let entry = cache.get_entry(&key).unwrap();
    assert!(entry.is_invalidated);
    assert!(!entry.is_fetching);
    assert_eq!(entry.data, None);
    #[cfg(feature = "stats")]
    assert_eq!(cache.stats().discarded(), 1);

    let _sub = cache.subscribe(&query, |_| {});
    sleep(ms(150)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.get_data(&key).unwrap()["call"], json!(1));
    assert!(!cache.get_entry(&key).unwrap().is_invalidated);
}

#[tokio::test]
async fn test_patch_notifies_only_changed_entries() {
    let cache: QueryCache<Value> = QueryCache::new(QueryClientConfig::default()).unwrap();
    let with_row = page_key("transactions", 0);
    let without_row = page_key("transactions", 1);
    let other_resource = page_key("revenues", 0);

    let notified = Arc::new(AtomicUsize::new(0));
    let mut subscriptions = Vec::new();
    for key in [&with_row, &without_row] {
        let counter = Arc::clone(&notified);
        let query = Query::new(key.clone(), || std::future::pending());
        subscriptions.push(cache.subscribe(&query, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
    }
    cache.set_data(&with_row, json!({"results": [{"id": 7}, {"id": 8}], "count": 15}));
    cache.set_data(&without_row, json!({"results": [{"id": 9}], "count": 15}));
    cache.set_data(&other_resource, json!({"results": [{"id": 7}], "count": 1}));
    notified.store(0, Ordering::SeqCst);

    let patch = OptimisticPatch::new(KeyFilter::resource("transactions"), remove_row(json!(7)));
    let patched = cache.apply_patch(&patch);

    // count is a server-side total, so every page of the resource changes
    assert_eq!(patched, 2);
    assert_eq!(notified.load(Ordering::SeqCst), 2);
    assert_eq!(
        cache.get_data(&with_row),
        Some(json!({"results": [{"id": 8}], "count": 14}))
    );
    assert_eq!(
        cache.get_data(&without_row),
        Some(json!({"results": [{"id": 9}], "count": 14}))
    );
    assert_eq!(
        cache.get_data(&other_resource),
        Some(json!({"results": [{"id": 7}], "count": 1}))
    );
}

#[tokio::test]
async fn test_clear_discards_late_responses() {
    let cache = QueryCache::new(QueryClientConfig::default()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let query = counting_query(page_key("transactions", 0), Arc::clone(&calls), 0);

    let handle = cache.ensure_fresh(&query.key).handle();
    assert!(handle.is_none());

    let _sub = cache.subscribe(&query, |_| {});
    cache.clear();
    assert!(cache.is_empty());

    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    assert!(cache.get_entry(&query.key).is_none());
}
