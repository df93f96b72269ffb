//! Integration tests for the table state controller bound to the cache

use finquery_async::{QueryCache, TableConfig, TableController, TableQuery};
use finquery_core::{
    FilterValue, ListParams, QueryClientConfig, QueryOptions, SortDescriptor, SortDirection,
    StaleTime, TableChange, ViewState,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::sleep;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// A list endpoint that records every request and answers after 20ms.
fn recording_table(requests: Arc<Mutex<Vec<ListParams>>>) -> TableConfig<Value> {
    TableConfig::new("transactions", move |params: ListParams| {
        requests.lock().unwrap().push(params.clone());
        async move {
            sleep(ms(20)).await;
            Ok(json!({
                "results": [{"id": params.page, "search": params.search}],
                "count": 42
            }))
        }
    })
}

fn searches(requests: &Mutex<Vec<ListParams>>) -> Vec<Option<String>> {
    requests
        .lock()
        .unwrap()
        .iter()
        .map(|params| params.search.clone())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_debounced_search_issues_one_request_with_last_value() {
    let cache = QueryCache::new(QueryClientConfig::default()).unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let table = TableQuery::new(cache, recording_table(Arc::clone(&requests)));
    sleep(ms(50)).await;

    let controller = table.controller();
    for text in ["a", "aa", "aap", "aapl"] {
        controller.on_search_change(text);
        // Visible input follows keystrokes immediately
        assert_eq!(controller.search_input(), text);
        sleep(ms(200)).await;
    }
    assert_eq!(controller.snapshot().search_text, "");
    assert!(controller.is_search_pending());

    sleep(ms(500)).await;
    assert_eq!(controller.snapshot().search_text, "aapl");
    assert_eq!(searches(&requests), vec![None, Some("aapl".to_string())]);

    let view = table.view();
    assert_eq!(view.state, ViewState::Ready);
    assert_eq!(view.data.unwrap()["results"][0]["search"], json!("aapl"));
}

#[tokio::test(start_paused = true)]
async fn test_search_debounce_is_configurable() {
    let cache = QueryCache::new(QueryClientConfig::default()).unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let config = recording_table(Arc::clone(&requests)).with_search_debounce(ms(100));
    let table = TableQuery::new(cache, config);

    table.controller().on_search_change("petr");
    sleep(ms(150)).await;
    assert_eq!(table.controller().snapshot().search_text, "petr");
}

#[tokio::test(start_paused = true)]
async fn test_filter_and_search_reset_page() {
    let cache = QueryCache::new(QueryClientConfig::default()).unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let table = TableQuery::new(cache, recording_table(Arc::clone(&requests)));
    let controller = table.controller();

    assert!(controller.on_page_change(3));
    assert_eq!(controller.list_params().page, 4);

    assert!(controller.on_filter_change("action", Some(FilterValue::from("BUY"))));
    assert_eq!(controller.snapshot().page_index, 0);

    controller.on_page_change(2);
    controller.on_search_change("itub");
    sleep(ms(700)).await;
    assert_eq!(controller.snapshot().page_index, 0);

    // The bound key follows the latest snapshot
    let key = table.key().unwrap();
    assert_eq!(key.part("page_index"), Some(&json!(0)));
    assert_eq!(key.part("search"), Some(&json!("itub")));
    assert_eq!(key.part("filters"), Some(&json!({"action": "BUY"})));
}

#[tokio::test(start_paused = true)]
async fn test_paging_back_is_served_from_cache() {
    let config = QueryClientConfig::default().with_resource(
        "transactions",
        QueryOptions::default().with_stale_time(StaleTime::Infinite),
    );
    let cache = QueryCache::new(config).unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let table = TableQuery::new(cache.clone(), recording_table(Arc::clone(&requests)));
    sleep(ms(50)).await;

    table.controller().on_page_change(1);
    sleep(ms(50)).await;
    table.controller().on_page_change(0);

    // Page 0 is fresh: ready immediately, no new request
    assert_eq!(table.view().state, ViewState::Ready);
    sleep(ms(50)).await;
    assert_eq!(requests.lock().unwrap().len(), 2);

    // Only the current key is observed
    let page_one = table.controller().snapshot().apply(TableChange::Page(1));
    let page_one_key = page_one.query_key("transactions").unwrap();
    assert_eq!(cache.get_entry(&page_one_key).unwrap().subscriber_count, 0);
    assert_eq!(cache.get_entry(&table.key().unwrap()).unwrap().subscriber_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_view_goes_from_loading_to_ready() {
    let cache = QueryCache::new(QueryClientConfig::default()).unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let states = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&states);
    let config = recording_table(Arc::clone(&requests))
        .on_change(move |entry| recorded.lock().unwrap().push(entry.view_state()));
    let table = TableQuery::new(cache, config);

    assert_eq!(table.view().state, ViewState::Loading);
    sleep(ms(50)).await;
    assert_eq!(table.view().state, ViewState::Ready);
    assert!(table.view().error.is_none());

    assert!(table.refetch());
    assert_eq!(table.view().state, ViewState::Refetching);
    sleep(ms(50)).await;

    assert_eq!(
        *states.lock().unwrap(),
        vec![
            ViewState::Loading,
            ViewState::Ready,
            ViewState::Refetching,
            ViewState::Ready
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_sort_is_single_column_and_toggles() {
    let cache = QueryCache::new(QueryClientConfig::default()).unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let table = TableQuery::new(cache, recording_table(Arc::clone(&requests)));
    let controller = table.controller();

    controller.on_sort_change(vec![SortDescriptor::desc("price"), SortDescriptor::asc("id")]);
    assert_eq!(controller.snapshot().sorting.len(), 1);
    assert_eq!(controller.list_params().ordering.as_deref(), Some("-price"));

    controller.on_sort_toggle("price");
    assert_eq!(controller.snapshot().sorting[0].direction, SortDirection::Asc);
    assert_eq!(controller.list_params().ordering.as_deref(), Some("price"));

    controller.on_sort_toggle("quantity");
    assert_eq!(controller.list_params().ordering.as_deref(), Some("quantity"));
}

#[tokio::test(start_paused = true)]
async fn test_expanded_rows_do_not_change_key() {
    let cache = QueryCache::new(QueryClientConfig::default()).unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let table = TableQuery::new(cache, recording_table(Arc::clone(&requests)));
    let key = table.key();

    let mut expanded = BTreeMap::new();
    expanded.insert("3".to_string(), true);
    assert!(table.controller().on_expanded_change(expanded.clone()));

    assert_eq!(table.key(), key);
    assert_eq!(table.view().table.expanded, expanded);
    sleep(ms(50)).await;
    assert_eq!(requests.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_controller_defaults_and_watch() {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let mut columns = BTreeMap::new();
    columns.insert("dollar_real".to_string(), false);
    let config = recording_table(requests)
        .with_page_size(25)
        .with_filter("action", vec!["BUY", "SELL"])
        .with_column_visibility(columns.clone());

    let controller = TableController::from_config(&config, Handle::current());
    assert_eq!(controller.snapshot().page_size, 25);
    assert_eq!(controller.column_visibility(), columns);
    assert_eq!(
        controller.list_params().filters,
        vec![
            ("action".to_string(), "BUY".to_string()),
            ("action".to_string(), "SELL".to_string())
        ]
    );

    let mut updates = controller.watch();
    controller.on_page_size_change(50);
    assert!(updates.has_changed().unwrap());
    assert_eq!(updates.borrow_and_update().page_size, 50);

    // Unchanged state is not republished
    assert!(!controller.on_page_size_change(50));
    assert!(!updates.has_changed().unwrap());
}
