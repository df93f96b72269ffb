//! # Table State Controller
//!
//! Owns one [`TableState`] and changes it only through its handlers. Each
//! change produces a new immutable snapshot; a [`TableQuery`] turns every
//! snapshot into a [`QueryKey`] and keeps exactly one subscription alive, to
//! the key of the latest snapshot.
//!
//! Search input is debounced: keystrokes update the visible input right away
//! but reach the table state only after the quiet window, so a burst of typing
//! produces a single key.

use finquery_core::{
    CacheEntry, FilterValue, ListParams, QueryError, QueryKey, QueryResult, SortDescriptor,
    TableChange, TableState, ViewState, DEFAULT_PAGE_SIZE, DEFAULT_SEARCH_DEBOUNCE,
};
use futures_util::future::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::debounce::Debouncer;
use crate::query_cache::{FetchFuture, Query, QueryCache, Subscription};
use crate::QueryValue;

/// Issues one list request for the given parameters.
pub type ListFetcher<V> = Arc<dyn Fn(ListParams) -> FetchFuture<V> + Send + Sync>;

type StateObserver = Arc<dyn Fn(&TableState) + Send + Sync>;
type EntryListener<V> = Arc<dyn Fn(&CacheEntry<V>) + Send + Sync>;

/// Static configuration of a table view.
///
/// # Fields
///
/// * `resource` - First segment of every key the table produces
/// * `query_fn` - List fetcher called with the parameters of the current state
/// * `default_page_size` - Initial page size
/// * `default_filters` - Initial filters
/// * `column_visibility` - Opaque per-column visibility, stored and returned as is
/// * `search_debounce` - Quiet window before search input reaches the state
pub struct TableConfig<V> {
    pub resource: String,
    pub query_fn: ListFetcher<V>,
    pub default_page_size: usize,
    pub default_filters: BTreeMap<String, FilterValue>,
    pub column_visibility: BTreeMap<String, bool>,
    pub search_debounce: Duration,
    on_change: Option<EntryListener<V>>,
}

impl<V: QueryValue> TableConfig<V> {
    pub fn new<F, Fut>(resource: impl Into<String>, query_fn: F) -> Self
    where
        F: Fn(ListParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueryResult<V>> + Send + 'static,
    {
        let fetcher = move |params: ListParams| query_fn(params).boxed();
        Self::from_fetcher(resource, Arc::new(fetcher))
    }

    pub fn from_fetcher(resource: impl Into<String>, query_fn: ListFetcher<V>) -> Self {
        Self {
            resource: resource.into(),
            query_fn,
            default_page_size: DEFAULT_PAGE_SIZE,
            default_filters: BTreeMap::new(),
            column_visibility: BTreeMap::new(),
            search_debounce: DEFAULT_SEARCH_DEBOUNCE,
            on_change: None,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.default_page_size = page_size;
        self
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.default_filters.insert(field.into(), value.into());
        self
    }

    pub fn with_column_visibility(mut self, columns: BTreeMap<String, bool>) -> Self {
        self.column_visibility = columns;
        self
    }

    pub fn with_search_debounce(mut self, delay: Duration) -> Self {
        self.search_debounce = delay;
        self
    }

    /// Called after every change of the entry the table is bound to.
    pub fn on_change<F>(mut self, listener: F) -> Self
    where
        F: Fn(&CacheEntry<V>) + Send + Sync + 'static,
    {
        self.on_change = Some(Arc::new(listener));
        self
    }
}

struct ControllerShared {
    state: watch::Sender<TableState>,
    search_input: Mutex<String>,
    column_visibility: Mutex<BTreeMap<String, bool>>,
    observer: Mutex<Option<StateObserver>>,
}

impl ControllerShared {
    fn dispatch(&self, change: TableChange) -> bool {
        debug!(?change, "table change");
        let changed = self.state.send_if_modified(|state| {
            let next = state.apply(change);
            if next == *state {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            let snapshot = self.state.borrow().clone();
            let observer = self.observer.lock().clone();
            if let Some(observer) = observer {
                observer(&snapshot);
            }
        }
        changed
    }
}

/// Owns the state of one table view.
///
/// Handlers are synchronous and return whether the state changed. The search
/// handler is the exception: it schedules the change and returns immediately.
///
/// # Examples
///
/// ```ignore
/// let table = TableController::new(10, BTreeMap::new(), Duration::from_millis(600), handle);
/// table.on_filter_change("action", Some("BUY".into()));
/// assert_eq!(table.snapshot().page_index, 0);
/// ```
pub struct TableController {
    shared: Arc<ControllerShared>,
    search: Debouncer<String>,
}

impl TableController {
    pub fn new(
        page_size: usize,
        filters: BTreeMap<String, FilterValue>,
        search_debounce: Duration,
        runtime: Handle,
    ) -> Self {
        let (state, _) = watch::channel(TableState::new(page_size, filters));
        let shared = Arc::new(ControllerShared {
            state,
            search_input: Mutex::new(String::new()),
            column_visibility: Mutex::new(BTreeMap::new()),
            observer: Mutex::new(None),
        });
        let weak: Weak<ControllerShared> = Arc::downgrade(&shared);
        let search = Debouncer::new(search_debounce, runtime, move |text: String| {
            if let Some(shared) = weak.upgrade() {
                shared.dispatch(TableChange::Search(text));
            }
        });
        Self { shared, search }
    }

    /// Builds a controller from the defaults of a table configuration.
    pub fn from_config<V: QueryValue>(config: &TableConfig<V>, runtime: Handle) -> Self {
        let controller = Self::new(
            config.default_page_size,
            config.default_filters.clone(),
            config.search_debounce,
            runtime,
        );
        *controller.shared.column_visibility.lock() = config.column_visibility.clone();
        controller
    }

    pub fn on_page_change(&self, page_index: usize) -> bool {
        self.shared.dispatch(TableChange::Page(page_index))
    }

    /// Changing the page size returns to the first page.
    pub fn on_page_size_change(&self, page_size: usize) -> bool {
        self.shared.dispatch(TableChange::PageSize(page_size))
    }

    /// Only the first descriptor is kept; sorting is single-column.
    pub fn on_sort_change(&self, sorting: Vec<SortDescriptor>) -> bool {
        self.shared.dispatch(TableChange::Sort(sorting))
    }

    /// Sorts ascending by `field`, or flips the direction if it is already the sort field.
    pub fn on_sort_toggle(&self, field: &str) -> bool {
        let next = match self.shared.state.borrow().sorting.first() {
            Some(current) if current.field == field => SortDescriptor {
                field: current.field.clone(),
                direction: current.direction.toggled(),
            },
            _ => SortDescriptor::asc(field),
        };
        self.on_sort_change(vec![next])
    }

    /// Records the raw input and schedules it to reach the state after the quiet window.
    pub fn on_search_change(&self, text: impl Into<String>) {
        let text = text.into();
        *self.shared.search_input.lock() = text.clone();
        self.search.call(text);
    }

    /// Sets or, with `None`, clears the filter on `field`. Returns to the first page.
    pub fn on_filter_change(&self, field: impl Into<String>, value: Option<FilterValue>) -> bool {
        self.shared.dispatch(TableChange::Filter(field.into(), value))
    }

    pub fn on_expanded_change(&self, expanded: BTreeMap<String, bool>) -> bool {
        self.shared.dispatch(TableChange::Expanded(expanded))
    }

    pub fn on_column_visibility_change(&self, columns: BTreeMap<String, bool>) {
        *self.shared.column_visibility.lock() = columns;
    }

    pub fn column_visibility(&self) -> BTreeMap<String, bool> {
        self.shared.column_visibility.lock().clone()
    }

    /// The search text as typed, before debouncing.
    pub fn search_input(&self) -> String {
        self.shared.search_input.lock().clone()
    }

    pub fn is_search_pending(&self) -> bool {
        self.search.is_pending()
    }

    pub fn snapshot(&self) -> TableState {
        self.shared.state.borrow().clone()
    }

    /// Receives a new snapshot after every change.
    pub fn watch(&self) -> watch::Receiver<TableState> {
        self.shared.state.subscribe()
    }

    pub fn query_key(&self, resource: &str) -> QueryResult<QueryKey> {
        self.shared.state.borrow().query_key(resource)
    }

    pub fn list_params(&self) -> ListParams {
        self.shared.state.borrow().list_params()
    }

    fn observe(&self, observer: StateObserver) {
        *self.shared.observer.lock() = Some(observer);
    }
}

/// What a table view renders.
#[derive(Debug, Clone)]
pub struct TableView<V> {
    pub state: ViewState,
    pub key: Option<QueryKey>,
    pub data: Option<V>,
    pub error: Option<QueryError>,
    pub table: TableState,
}

struct Binding<V: QueryValue> {
    cache: QueryCache<V>,
    resource: String,
    query_fn: ListFetcher<V>,
    listener: Option<EntryListener<V>>,
    rebinding: Mutex<()>,
    key: RwLock<Option<QueryKey>>,
    subscription: Mutex<Option<Subscription<V>>>,
}

impl<V: QueryValue> Binding<V> {
    /// Subscribes to the key of `state` and then releases the previous key.
    ///
    /// Subscribing first keeps an entry shared with the previous key alive.
    fn bind(&self, state: &TableState) {
        let _rebinding = self.rebinding.lock();
        let key = match state.query_key(&self.resource) {
            Ok(key) => key,
            Err(err) => {
                warn!(resource = %self.resource, error = %err, "cannot build table key");
                return;
            }
        };
        if self.key.read().as_ref() == Some(&key) {
            return;
        }
        *self.key.write() = Some(key.clone());

        let params = state.list_params();
        let fetch = Arc::clone(&self.query_fn);
        let query = Query::from_fetcher(key, Arc::new(move || fetch(params.clone())));
        let listener = self.listener.clone();
        let subscription = self.cache.subscribe(&query, move |entry| {
            if let Some(listener) = &listener {
                listener(entry);
            }
        });
        let previous = self.subscription.lock().replace(subscription);
        drop(previous);
    }
}

/// A table view bound to the cache.
///
/// Every state change that alters the key moves the subscription to the new
/// key. Keys already cached and fresh are served without a request, so paging
/// back is instant.
///
/// Listeners passed through [`TableConfig::on_change`] must not call the
/// controller's handlers synchronously.
pub struct TableQuery<V: QueryValue> {
    controller: TableController,
    binding: Arc<Binding<V>>,
}

impl<V: QueryValue> TableQuery<V> {
    pub fn new(cache: QueryCache<V>, config: TableConfig<V>) -> Self {
        let controller = TableController::from_config(&config, cache.inner.runtime.clone());
        let binding = Arc::new(Binding {
            cache,
            resource: config.resource,
            query_fn: config.query_fn,
            listener: config.on_change,
            rebinding: Mutex::new(()),
            key: RwLock::new(None),
            subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&binding);
        controller.observe(Arc::new(move |state: &TableState| {
            if let Some(binding) = weak.upgrade() {
                binding.bind(state);
            }
        }));
        binding.bind(&controller.snapshot());

        Self {
            controller,
            binding,
        }
    }

    pub fn controller(&self) -> &TableController {
        &self.controller
    }

    /// The key the table is currently subscribed to.
    pub fn key(&self) -> Option<QueryKey> {
        self.binding.key.read().clone()
    }

    pub fn view(&self) -> TableView<V> {
        let key = self.key();
        let entry = key.as_ref().and_then(|key| self.binding.cache.get_entry(key));
        let (state, data, error) = match entry {
            Some(entry) => (entry.view_state(), entry.data, entry.error),
            None => (ViewState::Idle, None, None),
        };
        TableView {
            state,
            key,
            data,
            error,
            table: self.controller.snapshot(),
        }
    }

    /// Refetches the current page, superseding a request in flight.
    pub fn refetch(&self) -> bool {
        self.key()
            .and_then(|key| self.binding.cache.refetch(&key))
            .is_some()
    }
}

impl<V: QueryValue> Drop for TableQuery<V> {
    fn drop(&mut self) {
        self.controller.shared.observer.lock().take();
    }
}
