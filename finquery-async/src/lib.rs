//! # Finquery Async
//!
//! The runtime half of finquery: a reactive query cache for dashboards that
//! list, paginate and mutate remote data.
//!
//! - [`QueryCache`] stores one entry per structural [`QueryKey`](finquery_core::QueryKey),
//!   notifies subscribers synchronously and evicts unobserved entries after a
//!   grace window.
//! - The fetch coordinator ([`QueryCache::ensure_fresh`], [`QueryCache::refetch`])
//!   deduplicates requests in flight and drops responses of superseded requests.
//! - [`TableQuery`] binds a [`TableController`] (pagination, single-column
//!   sorting, debounced search, filters) to the cache.
//! - [`Mutator`] applies optimistic patches and then invalidates the caches an
//!   [`InvalidationGraph`](finquery_core::InvalidationGraph) resolves.
//!
//! Fetches and timers are spawned on the tokio runtime the cache was created on.
//!
//! ## Example
//!
//! ```rust,ignore
//! use finquery_async::{Query, QueryCache};
//! use finquery_core::{QueryClientConfig, QueryKey};
//!
//! #[tokio::main]
//! async fn main() -> finquery_core::QueryResult<()> {
//!     let cache = QueryCache::new(QueryClientConfig::default())?;
//!     let query = Query::new(QueryKey::resource("currencies"), || async {
//!         Ok(vec!["BRL".to_string(), "USD".to_string()])
//!     });
//!
//!     let subscription = cache.subscribe(&query, |entry| {
//!         println!("{:?}", entry.view_state());
//!     });
//!     // ...
//!     drop(subscription);
//!     Ok(())
//! }
//! ```

mod client;
mod debounce;
mod fetch;
mod mutation;
mod query_cache;
mod resource;
mod table;

pub use client::QueryClient;
pub use debounce::Debouncer;
pub use fetch::{FetchHandle, FetchOutcome};
pub use mutation::{AppliedEffects, Mutator};
pub use query_cache::{
    FetchFuture, Fetcher, InvalidateOptions, Query, QueryCache, Subscription,
};
pub use resource::{
    list_fetcher, table_config, Resource, RevenueService, SimpleResourceService,
    TransactionService,
};
pub use table::{ListFetcher, TableConfig, TableController, TableQuery, TableView};

/// Values that can be stored in a [`QueryCache`].
///
/// Data is cloned out of the cache for every reader and shared between
/// deduplicated waiters, so it must be cheap enough to clone and thread-safe.
pub trait QueryValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> QueryValue for T {}
