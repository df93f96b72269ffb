//! # Finquery
//!
//! A reactive query cache for a personal-finance dashboard: paginated tables,
//! derived aggregates (indicators, reports, balances) and mutations that keep
//! both consistent without reloading the page.
//!
//! ## Features
//!
//! - **Structural keys**: requests are identified by `[resource, parts]`, where
//!   object member order never matters
//! - **Deduplication**: concurrent subscribers to one key share one request
//! - **No regressions**: a response is applied only if no newer request for
//!   the same key was started after it
//! - **Stale-while-error**: a failed refresh keeps the previous data visible
//! - **Table state**: pagination, single-column sorting, debounced search and
//!   filters, with page reset on search and filter changes
//! - **Invalidation graph**: one declarative table of which caches each
//!   mutation makes stale, gated by per-call intent flags
//! - **Optimistic patches**: deletes and edits rewrite every cached page in
//!   place before any refetch resolves
//! - **Statistics**: hits, misses, joins, discarded responses and evictions
//!   (`stats` feature)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use finquery::{QueryClient, QueryClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> finquery::QueryResult<()> {
//!     let client = QueryClient::finance(QueryClientConfig::default())?;
//!
//!     // A table over the transactions endpoint
//!     let table = client.table(client.resource_table(api.transactions()));
//!     table.controller().on_filter_change("action", Some("BUY".into()));
//!     table.controller().on_search_change("itub");
//!
//!     // Deleting patches every cached page, then refreshes the indicators
//!     client.transactions(api.transactions()).delete(42).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Stale time and the garbage collection window are configured per resource:
//!
//! ```rust
//! use finquery::{QueryClientConfig, QueryOptions, StaleTime};
//! use std::time::Duration;
//!
//! let config = QueryClientConfig::default()
//!     .with_resource(
//!         "currencies",
//!         QueryOptions::default().with_stale_time(StaleTime::Infinite),
//!     )
//!     .with_resource(
//!         "transactions",
//!         QueryOptions::default().with_gc_time(Duration::from_secs(60)),
//!     );
//!
//! assert_eq!(config.options_for("currencies").stale_time, StaleTime::Infinite);
//! ```
//!
//! ## Crates
//!
//! - `finquery-core`: keys, entries, configuration, the invalidation graph,
//!   patch transforms, the table state reducer and the finance policies
//! - `finquery-async`: the cache store, fetch coordination, the table
//!   controller, the mutation runner and the resource boundary

pub use finquery_async::*;
pub use finquery_core::*;
