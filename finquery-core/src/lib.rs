//! # Finquery Core
//!
//! Core types and pure logic for the finquery query cache.
//!
//! This crate holds everything that does not need a runtime: query keys,
//! cache entries, the invalidation dependency graph, optimistic patch
//! transforms, the table state reducer and the finance mutation policies.
//!
//! ## Module Organization
//!
//! - [`QueryKey`], [`KeyFilter`] - Structural, order-independent cache keys and key filters
//! - [`CacheEntry`] - Per-key state: data, status, versions, subscribers
//! - [`QueryOptions`], [`QueryClientConfig`] - Stale time, GC window and per-resource options
//! - [`invalidation`] - Entity → dependent cache prefix graph and intents
//! - [`patch`] - Optimistic transforms over cached list payloads
//! - [`TableState`] - Pagination, sorting, search and filter snapshots
//! - [`domain`] - Which caches each finance mutation patches or invalidates
//! - [`Page`], [`ListParams`] - Wire types shared with the remote API
//!
mod cache_entry;
mod config;
mod error;
mod query_key;
mod resource;
mod table_state;

pub mod domain;
pub mod invalidation;
pub mod patch;

#[cfg(feature = "stats")]
mod stats;

pub use cache_entry::{CacheEntry, QueryStatus, ViewState};
pub use config::{
    QueryClientConfig, QueryOptions, StaleTime, DEFAULT_GC_TIME, DEFAULT_PAGE_SIZE,
    DEFAULT_SEARCH_DEBOUNCE, DEFAULT_STALE_TIME,
};
pub use domain::{Entity, MutationEffects};
pub use error::{QueryError, QueryResult};
pub use invalidation::{CacheGroup, InvalidationGraph, InvalidationIntent};
pub use patch::OptimisticPatch;
pub use query_key::{build_key, KeyFilter, QueryKey};
pub use resource::{ListParams, Page};
pub use table_state::{FilterValue, SortDescriptor, SortDirection, TableChange, TableState};

#[cfg(feature = "stats")]
pub use stats::CacheStats;
