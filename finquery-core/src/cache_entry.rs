use crate::{QueryError, QueryKey, StaleTime};
use tokio::time::Instant;

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// No response has been applied yet.
    Pending,
    /// The last applied response was successful.
    Success,
    /// The last applied response was an error.
    Error,
}

/// What a view bound to an entry should display.
///
/// ```text
/// Idle ──subscribe──▶ Loading ──ok──▶ Ready ──invalidate──▶ Refetching ──ok──▶ Ready
///                        │                                     │
///                        └────────────err────────────▶ Error ◀─┘
/// ```
///
/// `Error` keeps the last good data, so a table that fails to refresh keeps
/// showing its previous page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    Idle,
    Loading,
    Ready,
    Refetching,
    Error,
}

/// The state stored for one [`QueryKey`].
///
/// Entries are owned by the cache store; callers only ever receive clones.
///
/// # Fields
///
/// * `data` - Last successfully fetched (or patched) value
/// * `status` - Status of the last applied response
/// * `error` - Payload of the last failed fetch, cleared on success
/// * `subscriber_count` - Number of live subscriptions
/// * `last_fetched_at` - When `data` was last written
/// * `request_version` - Bumped on every fetch started for this key; only the
///   response carrying the current version is applied
/// * `is_invalidated` - Set by invalidation, cleared when fresh data lands
/// * `is_fetching` - A request is in flight
/// * `inactive_since` - When the last subscriber left
///
/// # Examples
///
/// ```
/// use finquery_core::{CacheEntry, QueryKey, QueryStatus, ViewState};
///
/// let mut entry: CacheEntry<u32> = CacheEntry::new(QueryKey::resource("incomes"));
/// assert_eq!(entry.status, QueryStatus::Pending);
/// assert_eq!(entry.view_state(), ViewState::Idle);
///
/// entry.apply_data(7);
/// assert!(entry.is_success());
/// assert_eq!(entry.data, Some(7));
/// ```
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: QueryKey,
    pub data: Option<V>,
    pub status: QueryStatus,
    pub error: Option<QueryError>,
    pub subscriber_count: usize,
    pub last_fetched_at: Option<Instant>,
    pub request_version: u64,
    pub is_invalidated: bool,
    pub is_fetching: bool,
    pub inactive_since: Option<Instant>,
}

impl<V> CacheEntry<V> {
    /// Creates an empty, pending entry for `key`.
    pub fn new(key: QueryKey) -> Self {
        Self {
            key,
            data: None,
            status: QueryStatus::Pending,
            error: None,
            subscriber_count: 0,
            last_fetched_at: None,
            request_version: 0,
            is_invalidated: false,
            is_fetching: false,
            inactive_since: Some(Instant::now()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count > 0
    }

    /// Returns `true` when the entry must be refetched before it can be served.
    ///
    /// Anything that is not a successful, non-invalidated response younger
    /// than `stale_time` is stale.
    pub fn is_stale(&self, stale_time: StaleTime) -> bool {
        if self.is_invalidated || !self.is_success() {
            return true;
        }
        match self.last_fetched_at {
            Some(at) => stale_time.is_expired(at.elapsed()),
            None => true,
        }
    }

    /// Returns `true` when nothing observes the entry, nothing is in flight and
    /// the grace window has elapsed.
    pub fn is_collectable(&self, gc_time: std::time::Duration) -> bool {
        if self.has_subscribers() || self.is_fetching {
            return false;
        }
        self.inactive_since
            .map(|since| since.elapsed() >= gc_time)
            .unwrap_or(false)
    }

    /// Stores a successful value.
    pub fn apply_data(&mut self, data: V) {
        self.data = Some(data);
        self.status = QueryStatus::Success;
        self.error = None;
        self.last_fetched_at = Some(Instant::now());
        self.is_invalidated = false;
    }

    /// Stores an error, keeping previously fetched data.
    pub fn apply_error(&mut self, error: QueryError) {
        self.status = QueryStatus::Error;
        self.error = Some(error);
    }

    /// Starts a new request, returning the version its response must carry.
    pub fn begin_fetch(&mut self) -> u64 {
        self.request_version = self.request_version.saturating_add(1);
        self.is_fetching = true;
        self.request_version
    }

    /// Supersedes the request in flight without starting a new one.
    ///
    /// Bumps the version so the pending response is discarded when it lands.
    /// Returns `false` when nothing was in flight.
    pub fn cancel_fetch(&mut self) -> bool {
        if !self.is_fetching {
            return false;
        }
        self.request_version = self.request_version.saturating_add(1);
        self.is_fetching = false;
        true
    }

    pub fn add_subscriber(&mut self) {
        self.subscriber_count = self.subscriber_count.saturating_add(1);
        self.inactive_since = None;
    }

    pub fn remove_subscriber(&mut self) {
        self.subscriber_count = self.subscriber_count.saturating_sub(1);
        if self.subscriber_count == 0 {
            self.inactive_since = Some(Instant::now());
        }
    }

    /// Derives the display state of a view bound to this entry.
    pub fn view_state(&self) -> ViewState {
        match (self.status, self.is_fetching) {
            (QueryStatus::Error, false) => ViewState::Error,
            (_, true) if self.data.is_some() => ViewState::Refetching,
            (_, true) => ViewState::Loading,
            (QueryStatus::Success, false) => ViewState::Ready,
            (QueryStatus::Pending, false) => ViewState::Idle,
        }
    }
}
