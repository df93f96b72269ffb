//! Per-resource fetch policy and client-wide configuration.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::time::Duration;

/// Default stale time: data is considered outdated as soon as it arrives.
pub const DEFAULT_STALE_TIME: Duration = Duration::ZERO;

/// Default grace window before an unobserved entry is evicted.
pub const DEFAULT_GC_TIME: Duration = Duration::from_secs(5 * 60);

/// Default quiet period for search-driven refetches.
pub const DEFAULT_SEARCH_DEBOUNCE: Duration = Duration::from_millis(600);

/// Default number of rows per table page.
pub const DEFAULT_PAGE_SIZE: usize = 10;

const INFINITE: &str = "infinite";

/// How long a successful entry may be served without a network call.
///
/// Serialized as a number of milliseconds, or the string `"infinite"`.
///
/// # Examples
///
/// ```
/// use finquery_core::StaleTime;
/// use std::time::Duration;
///
/// let always = StaleTime::default();
/// assert!(always.is_expired(Duration::ZERO));
///
/// let never = StaleTime::Infinite;
/// assert!(!never.is_expired(Duration::from_secs(86_400)));
///
/// let parsed: StaleTime = serde_json::from_str("\"infinite\"").unwrap();
/// assert_eq!(parsed, StaleTime::Infinite);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleTime {
    After(Duration),
    Infinite,
}

impl StaleTime {
    /// Returns `true` when data of the given age must be refetched.
    pub fn is_expired(&self, age: Duration) -> bool {
        match self {
            Self::After(limit) => age >= *limit,
            Self::Infinite => false,
        }
    }
}

impl Default for StaleTime {
    fn default() -> Self {
        Self::After(DEFAULT_STALE_TIME)
    }
}

impl Serialize for StaleTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::After(duration) => serializer.serialize_u64(duration.as_millis() as u64),
            Self::Infinite => serializer.serialize_str(INFINITE),
        }
    }
}

impl<'de> Deserialize<'de> for StaleTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Millis(u64),
            Word(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) => Ok(Self::After(Duration::from_millis(ms))),
            Raw::Word(word) if word == INFINITE => Ok(Self::Infinite),
            Raw::Word(word) => Err(D::Error::custom(format!(
                "expected milliseconds or \"{INFINITE}\", got {word:?}"
            ))),
        }
    }
}

impl From<Duration> for StaleTime {
    fn from(duration: Duration) -> Self {
        Self::After(duration)
    }
}

/// Fetch policy for one resource.
///
/// ```
/// use finquery_core::QueryOptions;
///
/// let opts: QueryOptions =
///     serde_json::from_str(r#"{"stale_time": "infinite", "gc_time": 60000}"#).unwrap();
/// assert_eq!(opts.gc_time.as_secs(), 60);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub stale_time: StaleTime,
    #[serde(default = "default_gc_time", with = "millis")]
    pub gc_time: Duration,
}

fn default_gc_time() -> Duration {
    DEFAULT_GC_TIME
}

impl QueryOptions {
    pub fn with_stale_time(mut self, stale_time: impl Into<StaleTime>) -> Self {
        self.stale_time = stale_time.into();
        self
    }

    pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = gc_time;
        self
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stale_time: StaleTime::default(),
            gc_time: DEFAULT_GC_TIME,
        }
    }
}

/// Client-wide configuration.
///
/// Options are resolved per resource: an explicit override registered with
/// [`with_resource`](Self::with_resource) wins, otherwise `defaults` apply.
///
/// # Examples
///
/// ```
/// use finquery_core::{QueryClientConfig, QueryOptions, StaleTime};
///
/// let config = QueryClientConfig::default()
///     .with_resource("currencies", QueryOptions::default().with_stale_time(StaleTime::Infinite));
///
/// assert_eq!(config.options_for("currencies").stale_time, StaleTime::Infinite);
/// assert_eq!(config.options_for("transactions"), QueryOptions::default());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryClientConfig {
    #[serde(default)]
    pub defaults: QueryOptions,
    #[serde(default)]
    pub resources: HashMap<String, QueryOptions>,
    /// Whether invalidation refetches entries that currently have subscribers.
    #[serde(default = "default_refetch_active")]
    pub refetch_active: bool,
}

fn default_refetch_active() -> bool {
    true
}

impl QueryClientConfig {
    pub fn with_defaults(mut self, defaults: QueryOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>, options: QueryOptions) -> Self {
        self.resources.insert(resource.into(), options);
        self
    }

    pub fn with_refetch_active(mut self, refetch_active: bool) -> Self {
        self.refetch_active = refetch_active;
        self
    }

    pub fn options_for(&self, resource: &str) -> QueryOptions {
        self.resources
            .get(resource)
            .copied()
            .unwrap_or(self.defaults)
    }
}

impl Default for QueryClientConfig {
    fn default() -> Self {
        Self {
            defaults: QueryOptions::default(),
            resources: HashMap::new(),
            refetch_active: true,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_stale_time_always_expired() {
        assert!(StaleTime::default().is_expired(Duration::ZERO));
        assert!(StaleTime::After(Duration::from_secs(30)).is_expired(Duration::from_secs(30)));
        assert!(!StaleTime::After(Duration::from_secs(30)).is_expired(Duration::from_secs(29)));
    }

    #[test]
    fn test_stale_time_serde() {
        let after: StaleTime = serde_json::from_str("1500").unwrap();
        assert_eq!(after, StaleTime::After(Duration::from_millis(1500)));
        assert_eq!(serde_json::to_string(&StaleTime::Infinite).unwrap(), "\"infinite\"");
        assert!(serde_json::from_str::<StaleTime>("\"forever\"").is_err());
    }

    #[test]
    fn test_config_from_json() {
        let config: QueryClientConfig = serde_json::from_str(
            r#"{"resources": {"currencies": {"stale_time": "infinite"}}, "refetch_active": false}"#,
        )
        .unwrap();
        assert!(!config.refetch_active);
        let currencies = config.options_for("currencies");
        assert_eq!(currencies.stale_time, StaleTime::Infinite);
        assert_eq!(currencies.gc_time, DEFAULT_GC_TIME);
    }
}
