use serde_json::Value;
use thiserror::Error;

/// Errors produced while fetching or mutating remote data.
///
/// Fetch errors never escape a subscription: they are stored on the
/// [`CacheEntry`](crate::CacheEntry) and exposed through
/// [`CacheEntry::is_error`](crate::CacheEntry::is_error). Mutation errors are
/// returned to the caller of the mutation unchanged.
///
/// The type is `Clone` because the same failure is shared between every
/// subscriber that joined a deduplicated request.
///
/// # Examples
///
/// ```
/// use finquery_core::QueryError;
/// use serde_json::json;
///
/// let err = QueryError::server(400, json!({"price": ["must be positive"]}));
/// assert!(err.is_server());
/// assert_eq!(err.status(), Some(400));
/// ```
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    /// The request failed before any response was received.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status and a structured body.
    #[error("server responded with status {status}")]
    Server { status: u16, body: Value },

    /// A response arrived for a request that had already been superseded.
    ///
    /// Never stored on an entry; only reported through logs and statistics.
    #[error("response for a superseded request was discarded")]
    StaleOverwriteDiscarded,

    /// Structural key parts could not be serialized.
    #[error("failed to serialize query key: {0}")]
    KeySerialization(String),

    /// A response body did not have the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// A cache operation needed to spawn work but no tokio runtime was available.
    #[error("no tokio runtime available to drive fetches")]
    NoRuntime,
}

impl QueryError {
    /// Convenience constructor for [`QueryError::Network`].
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Convenience constructor for [`QueryError::Server`].
    pub fn server(status: u16, body: Value) -> Self {
        Self::Server { status, body }
    }

    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    pub fn is_server(&self) -> bool {
        matches!(self, Self::Server { .. })
    }

    /// HTTP status of a server error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The structured payload the server returned, untouched.
    pub fn body(&self) -> Option<&Value> {
        match self {
            Self::Server { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// Result alias used across finquery.
pub type QueryResult<T> = Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_error_keeps_payload() {
        let body = json!({"detail": "Not found."});
        let err = QueryError::server(404, body.clone());
        assert_eq!(err.body(), Some(&body));
        assert_eq!(err.status(), Some(404));
        assert!(!err.is_network());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            QueryError::network("connection reset").to_string(),
            "network error: connection reset"
        );
        assert_eq!(
            QueryError::server(500, Value::Null).to_string(),
            "server responded with status 500"
        );
    }
}
