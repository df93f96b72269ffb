//! Wire types shared with the remote resource layer.

use serde::{Deserialize, Serialize};

/// One page of a list endpoint: `{ "results": [...], "count": n }`.
///
/// `count` is the total number of rows matching the request, not the number
/// of rows on this page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub results: Vec<T>,
    pub count: u64,
}

impl<T> Page<T> {
    pub fn new(results: Vec<T>, count: u64) -> Self {
        Self { results, count }
    }

    pub fn empty() -> Self {
        Self {
            results: Vec::new(),
            count: 0,
        }
    }
}

/// Query-string parameters understood by list endpoints.
///
/// # Examples
///
/// ```
/// use finquery_core::ListParams;
///
/// let params = ListParams {
///     page: 2,
///     page_size: 10,
///     ordering: Some("-date".into()),
///     search: Some("aapl".into()),
///     filters: vec![("action".into(), "BUY".into()), ("action".into(), "SELL".into())],
/// };
///
/// let pairs = params.to_query_pairs();
/// assert_eq!(pairs[0], ("page".to_string(), "2".to_string()));
/// assert_eq!(pairs.iter().filter(|(k, _)| k == "action").count(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
    /// 1-based page number.
    pub page: usize,
    pub page_size: usize,
    pub ordering: Option<String>,
    pub search: Option<String>,
    /// One pair per filter value; multi-valued filters repeat the field name.
    pub filters: Vec<(String, String)>,
}

impl ListParams {
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("page".to_string(), self.page.to_string()),
            ("page_size".to_string(), self.page_size.to_string()),
        ];
        if let Some(ordering) = &self.ordering {
            pairs.push(("ordering".to_string(), ordering.clone()));
        }
        if let Some(search) = &self.search {
            pairs.push(("search".to_string(), search.clone()));
        }
        pairs.extend(self.filters.iter().cloned());
        pairs
    }
}
