//! # Table State
//!
//! Immutable snapshots of a table's pagination, sorting, search and filters,
//! plus the reducer that moves from one snapshot to the next.
//!
//! Every change that alters the result set (search text or filters) resets
//! the page index to 0.

use crate::{ListParams, QueryKey, QueryResult, DEFAULT_PAGE_SIZE};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

/// Direction of a sort descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// Prefix understood by the `ordering` request parameter.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Asc => "",
            Self::Desc => "-",
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDescriptor {
    pub field: String,
    pub direction: SortDirection,
}

impl SortDescriptor {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    /// The `ordering` token, e.g. `-date` for a descending sort on `date`.
    pub fn ordering(&self) -> String {
        format!("{}{}", self.direction.prefix(), self.field)
    }
}

/// Value of one filter: a single value or a set of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Single(String),
    Many(Vec<String>),
}

impl FilterValue {
    pub fn values(&self) -> Vec<String> {
        match self {
            Self::Single(value) => vec![value.clone()],
            Self::Many(values) => values.clone(),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Single(value) => value.is_empty(),
            Self::Many(values) => values.is_empty(),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<Vec<&str>> for FilterValue {
    fn from(values: Vec<&str>) -> Self {
        Self::Many(values.into_iter().map(str::to_string).collect())
    }
}

/// A single change requested through a table handler.
#[derive(Debug, Clone, PartialEq)]
pub enum TableChange {
    Page(usize),
    PageSize(usize),
    /// Single-column sorting: only the first descriptor is kept.
    Sort(Vec<SortDescriptor>),
    /// Already-debounced search text.
    Search(String),
    /// `None` (or an empty value) clears the filter.
    Filter(String, Option<FilterValue>),
    Expanded(BTreeMap<String, bool>),
}

/// Snapshot of one table's request-shaping state.
///
/// # Examples
///
/// ```
/// use finquery_core::{TableChange, TableState};
///
/// let state = TableState::new(10, Default::default())
///     .apply(TableChange::Page(3))
///     .apply(TableChange::Search("aapl".into()));
///
/// assert_eq!(state.page_index, 0);
/// assert_eq!(state.search_text, "aapl");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableState {
    pub page_index: usize,
    pub page_size: usize,
    pub sorting: Vec<SortDescriptor>,
    pub search_text: String,
    pub filters: BTreeMap<String, FilterValue>,
    pub expanded: BTreeMap<String, bool>,
}

impl TableState {
    pub fn new(page_size: usize, filters: BTreeMap<String, FilterValue>) -> Self {
        Self {
            page_index: 0,
            page_size: page_size.max(1),
            sorting: Vec::new(),
            search_text: String::new(),
            filters,
            expanded: BTreeMap::new(),
        }
    }

    /// Returns the snapshot that results from `change`.
    pub fn apply(&self, change: TableChange) -> Self {
        let mut next = self.clone();
        match change {
            TableChange::Page(index) => next.page_index = index,
            TableChange::PageSize(size) => {
                next.page_size = size.max(1);
                next.page_index = 0;
            }
            TableChange::Sort(sorting) => {
                next.sorting = sorting.into_iter().take(1).collect();
            }
            TableChange::Search(text) => {
                if next.search_text != text {
                    next.search_text = text;
                    next.page_index = 0;
                }
            }
            TableChange::Filter(field, value) => {
                let value = value.filter(|v| !v.is_empty());
                let changed = match &value {
                    Some(value) => {
                        next.filters.insert(field, value.clone()).as_ref() != Some(value)
                    }
                    None => next.filters.remove(&field).is_some(),
                };
                if changed {
                    next.page_index = 0;
                }
            }
            TableChange::Expanded(expanded) => next.expanded = expanded,
        }
        next
    }

    /// The `ordering` request parameter, if a sort is active.
    pub fn ordering(&self) -> Option<String> {
        self.sorting.first().map(SortDescriptor::ordering)
    }

    /// Builds the cache key for this snapshot.
    ///
    /// `expanded` does not shape the request and is left out of the key.
    pub fn query_key(&self, resource: &str) -> QueryResult<QueryKey> {
        QueryKey::new(
            resource,
            &json!({
                "page_index": self.page_index,
                "page_size": self.page_size,
                "ordering": self.ordering(),
                "search": self.search_text,
                "filters": self.filters,
            }),
        )
    }

    /// Builds the list request parameters for this snapshot.
    pub fn list_params(&self) -> ListParams {
        let search = Some(self.search_text.trim())
            .filter(|text| !text.is_empty())
            .map(str::to_string);
        let filters = self
            .filters
            .iter()
            .flat_map(|(field, value)| {
                value
                    .values()
                    .into_iter()
                    .map(move |v| (field.clone(), v))
            })
            .collect();
        ListParams {
            page: self.page_index + 1,
            page_size: self.page_size,
            ordering: self.ordering(),
            search,
            filters,
        }
    }
}

impl Default for TableState {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE, BTreeMap::new())
    }
}
