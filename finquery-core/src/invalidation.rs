//! # Cache Invalidation Graph
//!
//! Declarative mapping from a mutated entity to the cache-key prefixes that
//! depend on it.
//!
//! Every edge of the graph belongs to a [`CacheGroup`]. A mutation call site
//! describes which groups it wants refreshed with an [`InvalidationIntent`]:
//! all groups are enabled by default and individual flags are switched off to
//! express domain conditions (e.g. "the list was already patched, do not
//! refetch the table").
//!
//! # Examples
//!
//! ```rust
//! use finquery_core::invalidation::{CacheGroup, InvalidationGraph, InvalidationIntent};
//! use finquery_core::{Entity, KeyFilter};
//!
//! let graph = InvalidationGraph::new()
//!     .with_edge(Entity::Revenue, CacheGroup::Table, "revenues")
//!     .with_edge(Entity::Revenue, CacheGroup::Indicators, "revenues-indicators");
//!
//! let filters = graph.resolve(Entity::Revenue, &InvalidationIntent::all().skip(CacheGroup::Table));
//! assert_eq!(filters, vec![KeyFilter::resource("revenues-indicators")]);
//! ```

use crate::domain::resources;
use crate::{Entity, KeyFilter};
use once_cell::sync::Lazy;
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

/// A family of caches that depend on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheGroup {
    /// The entity's own paginated list.
    Table,
    /// Server-computed historical and per-type reports.
    Reports,
    /// The entity's aggregate indicators.
    Indicators,
    /// Per-asset aggregate indicators.
    AssetIndicators,
    /// Bank-account balances and summary.
    BankAccounts,
}

impl CacheGroup {
    pub const ALL: [CacheGroup; 5] = [
        CacheGroup::Table,
        CacheGroup::Reports,
        CacheGroup::Indicators,
        CacheGroup::AssetIndicators,
        CacheGroup::BankAccounts,
    ];
}

/// Which cache groups a mutation should refresh.
///
/// Flags default to `true`.
///
/// ```
/// use finquery_core::invalidation::{CacheGroup, InvalidationIntent};
///
/// let intent = InvalidationIntent::all()
///     .skip(CacheGroup::Table)
///     .with(CacheGroup::Reports, false);
///
/// assert!(!intent.is_enabled(CacheGroup::Table));
/// assert!(!intent.is_enabled(CacheGroup::Reports));
/// assert!(intent.is_enabled(CacheGroup::Indicators));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationIntent {
    overrides: BTreeMap<CacheGroup, bool>,
}

impl InvalidationIntent {
    /// Every group enabled.
    pub fn all() -> Self {
        Self::default()
    }

    /// Only the listed groups enabled.
    pub fn only(groups: impl IntoIterator<Item = CacheGroup>) -> Self {
        let mut intent = Self {
            overrides: CacheGroup::ALL.iter().map(|group| (*group, false)).collect(),
        };
        for group in groups {
            intent.overrides.insert(group, true);
        }
        intent
    }

    pub fn with(mut self, group: CacheGroup, enabled: bool) -> Self {
        self.overrides.insert(group, enabled);
        self
    }

    pub fn skip(self, group: CacheGroup) -> Self {
        self.with(group, false)
    }

    pub fn is_enabled(&self, group: CacheGroup) -> bool {
        self.overrides.get(&group).copied().unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Edge {
    group: CacheGroup,
    resource: String,
}

/// Registry of entity → dependent cache prefixes.
///
/// The graph only decides *which* keys are affected; the cache store decides
/// whether matching entries are refetched now or on their next subscription.
#[derive(Debug, Clone, Default)]
pub struct InvalidationGraph {
    edges: HashMap<Entity, Vec<Edge>>,
}

static FINANCE_GRAPH: Lazy<InvalidationGraph> = Lazy::new(build_finance_graph);

impl InvalidationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// The dependency graph of the finance dashboard.
    ///
    /// | Entity | Table | Reports | Indicators | Asset indicators | Bank accounts |
    /// |---|---|---|---|---|---|
    /// | Transaction | transactions | reports-historic, reports-per-type | transactions-indicators | assets-indicators | |
    /// | Revenue | revenues | | revenues-indicators | | bank-accounts-summary |
    /// | Expense | expenses | | expenses-indicators | | |
    /// | Income | incomes | | incomes-indicators | | |
    /// | Asset | assets | | | assets-indicators | |
    /// | BankAccount | bank-accounts | | | | bank-accounts-summary |
    pub fn finance() -> &'static InvalidationGraph {
        &FINANCE_GRAPH
    }

    /// Registers an edge.
    ///
    /// # Arguments
    ///
    /// * `entity` - The mutated entity
    /// * `group` - The intent flag gating this edge
    /// * `resource` - Resource name (key prefix) of the dependent caches
    pub fn register(&mut self, entity: Entity, group: CacheGroup, resource: &str) -> &mut Self {
        let edges = self.edges.entry(entity).or_default();
        let edge = Edge {
            group,
            resource: resource.to_string(),
        };
        if !edges.contains(&edge) {
            edges.push(edge);
        }
        self
    }

    pub fn with_edge(mut self, entity: Entity, group: CacheGroup, resource: &str) -> Self {
        self.register(entity, group, resource);
        self
    }

    /// Returns the key filters a mutation of `entity` must invalidate under `intent`.
    pub fn resolve(&self, entity: Entity, intent: &InvalidationIntent) -> Vec<KeyFilter> {
        let filters: Vec<KeyFilter> = self
            .edges
            .get(&entity)
            .map(|edges| {
                edges
                    .iter()
                    .filter(|edge| intent.is_enabled(edge.group))
                    .map(|edge| KeyFilter::resource(edge.resource.clone()))
                    .collect()
            })
            .unwrap_or_default();
        trace!(?entity, ?intent, resolved = filters.len(), "resolved invalidation");
        filters
    }

    /// Lists every dependent resource of `entity` with the group gating it.
    pub fn dependents(&self, entity: Entity) -> Vec<(CacheGroup, &str)> {
        self.edges
            .get(&entity)
            .map(|edges| {
                edges
                    .iter()
                    .map(|edge| (edge.group, edge.resource.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the resources of `entity` registered under `group`.
    pub fn resources_in(&self, entity: Entity, group: CacheGroup) -> Vec<&str> {
        self.dependents(entity)
            .into_iter()
            .filter(|(g, _)| *g == group)
            .map(|(_, resource)| resource)
            .collect()
    }
}

fn build_finance_graph() -> InvalidationGraph {
    use CacheGroup::*;

    let mut graph = InvalidationGraph::new();
    graph
        .register(Entity::Transaction, Table, resources::TRANSACTIONS)
        .register(Entity::Transaction, Reports, resources::REPORTS_HISTORIC)
        .register(Entity::Transaction, Reports, resources::REPORTS_PER_TYPE)
        .register(Entity::Transaction, Indicators, resources::TRANSACTION_INDICATORS)
        .register(Entity::Transaction, AssetIndicators, resources::ASSET_INDICATORS);
    graph
        .register(Entity::Revenue, Table, resources::REVENUES)
        .register(Entity::Revenue, Indicators, resources::REVENUE_INDICATORS)
        .register(Entity::Revenue, BankAccounts, resources::BANK_ACCOUNTS_SUMMARY);
    graph
        .register(Entity::Expense, Table, resources::EXPENSES)
        .register(Entity::Expense, Indicators, resources::EXPENSE_INDICATORS);
    graph
        .register(Entity::Income, Table, resources::INCOMES)
        .register(Entity::Income, Indicators, resources::INCOME_INDICATORS);
    graph
        .register(Entity::Asset, Table, resources::ASSETS)
        .register(Entity::Asset, AssetIndicators, resources::ASSET_INDICATORS);
    graph
        .register(Entity::BankAccount, Table, resources::BANK_ACCOUNTS)
        .register(Entity::BankAccount, BankAccounts, resources::BANK_ACCOUNTS_SUMMARY);
    graph
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_intent_reaches_every_edge() {
        let graph = InvalidationGraph::finance();
        let filters = graph.resolve(Entity::Transaction, &InvalidationIntent::all());
        assert_eq!(filters.len(), 5);
        assert!(filters.contains(&KeyFilter::resource(resources::TRANSACTIONS)));
        assert!(filters.contains(&KeyFilter::resource(resources::REPORTS_PER_TYPE)));
    }

    #[test]
    fn test_disabled_group_is_pruned() {
        let graph = InvalidationGraph::finance();
        let intent = InvalidationIntent::all()
            .skip(CacheGroup::Table)
            .skip(CacheGroup::Reports);
        let filters = graph.resolve(Entity::Transaction, &intent);
        assert_eq!(
            filters,
            vec![
                KeyFilter::resource(resources::TRANSACTION_INDICATORS),
                KeyFilter::resource(resources::ASSET_INDICATORS),
            ]
        );
    }

    #[test]
    fn test_only_enables_listed_groups() {
        let intent = InvalidationIntent::only([CacheGroup::Table, CacheGroup::Indicators]);
        let filters = InvalidationGraph::finance().resolve(Entity::Revenue, &intent);
        assert_eq!(filters.len(), 2);
        assert!(!filters.contains(&KeyFilter::resource(resources::BANK_ACCOUNTS_SUMMARY)));
    }

    #[test]
    fn test_unknown_entity_resolves_nothing() {
        let graph = InvalidationGraph::new();
        assert!(graph
            .resolve(Entity::Income, &InvalidationIntent::all())
            .is_empty());
    }

    #[test]
    fn test_duplicate_edges_are_ignored() {
        let graph = InvalidationGraph::new()
            .with_edge(Entity::Income, CacheGroup::Table, "incomes")
            .with_edge(Entity::Income, CacheGroup::Table, "incomes");
        assert_eq!(graph.dependents(Entity::Income).len(), 1);
    }

    #[test]
    fn test_resources_in_group() {
        let reports =
            InvalidationGraph::finance().resources_in(Entity::Transaction, CacheGroup::Reports);
        assert_eq!(
            reports,
            vec![resources::REPORTS_HISTORIC, resources::REPORTS_PER_TYPE]
        );
    }
}
