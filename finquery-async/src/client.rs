use finquery_core::{Entity, InvalidationGraph, QueryClientConfig, QueryResult};
use serde_json::Value;
use std::sync::Arc;

use crate::mutation::Mutator;
use crate::query_cache::QueryCache;
use crate::resource::{
    table_config, Resource, RevenueService, SimpleResourceService, TransactionService,
};
use crate::table::{TableConfig, TableQuery};
use crate::QueryValue;

/// Entry point bundling a cache, its invalidation graph and a mutator.
///
/// # Examples
///
/// ```ignore
/// use finquery_async::QueryClient;
/// use finquery_core::QueryClientConfig;
///
/// let client = QueryClient::finance(QueryClientConfig::default())?;
/// let transactions = client.transactions(api.transactions());
/// let table = client.table(client.resource_table(api.transactions()));
/// ```
pub struct QueryClient<V: QueryValue> {
    cache: QueryCache<V>,
    mutator: Mutator<V>,
}

impl<V: QueryValue> Clone for QueryClient<V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            mutator: self.mutator.clone(),
        }
    }
}

impl<V: QueryValue> QueryClient<V> {
    /// Creates a client on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// [`QueryError::NoRuntime`](finquery_core::QueryError::NoRuntime) outside of a runtime.
    pub fn new(config: QueryClientConfig, graph: InvalidationGraph) -> QueryResult<Self> {
        let cache = QueryCache::new(config)?;
        let mutator = Mutator::new(cache.clone(), Arc::new(graph));
        Ok(Self { cache, mutator })
    }

    pub fn cache(&self) -> &QueryCache<V> {
        &self.cache
    }

    pub fn mutator(&self) -> &Mutator<V> {
        &self.mutator
    }

    pub fn table(&self, config: TableConfig<V>) -> TableQuery<V> {
        TableQuery::new(self.cache.clone(), config)
    }
}

impl QueryClient<Value> {
    /// A client wired with the finance dashboard's invalidation graph.
    pub fn finance(config: QueryClientConfig) -> QueryResult<Self> {
        Self::new(config, InvalidationGraph::finance().clone())
    }

    pub fn resource_table(&self, resource: Arc<dyn Resource>) -> TableConfig<Value> {
        table_config(resource)
    }

    pub fn transactions(&self, resource: Arc<dyn Resource>) -> TransactionService {
        TransactionService::new(resource, self.mutator.clone())
    }

    pub fn revenues(&self, resource: Arc<dyn Resource>) -> RevenueService {
        RevenueService::new(resource, self.mutator.clone())
    }

    pub fn simple(&self, entity: Entity, resource: Arc<dyn Resource>) -> SimpleResourceService {
        SimpleResourceService::new(entity, resource, self.mutator.clone())
    }
}
