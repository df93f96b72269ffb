//! # Resource boundary
//!
//! The HTTP client lives outside this crate. It is reached through the
//! [`Resource`] trait, one implementation per REST resource, and list
//! responses are cached as JSON so that optimistic patches can rewrite them.
//!
//! The services below compose a resource with a [`Mutator`]: each mutation
//! method performs the request and, on success, applies the cache effects the
//! finance policies prescribe for it.

use async_trait::async_trait;
use finquery_core::domain::{
    revenue_saved, simple_deleted, transaction_created, transaction_deleted, transaction_edited,
    Revenue, Transaction,
};
use finquery_core::{
    Entity, InvalidationIntent, ListParams, MutationEffects, Page, QueryError, QueryResult,
};
use futures_util::future::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::mutation::Mutator;
use crate::table::{ListFetcher, TableConfig};

/// A REST resource with list and CRUD endpoints.
///
/// Errors must be reported as [`QueryError::Network`] when no response was
/// received, and as [`QueryError::Server`] with the response body untouched
/// otherwise.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Resource name, used as the cache-key prefix of its lists.
    fn name(&self) -> &str;

    async fn list(&self, params: ListParams) -> QueryResult<Page<Value>>;

    async fn create(&self, body: Value) -> QueryResult<Value>;

    async fn edit(&self, id: u64, body: Value) -> QueryResult<Value>;

    async fn delete(&self, id: u64) -> QueryResult<()>;
}

/// Adapts [`Resource::list`] to a table fetcher that caches pages as JSON.
pub fn list_fetcher(resource: Arc<dyn Resource>) -> ListFetcher<Value> {
    Arc::new(move |params: ListParams| {
        let resource = Arc::clone(&resource);
        async move {
            let page = resource.list(params).await?;
            serde_json::to_value(page).map_err(QueryError::decode)
        }
        .boxed()
    })
}

/// A table configuration listing `resource`, keyed by its name.
pub fn table_config(resource: Arc<dyn Resource>) -> TableConfig<Value> {
    let name = resource.name().to_string();
    TableConfig::from_fetcher(name, list_fetcher(resource))
}

fn encode<T: Serialize>(value: &T) -> QueryResult<Value> {
    serde_json::to_value(value).map_err(QueryError::decode)
}

fn decode<T: DeserializeOwned>(value: Value) -> QueryResult<T> {
    serde_json::from_value(value).map_err(QueryError::decode)
}

/// Transaction mutations.
///
/// Created transactions refresh the list. Edits and deletes patch every cached
/// page in place and leave the list alone; indicators and, when relevant,
/// reports are invalidated.
pub struct TransactionService {
    resource: Arc<dyn Resource>,
    mutator: Mutator<Value>,
}

impl TransactionService {
    pub fn new(resource: Arc<dyn Resource>, mutator: Mutator<Value>) -> Self {
        Self { resource, mutator }
    }

    pub async fn create(&self, draft: Value) -> QueryResult<Transaction> {
        let request = async { decode::<Transaction>(self.resource.create(draft).await?) };
        self.mutator
            .run(request, |_| transaction_created())
            .await
    }

    /// Saves `after` over `before`; the response is merged into cached pages.
    pub async fn edit(
        &self,
        before: &Transaction,
        after: &Transaction,
    ) -> QueryResult<Transaction> {
        let request = async {
            let body = encode(after)?;
            decode::<Transaction>(self.resource.edit(after.id, body).await?)
        };
        self.mutator
            .run(request, |saved| transaction_edited(before, saved))
            .await
    }

    pub async fn delete(&self, id: u64) -> QueryResult<()> {
        self.mutator
            .run(self.resource.delete(id), |_| transaction_deleted(id))
            .await
    }
}

/// Revenue mutations. Indicators and bank balances are refreshed only when
/// the monetary value changed.
pub struct RevenueService {
    resource: Arc<dyn Resource>,
    mutator: Mutator<Value>,
}

impl RevenueService {
    pub fn new(resource: Arc<dyn Resource>, mutator: Mutator<Value>) -> Self {
        Self { resource, mutator }
    }

    pub async fn create(&self, draft: Value) -> QueryResult<Revenue> {
        let request = async { decode::<Revenue>(self.resource.create(draft).await?) };
        self.mutator
            .run(request, |saved| revenue_saved(None, saved))
            .await
    }

    pub async fn edit(&self, before: &Revenue, after: &Revenue) -> QueryResult<Revenue> {
        let request = async {
            let body = encode(after)?;
            decode::<Revenue>(self.resource.edit(after.id, body).await?)
        };
        self.mutator
            .run(request, |saved| revenue_saved(Some(before), saved))
            .await
    }

    pub async fn delete(&self, id: u64) -> QueryResult<()> {
        self.mutator
            .run(self.resource.delete(id), |_| simple_deleted(Entity::Revenue))
            .await
    }
}

/// Mutations of resources without special rules (expenses, incomes...).
///
/// Every successful mutation refetches the resource's table and invalidates
/// whatever else the graph registers for the entity.
pub struct SimpleResourceService {
    entity: Entity,
    resource: Arc<dyn Resource>,
    mutator: Mutator<Value>,
}

impl SimpleResourceService {
    pub fn new(entity: Entity, resource: Arc<dyn Resource>, mutator: Mutator<Value>) -> Self {
        Self {
            entity,
            resource,
            mutator,
        }
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    pub async fn create(&self, draft: Value) -> QueryResult<Value> {
        let entity = self.entity;
        self.mutator
            .run(self.resource.create(draft), |_| {
                MutationEffects::new(entity, InvalidationIntent::all())
            })
            .await
    }

    pub async fn edit(&self, id: u64, body: Value) -> QueryResult<Value> {
        let entity = self.entity;
        self.mutator
            .run(self.resource.edit(id, body), |_| {
                MutationEffects::new(entity, InvalidationIntent::all())
            })
            .await
    }

    pub async fn delete(&self, id: u64) -> QueryResult<()> {
        let entity = self.entity;
        self.mutator
            .run(self.resource.delete(id), |_| simple_deleted(entity))
            .await
    }
}
