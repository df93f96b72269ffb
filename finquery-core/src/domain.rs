//! # Finance Mutation Policies
//!
//! Decides, for every mutation of the dashboard's entities, which caches are
//! patched in place and which derived caches are invalidated.
//!
//! Lists that are patched optimistically never refetch their own table; the
//! aggregates computed server-side (indicators, reports, balances) are always
//! invalidated when the mutation can have changed them.

use crate::invalidation::{CacheGroup, InvalidationIntent};
use crate::patch::{merge_row, remove_row};
use crate::{KeyFilter, OptimisticPatch};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Resource names used as cache-key prefixes.
pub mod resources {
    pub const TRANSACTIONS: &str = "transactions";
    pub const TRANSACTION_INDICATORS: &str = "transactions-indicators";
    pub const REPORTS_HISTORIC: &str = "reports-historic";
    pub const REPORTS_PER_TYPE: &str = "reports-per-type";
    pub const ASSETS: &str = "assets";
    pub const ASSET_INDICATORS: &str = "assets-indicators";
    pub const REVENUES: &str = "revenues";
    pub const REVENUE_INDICATORS: &str = "revenues-indicators";
    pub const EXPENSES: &str = "expenses";
    pub const EXPENSE_INDICATORS: &str = "expenses-indicators";
    pub const INCOMES: &str = "incomes";
    pub const INCOME_INDICATORS: &str = "incomes-indicators";
    pub const BANK_ACCOUNTS: &str = "bank-accounts";
    pub const BANK_ACCOUNTS_SUMMARY: &str = "bank-accounts-summary";
}

/// Entities whose mutations fan out through the invalidation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Transaction,
    Revenue,
    Expense,
    Income,
    Asset,
    BankAccount,
}

impl Entity {
    /// Resource name of the entity's own list.
    pub fn table_resource(&self) -> &'static str {
        match self {
            Self::Transaction => resources::TRANSACTIONS,
            Self::Revenue => resources::REVENUES,
            Self::Expense => resources::EXPENSES,
            Self::Income => resources::INCOMES,
            Self::Asset => resources::ASSETS,
            Self::BankAccount => resources::BANK_ACCOUNTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionAction {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl TransactionAction {
    pub fn is_purchase(&self) -> bool {
        matches!(self, Self::Buy)
    }
}

/// An asset transaction as returned by the transactions endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: u64,
    pub asset_id: u64,
    pub action: TransactionAction,
    pub price: f64,
    pub quantity: f64,
    pub operation_date: String,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dollar_real: Option<f64>,
}

/// A revenue (dividend, interest...) as returned by the revenues endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revenue {
    pub id: u64,
    pub value: f64,
    pub description: String,
    pub received_at: String,
}

/// What a successful mutation does to the cache: the patches applied first,
/// then the invalidation fan-out.
#[derive(Debug, Clone)]
pub struct MutationEffects<V> {
    pub entity: Entity,
    pub intent: InvalidationIntent,
    pub patches: Vec<OptimisticPatch<V>>,
}

impl<V> MutationEffects<V> {
    pub fn new(entity: Entity, intent: InvalidationIntent) -> Self {
        Self {
            entity,
            intent,
            patches: Vec::new(),
        }
    }

    pub fn with_patch(mut self, patch: OptimisticPatch<V>) -> Self {
        self.patches.push(patch);
        self
    }
}

/// A new transaction refreshes its table and every aggregate.
pub fn transaction_created() -> MutationEffects<Value> {
    MutationEffects::new(Entity::Transaction, InvalidationIntent::all())
}

/// An edited transaction is merged into every cached transactions page.
///
/// Reports only depend on the purchase/sale classification, so they are
/// invalidated only when the edit moves the transaction across it.
/// Indicators are always invalidated.
pub fn transaction_edited(before: &Transaction, after: &Transaction) -> MutationEffects<Value> {
    let reclassified = before.action.is_purchase() != after.action.is_purchase();
    let intent = InvalidationIntent::all()
        .skip(CacheGroup::Table)
        .with(CacheGroup::Reports, reclassified);

    let mut effects = MutationEffects::new(Entity::Transaction, intent);
    let fields = changed_fields(before, after);
    if !fields.is_empty() {
        effects = effects.with_patch(OptimisticPatch::new(
            KeyFilter::resource(resources::TRANSACTIONS),
            merge_row(Value::from(after.id), fields),
        ));
    }
    effects
}

/// A deleted transaction is spliced out of every cached page.
pub fn transaction_deleted(id: u64) -> MutationEffects<Value> {
    MutationEffects::new(
        Entity::Transaction,
        InvalidationIntent::all().skip(CacheGroup::Table),
    )
    .with_patch(OptimisticPatch::new(
        KeyFilter::resource(resources::TRANSACTIONS),
        remove_row(Value::from(id)),
    ))
}

/// A created (`before == None`) or edited revenue refetches its table; its
/// indicators and the bank-account summary only when the value moved.
pub fn revenue_saved(before: Option<&Revenue>, after: &Revenue) -> MutationEffects<Value> {
    let value_changed = before.map_or(true, |previous| previous.value != after.value);
    let intent = InvalidationIntent::all()
        .with(CacheGroup::Indicators, value_changed)
        .with(CacheGroup::BankAccounts, value_changed);
    MutationEffects::new(Entity::Revenue, intent)
}

/// Deleting a row of a simple resource refetches its table and indicators.
pub fn simple_deleted(entity: Entity) -> MutationEffects<Value> {
    MutationEffects::new(
        entity,
        InvalidationIntent::only([CacheGroup::Table, CacheGroup::Indicators]),
    )
}

fn changed_fields<T: Serialize>(before: &T, after: &T) -> Map<String, Value> {
    let (Ok(Value::Object(before)), Ok(Value::Object(after))) =
        (serde_json::to_value(before), serde_json::to_value(after))
    else {
        return Map::new();
    };
    after
        .into_iter()
        .filter(|(name, value)| name != "id" && before.get(name) != Some(value))
        .collect()
}
