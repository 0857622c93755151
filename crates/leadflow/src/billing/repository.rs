use crate::billing::domain::{
    PlanId, Subscription, SubscriptionEvent, SubscriptionPlan,
};
use crate::directory::ProviderId;

/// Storage abstraction for subscription rows.
///
/// Rows are keyed by provider id; `upsert` replaces any existing row for the
/// same provider, which is what enforces the one-subscription-per-provider
/// invariant at the storage layer.
pub trait SubscriptionRepository: Send + Sync {
    fn for_provider(&self, id: ProviderId) -> Result<Option<Subscription>, StoreError>;
    fn by_customer(&self, customer_ref: &str) -> Result<Option<Subscription>, StoreError>;
    fn upsert(&self, subscription: Subscription) -> Result<(), StoreError>;
}

/// Append-only event log. Rows are never updated in place.
pub trait SubscriptionHistoryRepository: Send + Sync {
    fn append(&self, event: SubscriptionEvent) -> Result<(), StoreError>;
    /// Events for a provider, newest first.
    fn for_provider(&self, id: ProviderId) -> Result<Vec<SubscriptionEvent>, StoreError>;
}

pub trait PlanRepository: Send + Sync {
    fn plan(&self, id: PlanId) -> Result<Option<SubscriptionPlan>, StoreError>;
    /// Active plans ordered by sort order, then price.
    fn active_plans(&self) -> Result<Vec<SubscriptionPlan>, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("billing store unavailable: {0}")]
    Unavailable(String),
}
