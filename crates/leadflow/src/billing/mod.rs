//! Subscription billing: plan catalog, the local subscription mirror, and
//! reconciliation against the external processor.

pub mod domain;
pub mod processor;
pub mod reconciler;
pub mod repository;
pub mod router;

#[cfg(test)]
mod tests;

pub use domain::{
    BillingInterval, PlanId, Subscription, SubscriptionEvent, SubscriptionEventType,
    SubscriptionPlan, SubscriptionStatus,
};
pub use processor::{
    BillingProcessor, CheckoutRequest, CheckoutSession, CustomerDraft, ExternalSubscription,
    InvoiceOutcome, ProcessorError, WebhookEvent, WebhookEventKind,
};
pub use reconciler::{proration_credit, CheckoutUrls, ReconcileError, SubscriptionReconciler};
pub use repository::{
    PlanRepository, StoreError, SubscriptionHistoryRepository, SubscriptionRepository,
};
pub use router::{billing_router, BillingState};
