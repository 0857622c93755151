//! Reconciliation between local subscription rows and the billing processor.
//!
//! All mutation of [`Subscription`] rows funnels through this service. Local
//! writes only happen after the processor call they depend on has succeeded;
//! best-effort secondary steps (duplicate cleanup, customer refresh, invoice
//! settlement) log their failures and never abort the primary operation.
//! Webhook handlers are idempotent: re-applying a delivery reproduces the
//! same local state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::billing::domain::{
    PlanId, Subscription, SubscriptionEvent, SubscriptionEventType, SubscriptionPlan,
    SubscriptionStatus,
};
use crate::billing::processor::{
    BillingProcessor, CheckoutRequest, CheckoutSession, CustomerDraft, ExternalSubscription,
    ProcessorError, WebhookEvent, WebhookEventKind,
};
use crate::billing::repository::{
    PlanRepository, StoreError, SubscriptionHistoryRepository, SubscriptionRepository,
};
use crate::config::BillingConfig;
use crate::directory::{ProviderId, ServiceProvider};

/// Redirect targets handed to the processor when creating hosted sessions.
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    pub success_url: String,
    pub cancel_url: String,
    pub portal_return_url: String,
}

impl CheckoutUrls {
    pub fn from_config(config: &BillingConfig) -> Self {
        Self {
            success_url: config.checkout_success_url(),
            cancel_url: config.checkout_cancel_url(),
            portal_return_url: config.portal_return_url(),
        }
    }
}

enum CancelReason {
    NewCheckout,
    Duplicate { new_subscription_ref: String },
}

pub struct SubscriptionReconciler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    history: Arc<dyn SubscriptionHistoryRepository>,
    plans: Arc<dyn PlanRepository>,
    processor: Arc<dyn BillingProcessor>,
    urls: CheckoutUrls,
}

impl SubscriptionReconciler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        history: Arc<dyn SubscriptionHistoryRepository>,
        plans: Arc<dyn PlanRepository>,
        processor: Arc<dyn BillingProcessor>,
        urls: CheckoutUrls,
    ) -> Self {
        Self {
            subscriptions,
            history,
            plans,
            processor,
            urls,
        }
    }

    /// Start a checkout for `provider` on `plan_id`, returning the hosted
    /// session to redirect to.
    ///
    /// Ensures exactly one external customer exists for the provider and
    /// proactively cancels any other live external subscription before the
    /// new intent is created. The local row moves to `incomplete`; the
    /// processor webhook completes the transition once payment settles.
    pub fn checkout(
        &self,
        provider: &ServiceProvider,
        plan_id: PlanId,
    ) -> Result<CheckoutSession, ReconcileError> {
        let plan = self
            .plans
            .plan(plan_id)?
            .ok_or(ReconcileError::UnknownPlan(plan_id))?;

        let existing = self.subscriptions.for_provider(provider.id)?;
        if let Some(current) = &existing {
            if current.plan_id == Some(plan.id) && current.status.is_live() {
                return Err(ReconcileError::AlreadySubscribed(provider.id));
            }
        }

        let draft = customer_draft(provider);
        let customer_ref = match existing.as_ref().map(|sub| sub.customer_ref.clone()) {
            Some(customer_ref) => {
                if let Err(err) = self.processor.update_customer(&customer_ref, &draft) {
                    warn!(provider = %provider.id, %err, "customer refresh failed during checkout");
                }
                customer_ref
            }
            None => self.processor.create_customer(&draft)?,
        };

        self.cancel_other_live(
            provider.id,
            &customer_ref,
            existing.as_ref().and_then(|sub| sub.subscription_ref.as_deref()),
            CancelReason::NewCheckout,
        );

        let session = self.processor.create_checkout_session(&CheckoutRequest {
            customer_ref: customer_ref.clone(),
            price_ref: plan.price_ref.clone(),
            trial_days: plan.trial_days,
            provider_id: provider.id,
            plan_id: plan.id,
            success_url: self.urls.success_url.clone(),
            cancel_url: self.urls.cancel_url.clone(),
        })?;

        self.subscriptions.upsert(Subscription {
            provider_id: provider.id,
            customer_ref: customer_ref.clone(),
            subscription_ref: existing.as_ref().and_then(|sub| sub.subscription_ref.clone()),
            status: SubscriptionStatus::Incomplete,
            plan_id: Some(plan.id),
            current_period_end: existing.as_ref().and_then(|sub| sub.current_period_end),
            trial_ends_at: existing.as_ref().and_then(|sub| sub.trial_ends_at),
        })?;

        self.append_history(SubscriptionEvent {
            provider_id: provider.id,
            plan_id: Some(plan.id),
            subscription_ref: None,
            customer_ref: Some(customer_ref),
            event_type: SubscriptionEventType::Created,
            status: SubscriptionStatus::Incomplete,
            amount: Some(plan.price),
            currency: "usd".to_string(),
            description: format!("Checkout session created for plan: {}", plan.name),
            metadata: json!({
                "checkout_session_id": session.id.clone(),
                "plan_name": plan.name,
            }),
            event_date: Utc::now(),
        });

        Ok(session)
    }

    /// Apply a verified processor event to local state. Unknown customers
    /// and unhandled kinds are logged no-ops, never errors.
    pub fn apply_external_event(&self, event: &WebhookEvent) -> Result<(), ReconcileError> {
        match &event.kind {
            WebhookEventKind::SubscriptionCreated | WebhookEventKind::SubscriptionUpdated => {
                self.apply_subscription_update(&event.subscription)
            }
            WebhookEventKind::SubscriptionDeleted => {
                self.apply_subscription_deleted(&event.subscription)
            }
            WebhookEventKind::Unhandled(kind) => {
                info!(kind, "ignoring unhandled billing event");
                Ok(())
            }
        }
    }

    fn apply_subscription_update(
        &self,
        external: &ExternalSubscription,
    ) -> Result<(), ReconcileError> {
        let Some(local) = self.resolve_local(external)? else {
            info!(
                customer = %external.customer_ref,
                subscription = %external.subscription_ref,
                "billing event does not match a local subscription"
            );
            return Ok(());
        };

        let status = SubscriptionStatus::from_external(&external.status);
        if status.is_live() {
            self.cancel_other_live(
                local.provider_id,
                &external.customer_ref,
                Some(external.subscription_ref.as_str()),
                CancelReason::Duplicate {
                    new_subscription_ref: external.subscription_ref.clone(),
                },
            );
        }

        let old_status = local.status;
        let plan_id = external.plan_id.or(local.plan_id);

        self.subscriptions.upsert(Subscription {
            provider_id: local.provider_id,
            customer_ref: external.customer_ref.clone(),
            subscription_ref: Some(external.subscription_ref.clone()),
            status,
            plan_id,
            current_period_end: external.current_period_end,
            trial_ends_at: external.trial_end,
        })?;

        let event_type = if old_status == SubscriptionStatus::Incomplete
            && status == SubscriptionStatus::Active
        {
            SubscriptionEventType::Created
        } else {
            SubscriptionEventType::Updated
        };

        self.append_history(SubscriptionEvent {
            provider_id: local.provider_id,
            plan_id,
            subscription_ref: Some(external.subscription_ref.clone()),
            customer_ref: Some(external.customer_ref.clone()),
            event_type,
            status,
            amount: external.unit_amount,
            currency: "usd".to_string(),
            description: format!(
                "Subscription {}: status changed from {} to {}",
                event_type.label(),
                old_status.label(),
                status.label()
            ),
            metadata: json!({
                "old_status": old_status.label(),
                "new_status": status.label(),
            }),
            event_date: Utc::now(),
        });

        Ok(())
    }

    fn apply_subscription_deleted(
        &self,
        external: &ExternalSubscription,
    ) -> Result<(), ReconcileError> {
        let Some(local) = self.subscriptions.by_customer(&external.customer_ref)? else {
            info!(
                customer = %external.customer_ref,
                "deletion event does not match a local subscription"
            );
            return Ok(());
        };

        let mut canceled = local.clone();
        canceled.status = SubscriptionStatus::Canceled;
        self.subscriptions.upsert(canceled)?;

        self.append_history(SubscriptionEvent {
            provider_id: local.provider_id,
            plan_id: local.plan_id,
            subscription_ref: Some(external.subscription_ref.clone()),
            customer_ref: Some(external.customer_ref.clone()),
            event_type: SubscriptionEventType::Canceled,
            status: SubscriptionStatus::Canceled,
            amount: external.unit_amount,
            currency: "usd".to_string(),
            description: "Subscription canceled by processor event".to_string(),
            metadata: json!({ "subscription_ref": external.subscription_ref }),
            event_date: Utc::now(),
        });

        Ok(())
    }

    /// Switch the provider to `new_plan_id`, pro-rating the change.
    ///
    /// The credit returned in history metadata is audit-only; the processor
    /// computes the authoritative proration. Invoice settlement is
    /// best-effort — the processor collects on the next cycle when it fails.
    pub fn change_plan(
        &self,
        provider: &ServiceProvider,
        new_plan_id: PlanId,
        now: DateTime<Utc>,
    ) -> Result<Subscription, ReconcileError> {
        let local = self
            .subscriptions
            .for_provider(provider.id)?
            .ok_or(ReconcileError::NoSubscription(provider.id))?;
        let subscription_ref = local
            .subscription_ref
            .clone()
            .ok_or(ReconcileError::NoSubscription(provider.id))?;

        if local.plan_id == Some(new_plan_id) {
            return Err(ReconcileError::AlreadySubscribed(provider.id));
        }

        let new_plan = self
            .plans
            .plan(new_plan_id)?
            .ok_or(ReconcileError::UnknownPlan(new_plan_id))?;
        let current_plan = self.current_plan(&local, provider.id)?;

        let external = self.processor.retrieve_subscription(&subscription_ref)?;
        let credit = proration_credit(
            current_plan.price,
            external.current_period_start,
            external.current_period_end,
            now,
        );
        let event_type = if new_plan.price > current_plan.price {
            SubscriptionEventType::Upgraded
        } else {
            SubscriptionEventType::Downgraded
        };

        let updated = self.processor.update_subscription_price(
            &subscription_ref,
            &new_plan.price_ref,
            provider.id,
            new_plan.id,
        )?;

        if let Err(err) = self
            .processor
            .update_customer(&local.customer_ref, &customer_draft(provider))
        {
            warn!(provider = %provider.id, %err, "customer refresh failed during plan change");
        }

        self.settle_prorated_invoice(provider.id, &local.customer_ref, &updated.subscription_ref);

        let refreshed = Subscription {
            provider_id: provider.id,
            customer_ref: local.customer_ref.clone(),
            subscription_ref: Some(updated.subscription_ref.clone()),
            status: SubscriptionStatus::from_external(&updated.status),
            plan_id: Some(new_plan.id),
            current_period_end: updated.current_period_end.or(local.current_period_end),
            trial_ends_at: local.trial_ends_at,
        };
        self.subscriptions.upsert(refreshed.clone())?;

        self.append_history(SubscriptionEvent {
            provider_id: provider.id,
            plan_id: Some(new_plan.id),
            subscription_ref: Some(updated.subscription_ref),
            customer_ref: Some(local.customer_ref),
            event_type,
            status: refreshed.status,
            amount: Some(new_plan.price),
            currency: "usd".to_string(),
            description: format!(
                "{} from {} to {}",
                capitalized(event_type.label()),
                current_plan.name,
                new_plan.name
            ),
            metadata: json!({
                "old_plan_id": current_plan.id,
                "old_plan_name": current_plan.name,
                "old_plan_price": current_plan.price,
                "new_plan_name": new_plan.name,
                "new_plan_price": new_plan.price,
                "proration_credit": credit,
                "charged_immediately": true,
            }),
            event_date: Utc::now(),
        });

        Ok(refreshed)
    }

    /// Best-effort pull sync used by the status endpoint: when the local row
    /// is not `active` but holds a subscription ref, refresh it from the
    /// processor. A failed pull is logged and the stale row returned.
    pub fn refresh(&self, provider_id: ProviderId) -> Result<Option<Subscription>, ReconcileError> {
        let Some(local) = self.subscriptions.for_provider(provider_id)? else {
            return Ok(None);
        };

        let Some(subscription_ref) = local.subscription_ref.clone() else {
            return Ok(Some(local));
        };
        if local.status == SubscriptionStatus::Active {
            return Ok(Some(local));
        }

        match self.processor.retrieve_subscription(&subscription_ref) {
            Ok(external) => {
                let mut updated = local;
                updated.status = SubscriptionStatus::from_external(&external.status);
                updated.current_period_end =
                    external.current_period_end.or(updated.current_period_end);
                self.subscriptions.upsert(updated.clone())?;
                Ok(Some(updated))
            }
            Err(err) => {
                warn!(provider = %provider_id, %err, "subscription refresh failed");
                Ok(Some(local))
            }
        }
    }

    pub fn portal_session(&self, provider_id: ProviderId) -> Result<String, ReconcileError> {
        let local = self
            .subscriptions
            .for_provider(provider_id)?
            .ok_or(ReconcileError::NoSubscription(provider_id))?;
        Ok(self
            .processor
            .create_billing_portal_session(&local.customer_ref, &self.urls.portal_return_url)?)
    }

    pub fn history_for(
        &self,
        provider_id: ProviderId,
    ) -> Result<Vec<SubscriptionEvent>, ReconcileError> {
        Ok(self.history.for_provider(provider_id)?)
    }

    pub fn subscription_for(
        &self,
        provider_id: ProviderId,
    ) -> Result<Option<Subscription>, ReconcileError> {
        Ok(self.subscriptions.for_provider(provider_id)?)
    }

    /// Verify and decode a webhook delivery via the processor.
    pub fn parse_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookEvent, ProcessorError> {
        self.processor.parse_webhook(payload, signature)
    }

    fn current_plan(
        &self,
        local: &Subscription,
        provider_id: ProviderId,
    ) -> Result<SubscriptionPlan, ReconcileError> {
        let plan_id = local
            .plan_id
            .ok_or(ReconcileError::NoSubscription(provider_id))?;
        self.plans
            .plan(plan_id)?
            .ok_or(ReconcileError::UnknownPlan(plan_id))
    }

    /// Cancel every live external subscription for `customer_ref` except
    /// `keep_ref`. Best-effort: list or cancel failures are logged and the
    /// caller proceeds; successful cancellations land in history.
    fn cancel_other_live(
        &self,
        provider_id: ProviderId,
        customer_ref: &str,
        keep_ref: Option<&str>,
        reason: CancelReason,
    ) {
        let subscriptions = match self.processor.subscriptions_for_customer(customer_ref) {
            Ok(subscriptions) => subscriptions,
            Err(err) => {
                warn!(provider = %provider_id, %err, "could not list external subscriptions");
                return;
            }
        };

        for external in subscriptions {
            if Some(external.subscription_ref.as_str()) == keep_ref {
                continue;
            }
            if !SubscriptionStatus::from_external(&external.status).is_live() {
                continue;
            }

            if let Err(err) = self.processor.cancel_subscription(&external.subscription_ref) {
                warn!(
                    provider = %provider_id,
                    subscription = %external.subscription_ref,
                    %err,
                    "failed to cancel stray external subscription"
                );
                continue;
            }

            info!(
                provider = %provider_id,
                subscription = %external.subscription_ref,
                "canceled stray external subscription"
            );

            let (description, metadata) = match &reason {
                CancelReason::NewCheckout => (
                    "Subscription canceled due to new subscription creation".to_string(),
                    json!({ "canceled_by": "system", "reason": "new_subscription_created" }),
                ),
                CancelReason::Duplicate {
                    new_subscription_ref,
                } => (
                    "Duplicate subscription canceled (new subscription created)".to_string(),
                    json!({
                        "canceled_by": "system",
                        "reason": "duplicate_subscription",
                        "new_subscription_ref": new_subscription_ref,
                    }),
                ),
            };

            self.append_history(SubscriptionEvent {
                provider_id,
                plan_id: external.plan_id,
                subscription_ref: Some(external.subscription_ref.clone()),
                customer_ref: Some(customer_ref.to_string()),
                event_type: SubscriptionEventType::Canceled,
                status: SubscriptionStatus::Canceled,
                amount: external.unit_amount,
                currency: "usd".to_string(),
                description,
                metadata,
                event_date: Utc::now(),
            });
        }
    }

    fn settle_prorated_invoice(
        &self,
        provider_id: ProviderId,
        customer_ref: &str,
        subscription_ref: &str,
    ) {
        match self
            .processor
            .create_and_pay_invoice(customer_ref, subscription_ref)
        {
            Ok(outcome) if outcome.paid => {
                info!(
                    provider = %provider_id,
                    invoice = %outcome.invoice_ref,
                    amount = outcome.amount_due,
                    "prorated invoice paid immediately"
                );
            }
            Ok(outcome) => {
                info!(
                    provider = %provider_id,
                    invoice = %outcome.invoice_ref,
                    "prorated invoice settled by credit, no payment needed"
                );
            }
            Err(ProcessorError::OpenInvoice) => {
                warn!(
                    provider = %provider_id,
                    "subscription already has an open invoice; left for the next billing cycle"
                );
            }
            Err(err) => {
                warn!(
                    provider = %provider_id,
                    %err,
                    "prorated invoice settlement failed; processor will collect next cycle"
                );
            }
        }
    }

    fn resolve_local(
        &self,
        external: &ExternalSubscription,
    ) -> Result<Option<Subscription>, StoreError> {
        if let Some(provider_id) = external.provider_id {
            if let Some(local) = self.subscriptions.for_provider(provider_id)? {
                return Ok(Some(local));
            }
        }
        self.subscriptions.by_customer(&external.customer_ref)
    }

    fn append_history(&self, event: SubscriptionEvent) {
        if let Err(err) = self.history.append(event) {
            warn!(%err, "failed to append subscription history entry");
        }
    }
}

/// Audit-only proration credit for the unused remainder of the current
/// period. Zero when the period is missing, exhausted, or degenerate.
pub fn proration_credit(
    current_price: f64,
    period_start: Option<DateTime<Utc>>,
    period_end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> f64 {
    let (Some(start), Some(end)) = (period_start, period_end) else {
        return 0.0;
    };

    let total = (end - start).num_seconds();
    let remaining = (end - now).num_seconds();
    if total <= 0 || remaining <= 0 {
        return 0.0;
    }

    current_price * (remaining as f64 / total as f64)
}

fn customer_draft(provider: &ServiceProvider) -> CustomerDraft {
    CustomerDraft {
        provider_id: provider.id,
        email: provider.email.clone(),
        name: provider.name.clone(),
        address_line: provider.address.clone(),
        postal_code: provider.zip_code.clone(),
    }
}

fn capitalized(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("unknown plan {0}")]
    UnknownPlan(PlanId),
    #[error("no live subscription on file for provider {0}")]
    NoSubscription(ProviderId),
    #[error("provider {0} is already subscribed to this plan")]
    AlreadySubscribed(ProviderId),
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
