use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::billing::domain::{
    BillingInterval, PlanId, Subscription, SubscriptionEvent, SubscriptionPlan,
    SubscriptionStatus,
};
use crate::billing::processor::{
    BillingProcessor, CheckoutRequest, CheckoutSession, CustomerDraft, ExternalSubscription,
    InvoiceOutcome, ProcessorError, WebhookEvent, WebhookEventKind,
};
use crate::billing::reconciler::{CheckoutUrls, SubscriptionReconciler};
use crate::billing::repository::{
    PlanRepository, StoreError, SubscriptionHistoryRepository, SubscriptionRepository,
};
use crate::directory::{ProviderId, ServiceProvider};

pub(super) const WEBHOOK_SECRET: &str = "whsec_test";

pub(super) fn provider(id: u64) -> ServiceProvider {
    ServiceProvider {
        id: ProviderId(id),
        name: format!("Provider {id}"),
        email: format!("provider{id}@example.com"),
        phone: Some("555-0100".to_string()),
        address: Some(format!("{id} Main St")),
        zip_code: Some("50309".to_string()),
        is_active: true,
    }
}

pub(super) fn silver() -> SubscriptionPlan {
    SubscriptionPlan {
        id: PlanId(1),
        name: "Silver".to_string(),
        price_ref: "price_silver".to_string(),
        price: 49.0,
        interval: BillingInterval::Month,
        trial_days: 14,
        is_active: true,
        sort_order: 1,
    }
}

pub(super) fn gold() -> SubscriptionPlan {
    SubscriptionPlan {
        id: PlanId(2),
        name: "Gold".to_string(),
        price_ref: "price_gold".to_string(),
        price: 99.0,
        interval: BillingInterval::Month,
        trial_days: 0,
        is_active: true,
        sort_order: 2,
    }
}

pub(super) fn local_subscription(
    provider: ProviderId,
    status: SubscriptionStatus,
    plan: PlanId,
) -> Subscription {
    Subscription {
        provider_id: provider,
        customer_ref: format!("cus_{}", provider.0),
        subscription_ref: Some(format!("sub_{}", provider.0)),
        status,
        plan_id: Some(plan),
        current_period_end: Some(Utc::now() + Duration::days(20)),
        trial_ends_at: None,
    }
}

pub(super) fn external(
    subscription_ref: &str,
    customer_ref: &str,
    status: &str,
) -> ExternalSubscription {
    ExternalSubscription {
        subscription_ref: subscription_ref.to_string(),
        customer_ref: customer_ref.to_string(),
        status: status.to_string(),
        current_period_start: Some(Utc::now() - Duration::days(10)),
        current_period_end: Some(Utc::now() + Duration::days(20)),
        trial_end: None,
        unit_amount: Some(49.0),
        provider_id: None,
        plan_id: None,
    }
}

pub(super) fn updated_event(subscription: ExternalSubscription) -> WebhookEvent {
    WebhookEvent {
        kind: WebhookEventKind::SubscriptionUpdated,
        subscription,
    }
}

#[derive(Default)]
pub(super) struct MemorySubscriptionStore {
    rows: Mutex<HashMap<ProviderId, Subscription>>,
}

impl MemorySubscriptionStore {
    pub(super) fn set(&self, subscription: Subscription) {
        self.rows
            .lock()
            .expect("subscription mutex poisoned")
            .insert(subscription.provider_id, subscription);
    }

    pub(super) fn get(&self, id: ProviderId) -> Option<Subscription> {
        self.rows
            .lock()
            .expect("subscription mutex poisoned")
            .get(&id)
            .cloned()
    }

    pub(super) fn len(&self) -> usize {
        self.rows.lock().expect("subscription mutex poisoned").len()
    }
}

impl SubscriptionRepository for MemorySubscriptionStore {
    fn for_provider(&self, id: ProviderId) -> Result<Option<Subscription>, StoreError> {
        Ok(self.get(id))
    }

    fn by_customer(&self, customer_ref: &str) -> Result<Option<Subscription>, StoreError> {
        Ok(self
            .rows
            .lock()
            .expect("subscription mutex poisoned")
            .values()
            .find(|subscription| subscription.customer_ref == customer_ref)
            .cloned())
    }

    fn upsert(&self, subscription: Subscription) -> Result<(), StoreError> {
        self.set(subscription);
        Ok(())
    }
}

#[derive(Default)]
pub(super) struct MemoryHistory {
    events: Mutex<Vec<SubscriptionEvent>>,
}

impl MemoryHistory {
    pub(super) fn events(&self) -> Vec<SubscriptionEvent> {
        self.events.lock().expect("history mutex poisoned").clone()
    }
}

impl SubscriptionHistoryRepository for MemoryHistory {
    fn append(&self, event: SubscriptionEvent) -> Result<(), StoreError> {
        self.events
            .lock()
            .expect("history mutex poisoned")
            .push(event);
        Ok(())
    }

    fn for_provider(&self, id: ProviderId) -> Result<Vec<SubscriptionEvent>, StoreError> {
        let mut matching: Vec<SubscriptionEvent> = self
            .events
            .lock()
            .expect("history mutex poisoned")
            .iter()
            .filter(|event| event.provider_id == id)
            .cloned()
            .collect();
        matching.reverse();
        Ok(matching)
    }
}

#[derive(Default)]
pub(super) struct MemoryPlans {
    plans: Mutex<Vec<SubscriptionPlan>>,
}

impl MemoryPlans {
    pub(super) fn add(&self, plan: SubscriptionPlan) {
        self.plans.lock().expect("plan mutex poisoned").push(plan);
    }
}

impl PlanRepository for MemoryPlans {
    fn plan(&self, id: PlanId) -> Result<Option<SubscriptionPlan>, StoreError> {
        Ok(self
            .plans
            .lock()
            .expect("plan mutex poisoned")
            .iter()
            .find(|plan| plan.id == id)
            .cloned())
    }

    fn active_plans(&self) -> Result<Vec<SubscriptionPlan>, StoreError> {
        let mut active: Vec<SubscriptionPlan> = self
            .plans
            .lock()
            .expect("plan mutex poisoned")
            .iter()
            .filter(|plan| plan.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then(a.price.total_cmp(&b.price))
        });
        Ok(active)
    }
}

/// What the scripted processor should do on its next calls.
#[derive(Default)]
pub(super) struct ProcessorScript {
    pub(super) fail_checkout: bool,
    pub(super) fail_price_update: bool,
    pub(super) fail_listing: bool,
    pub(super) invoice_error: Option<InvoiceFailure>,
}

#[derive(Clone, Copy)]
pub(super) enum InvoiceFailure {
    AlreadyOpen,
    Transport,
}

/// In-memory stand-in for the billing processor that records every call so
/// tests can assert the reconciler's interaction pattern.
#[derive(Default)]
pub(super) struct ScriptedProcessor {
    script: Mutex<ProcessorScript>,
    subscriptions: Mutex<HashMap<String, ExternalSubscription>>,
    canceled: Mutex<Vec<String>>,
    customers_created: AtomicU64,
    customer_updates: AtomicU64,
    invoice_attempts: AtomicU64,
    session_sequence: AtomicU64,
}

impl ScriptedProcessor {
    pub(super) fn script(&self, script: ProcessorScript) {
        *self.script.lock().expect("script mutex poisoned") = script;
    }

    pub(super) fn seed_external(&self, subscription: ExternalSubscription) {
        self.subscriptions
            .lock()
            .expect("processor mutex poisoned")
            .insert(subscription.subscription_ref.clone(), subscription);
    }

    pub(super) fn canceled(&self) -> Vec<String> {
        self.canceled.lock().expect("processor mutex poisoned").clone()
    }

    pub(super) fn live_external(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .expect("processor mutex poisoned")
            .values()
            .filter(|sub| matches!(sub.status.as_str(), "active" | "trialing"))
            .map(|sub| sub.subscription_ref.clone())
            .collect()
    }

    pub(super) fn customers_created(&self) -> u64 {
        self.customers_created.load(Ordering::Relaxed)
    }

    pub(super) fn invoice_attempts(&self) -> u64 {
        self.invoice_attempts.load(Ordering::Relaxed)
    }
}

impl BillingProcessor for ScriptedProcessor {
    fn create_customer(&self, draft: &CustomerDraft) -> Result<String, ProcessorError> {
        let n = self.customers_created.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = draft;
        Ok(format!("cus_new_{n}"))
    }

    fn update_customer(
        &self,
        _customer_ref: &str,
        _draft: &CustomerDraft,
    ) -> Result<(), ProcessorError> {
        self.customer_updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProcessorError> {
        if self.script.lock().expect("script mutex poisoned").fail_checkout {
            return Err(ProcessorError::Transport("checkout api down".to_string()));
        }
        let n = self.session_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = request;
        Ok(CheckoutSession {
            id: format!("cs_{n}"),
            url: format!("https://billing.test/checkout/cs_{n}"),
        })
    }

    fn create_billing_portal_session(
        &self,
        customer_ref: &str,
        _return_url: &str,
    ) -> Result<String, ProcessorError> {
        Ok(format!("https://billing.test/portal/{customer_ref}"))
    }

    fn retrieve_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<ExternalSubscription, ProcessorError> {
        self.subscriptions
            .lock()
            .expect("processor mutex poisoned")
            .get(subscription_ref)
            .cloned()
            .ok_or_else(|| {
                ProcessorError::Rejected(format!("no such subscription {subscription_ref}"))
            })
    }

    fn update_subscription_price(
        &self,
        subscription_ref: &str,
        price_ref: &str,
        provider_id: ProviderId,
        plan_id: PlanId,
    ) -> Result<ExternalSubscription, ProcessorError> {
        if self
            .script
            .lock()
            .expect("script mutex poisoned")
            .fail_price_update
        {
            return Err(ProcessorError::Transport("price update failed".to_string()));
        }
        let mut subscriptions = self.subscriptions.lock().expect("processor mutex poisoned");
        let subscription = subscriptions.get_mut(subscription_ref).ok_or_else(|| {
            ProcessorError::Rejected(format!("no such subscription {subscription_ref}"))
        })?;
        let _ = price_ref;
        subscription.provider_id = Some(provider_id);
        subscription.plan_id = Some(plan_id);
        Ok(subscription.clone())
    }

    fn cancel_subscription(&self, subscription_ref: &str) -> Result<(), ProcessorError> {
        let mut subscriptions = self.subscriptions.lock().expect("processor mutex poisoned");
        if let Some(subscription) = subscriptions.get_mut(subscription_ref) {
            subscription.status = "canceled".to_string();
        }
        self.canceled
            .lock()
            .expect("processor mutex poisoned")
            .push(subscription_ref.to_string());
        Ok(())
    }

    fn subscriptions_for_customer(
        &self,
        customer_ref: &str,
    ) -> Result<Vec<ExternalSubscription>, ProcessorError> {
        if self.script.lock().expect("script mutex poisoned").fail_listing {
            return Err(ProcessorError::Transport("listing failed".to_string()));
        }
        Ok(self
            .subscriptions
            .lock()
            .expect("processor mutex poisoned")
            .values()
            .filter(|sub| sub.customer_ref == customer_ref)
            .cloned()
            .collect())
    }

    fn create_and_pay_invoice(
        &self,
        _customer_ref: &str,
        subscription_ref: &str,
    ) -> Result<InvoiceOutcome, ProcessorError> {
        self.invoice_attempts.fetch_add(1, Ordering::Relaxed);
        match self.script.lock().expect("script mutex poisoned").invoice_error {
            Some(InvoiceFailure::AlreadyOpen) => Err(ProcessorError::OpenInvoice),
            Some(InvoiceFailure::Transport) => {
                Err(ProcessorError::Transport("invoice api down".to_string()))
            }
            None => Ok(InvoiceOutcome {
                invoice_ref: format!("in_{subscription_ref}"),
                amount_due: 12.5,
                paid: true,
            }),
        }
    }

    fn parse_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookEvent, ProcessorError> {
        if signature != WEBHOOK_SECRET {
            return Err(ProcessorError::InvalidSignature);
        }

        #[derive(Deserialize)]
        struct RawEvent {
            #[serde(rename = "type")]
            kind: String,
            subscription: ExternalSubscription,
        }

        let raw: RawEvent = serde_json::from_slice(payload)
            .map_err(|err| ProcessorError::Rejected(err.to_string()))?;
        let kind = match raw.kind.as_str() {
            "customer.subscription.created" => WebhookEventKind::SubscriptionCreated,
            "customer.subscription.updated" => WebhookEventKind::SubscriptionUpdated,
            "customer.subscription.deleted" => WebhookEventKind::SubscriptionDeleted,
            other => WebhookEventKind::Unhandled(other.to_string()),
        };
        Ok(WebhookEvent {
            kind,
            subscription: raw.subscription,
        })
    }
}

pub(super) struct BillingHarness {
    pub(super) store: Arc<MemorySubscriptionStore>,
    pub(super) history: Arc<MemoryHistory>,
    pub(super) processor: Arc<ScriptedProcessor>,
    pub(super) reconciler: Arc<SubscriptionReconciler>,
}

pub(super) fn harness() -> BillingHarness {
    let store = Arc::new(MemorySubscriptionStore::default());
    let history = Arc::new(MemoryHistory::default());
    let plans = Arc::new(MemoryPlans::default());
    plans.add(silver());
    plans.add(gold());
    let processor = Arc::new(ScriptedProcessor::default());

    let reconciler = Arc::new(SubscriptionReconciler::new(
        store.clone(),
        history.clone(),
        plans.clone(),
        processor.clone(),
        CheckoutUrls {
            success_url: "https://app.test/provider/subscription?success=true".to_string(),
            cancel_url: "https://app.test/provider/subscription?canceled=true".to_string(),
            portal_return_url: "https://app.test/provider/dashboard".to_string(),
        },
    ));

    BillingHarness {
        store,
        history,
        processor,
        reconciler,
    }
}

pub(super) fn period(
    start_days_ago: i64,
    end_days_ahead: i64,
) -> (DateTime<Utc>, DateTime<Utc>, DateTime<Utc>) {
    let now = Utc::now();
    (
        now - Duration::days(start_days_ago),
        now + Duration::days(end_days_ahead),
        now,
    )
}
