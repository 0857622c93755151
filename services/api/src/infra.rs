//! In-memory infrastructure adapters for the service binary: repositories,
//! a settings store, a notification sink, and a simulated billing processor
//! for development and the demo command.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tracing::info;

use leadflow::billing::{
    BillingProcessor, CheckoutRequest, CheckoutSession, CheckoutUrls, CustomerDraft,
    ExternalSubscription, InvoiceOutcome, PlanId, PlanRepository, ProcessorError, StoreError,
    Subscription, SubscriptionEvent, SubscriptionHistoryRepository, SubscriptionPlan,
    SubscriptionReconciler, SubscriptionRepository, WebhookEvent, WebhookEventKind,
};
use leadflow::config::AppConfig;
use leadflow::directory::{
    DirectoryError, DirectoryRepository, Location, LocationId, ProviderId, ServiceProvider,
};
use leadflow::leads::{
    ActivityEntry, AssignmentEngine, AuditTrail, Lead, LeadFilter, LeadId, LeadLifecycle,
    LeadNote, LeadRepository, NewActivityEntry, NewLead, NewLeadNote, RepositoryError,
};
use leadflow::notify::{NotificationSink, NotifyError, OutboundEvent};
use leadflow::settings::{SettingRecord, SettingsError, SettingsStore};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Default)]
pub(crate) struct InMemoryDirectory {
    locations: Mutex<Vec<Location>>,
    providers: Mutex<Vec<ServiceProvider>>,
    links: Mutex<Vec<(LocationId, ProviderId)>>,
}

impl InMemoryDirectory {
    pub(crate) fn add_location(&self, location: Location) {
        self.locations
            .lock()
            .expect("directory mutex poisoned")
            .push(location);
    }

    pub(crate) fn add_provider(&self, provider: ServiceProvider) {
        self.providers
            .lock()
            .expect("directory mutex poisoned")
            .push(provider);
    }

    pub(crate) fn link(&self, location: LocationId, provider: ProviderId) {
        self.links
            .lock()
            .expect("directory mutex poisoned")
            .push((location, provider));
    }
}

impl DirectoryRepository for InMemoryDirectory {
    fn location(&self, id: LocationId) -> Result<Option<Location>, DirectoryError> {
        Ok(self
            .locations
            .lock()
            .expect("directory mutex poisoned")
            .iter()
            .find(|location| location.id == id)
            .cloned())
    }

    fn location_by_slug(&self, slug: &str) -> Result<Option<Location>, DirectoryError> {
        Ok(self
            .locations
            .lock()
            .expect("directory mutex poisoned")
            .iter()
            .find(|location| location.slug == slug)
            .cloned())
    }

    fn provider(&self, id: ProviderId) -> Result<Option<ServiceProvider>, DirectoryError> {
        Ok(self
            .providers
            .lock()
            .expect("directory mutex poisoned")
            .iter()
            .find(|provider| provider.id == id)
            .cloned())
    }

    fn providers_for_location(
        &self,
        id: LocationId,
    ) -> Result<Vec<ServiceProvider>, DirectoryError> {
        let links = self.links.lock().expect("directory mutex poisoned");
        let providers = self.providers.lock().expect("directory mutex poisoned");
        let mut linked: Vec<ServiceProvider> = providers
            .iter()
            .filter(|provider| {
                links
                    .iter()
                    .any(|(location, candidate)| *location == id && *candidate == provider.id)
            })
            .cloned()
            .collect();
        linked.sort_by_key(|provider| provider.id);
        Ok(linked)
    }
}

#[derive(Default)]
pub(crate) struct InMemoryLeads {
    rows: Mutex<Vec<Lead>>,
    sequence: AtomicU64,
}

impl LeadRepository for InMemoryLeads {
    fn insert(&self, lead: NewLead) -> Result<Lead, RepositoryError> {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let lead = Lead {
            id: LeadId(id),
            location_id: lead.location_id,
            provider_id: lead.provider_id,
            name: lead.name,
            phone: lead.phone,
            email: lead.email,
            zip_code: lead.zip_code,
            project_type: lead.project_type,
            timing: lead.timing,
            notes: lead.notes,
            status: lead.status,
            created_at: lead.created_at,
            updated_at: lead.created_at,
        };
        self.rows
            .lock()
            .expect("lead mutex poisoned")
            .push(lead.clone());
        Ok(lead)
    }

    fn update(&self, lead: &Lead) -> Result<(), RepositoryError> {
        let mut rows = self.rows.lock().expect("lead mutex poisoned");
        match rows.iter_mut().find(|row| row.id == lead.id) {
            Some(row) => {
                *row = lead.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn fetch(&self, id: LeadId) -> Result<Option<Lead>, RepositoryError> {
        Ok(self
            .rows
            .lock()
            .expect("lead mutex poisoned")
            .iter()
            .find(|row| row.id == id)
            .cloned())
    }

    fn list(&self, filter: &LeadFilter) -> Result<Vec<Lead>, RepositoryError> {
        let rows = self.rows.lock().expect("lead mutex poisoned");
        let mut matching: Vec<Lead> = rows
            .iter()
            .filter(|row| {
                filter
                    .location_id
                    .map_or(true, |location| row.location_id == location)
                    && filter
                        .provider_id
                        .map_or(true, |provider| row.provider_id == Some(provider))
                    && filter.status.map_or(true, |status| row.status == status)
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(matching)
    }

    fn last_assigned_provider(
        &self,
        location: LocationId,
        candidates: &[ProviderId],
    ) -> Result<Option<ProviderId>, RepositoryError> {
        let rows = self.rows.lock().expect("lead mutex poisoned");
        Ok(rows
            .iter()
            .filter(|row| {
                row.location_id == location
                    && row
                        .provider_id
                        .map_or(false, |provider| candidates.contains(&provider))
            })
            .max_by_key(|row| row.id)
            .and_then(|row| row.provider_id))
    }

    fn open_lead_count(&self, provider: ProviderId) -> Result<usize, RepositoryError> {
        let rows = self.rows.lock().expect("lead mutex poisoned");
        Ok(rows
            .iter()
            .filter(|row| row.provider_id == Some(provider) && row.status.is_open())
            .count())
    }
}

#[derive(Default)]
pub(crate) struct InMemoryAudit {
    notes: Mutex<Vec<LeadNote>>,
    activity: Mutex<Vec<ActivityEntry>>,
    sequence: AtomicU64,
}

impl AuditTrail for InMemoryAudit {
    fn append_note(&self, note: NewLeadNote) -> Result<LeadNote, RepositoryError> {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let note = LeadNote {
            id,
            lead_id: note.lead_id,
            author: note.author,
            kind: note.kind,
            body: note.body,
            metadata: note.metadata,
            created_at: note.created_at,
        };
        self.notes
            .lock()
            .expect("audit mutex poisoned")
            .push(note.clone());
        Ok(note)
    }

    fn note(&self, id: u64) -> Result<Option<LeadNote>, RepositoryError> {
        Ok(self
            .notes
            .lock()
            .expect("audit mutex poisoned")
            .iter()
            .find(|note| note.id == id)
            .cloned())
    }

    fn amend_note(&self, note: &LeadNote) -> Result<(), RepositoryError> {
        let mut notes = self.notes.lock().expect("audit mutex poisoned");
        match notes.iter_mut().find(|candidate| candidate.id == note.id) {
            Some(stored) => {
                *stored = note.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn notes_for(&self, lead: LeadId) -> Result<Vec<LeadNote>, RepositoryError> {
        Ok(self
            .notes
            .lock()
            .expect("audit mutex poisoned")
            .iter()
            .filter(|note| note.lead_id == lead)
            .cloned()
            .collect())
    }

    fn append_activity(
        &self,
        entry: NewActivityEntry,
    ) -> Result<ActivityEntry, RepositoryError> {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = ActivityEntry {
            id,
            lead_id: entry.lead_id,
            event_type: entry.event_type,
            actor: entry.actor,
            description: entry.description,
            metadata: entry.metadata,
            created_at: entry.created_at,
        };
        self.activity
            .lock()
            .expect("audit mutex poisoned")
            .push(entry.clone());
        Ok(entry)
    }

    fn activity_for(&self, lead: LeadId) -> Result<Vec<ActivityEntry>, RepositoryError> {
        Ok(self
            .activity
            .lock()
            .expect("audit mutex poisoned")
            .iter()
            .filter(|entry| entry.lead_id == lead)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct InMemorySubscriptions {
    rows: Mutex<HashMap<ProviderId, Subscription>>,
}

impl SubscriptionRepository for InMemorySubscriptions {
    fn for_provider(&self, id: ProviderId) -> Result<Option<Subscription>, StoreError> {
        Ok(self
            .rows
            .lock()
            .expect("subscription mutex poisoned")
            .get(&id)
            .cloned())
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
        self.rows
            .lock()
            .expect("subscription mutex poisoned")
            .insert(subscription.provider_id, subscription);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct InMemoryHistory {
    events: Mutex<Vec<SubscriptionEvent>>,
}

impl SubscriptionHistoryRepository for InMemoryHistory {
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
pub(crate) struct InMemoryPlans {
    plans: Mutex<Vec<SubscriptionPlan>>,
}

impl InMemoryPlans {
    pub(crate) fn add(&self, plan: SubscriptionPlan) {
        self.plans.lock().expect("plan mutex poisoned").push(plan);
    }
}

impl PlanRepository for InMemoryPlans {
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

#[derive(Default)]
pub(crate) struct InMemorySettings {
    records: Mutex<HashMap<String, SettingRecord>>,
}

impl SettingsStore for InMemorySettings {
    fn get(&self, key: &str) -> Result<Option<SettingRecord>, SettingsError> {
        Ok(self
            .records
            .lock()
            .expect("settings mutex poisoned")
            .get(key)
            .cloned())
    }

    fn set(&self, record: SettingRecord) -> Result<SettingRecord, SettingsError> {
        self.records
            .lock()
            .expect("settings mutex poisoned")
            .insert(record.key.clone(), record.clone());
        Ok(record)
    }

    fn by_group(&self, group: &str) -> Result<Vec<SettingRecord>, SettingsError> {
        Ok(self
            .records
            .lock()
            .expect("settings mutex poisoned")
            .values()
            .filter(|record| record.group == group)
            .cloned()
            .collect())
    }
}

/// Sink that hands events to the log stream. Real deployments plug in push,
/// SMS, and persisted-notification delivery here.
#[derive(Default)]
pub(crate) struct LoggingSink {
    delivered: AtomicU64,
}

impl LoggingSink {
    pub(crate) fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl NotificationSink for LoggingSink {
    fn deliver(&self, event: OutboundEvent) -> Result<(), NotifyError> {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        info!(
            kind = event.kind.label(),
            audience = ?event.audience,
            payload = %event.payload,
            "notification dispatched"
        );
        Ok(())
    }
}

struct PendingSession {
    customer_ref: String,
    provider_id: ProviderId,
    plan_id: PlanId,
    trial_days: u32,
}

#[derive(Default)]
struct ProcessorState {
    subscriptions: HashMap<String, ExternalSubscription>,
    sessions: HashMap<String, PendingSession>,
    customer_sequence: u64,
    session_sequence: u64,
    subscription_sequence: u64,
}

/// Simulated billing processor backing local development and the demo
/// command: hosted sessions complete via [`LocalBillingProcessor::complete_checkout`],
/// which returns the webhook event the real processor would deliver.
pub(crate) struct LocalBillingProcessor {
    secret: String,
    state: Mutex<ProcessorState>,
}

impl LocalBillingProcessor {
    pub(crate) fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            state: Mutex::new(ProcessorState::default()),
        }
    }

    /// Simulate the customer finishing the hosted checkout.
    pub(crate) fn complete_checkout(&self, session_id: &str) -> Option<WebhookEvent> {
        let mut state = self.state.lock().expect("processor mutex poisoned");
        let session = state.sessions.remove(session_id)?;

        state.subscription_sequence += 1;
        let now = Utc::now();
        let trialing = session.trial_days > 0;
        let subscription = ExternalSubscription {
            subscription_ref: format!("sub_local_{}", state.subscription_sequence),
            customer_ref: session.customer_ref,
            status: if trialing { "trialing" } else { "active" }.to_string(),
            current_period_start: Some(now),
            current_period_end: Some(now + Duration::days(30)),
            trial_end: trialing.then(|| now + Duration::days(i64::from(session.trial_days))),
            unit_amount: None,
            provider_id: Some(session.provider_id),
            plan_id: Some(session.plan_id),
        };
        state
            .subscriptions
            .insert(subscription.subscription_ref.clone(), subscription.clone());

        Some(WebhookEvent {
            kind: WebhookEventKind::SubscriptionCreated,
            subscription,
        })
    }
}

impl BillingProcessor for LocalBillingProcessor {
    fn create_customer(&self, _draft: &CustomerDraft) -> Result<String, ProcessorError> {
        let mut state = self.state.lock().expect("processor mutex poisoned");
        state.customer_sequence += 1;
        Ok(format!("cus_local_{}", state.customer_sequence))
    }

    fn update_customer(
        &self,
        _customer_ref: &str,
        _draft: &CustomerDraft,
    ) -> Result<(), ProcessorError> {
        Ok(())
    }

    fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProcessorError> {
        let mut state = self.state.lock().expect("processor mutex poisoned");
        state.session_sequence += 1;
        let id = format!("cs_local_{}", state.session_sequence);
        state.sessions.insert(
            id.clone(),
            PendingSession {
                customer_ref: request.customer_ref.clone(),
                provider_id: request.provider_id,
                plan_id: request.plan_id,
                trial_days: request.trial_days,
            },
        );
        Ok(CheckoutSession {
            url: format!("https://billing.localhost/checkout/{id}"),
            id,
        })
    }

    fn create_billing_portal_session(
        &self,
        customer_ref: &str,
        _return_url: &str,
    ) -> Result<String, ProcessorError> {
        Ok(format!("https://billing.localhost/portal/{customer_ref}"))
    }

    fn retrieve_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<ExternalSubscription, ProcessorError> {
        self.state
            .lock()
            .expect("processor mutex poisoned")
            .subscriptions
            .get(subscription_ref)
            .cloned()
            .ok_or_else(|| {
                ProcessorError::Rejected(format!("no such subscription {subscription_ref}"))
            })
    }

    fn update_subscription_price(
        &self,
        subscription_ref: &str,
        _price_ref: &str,
        provider_id: ProviderId,
        plan_id: PlanId,
    ) -> Result<ExternalSubscription, ProcessorError> {
        let mut state = self.state.lock().expect("processor mutex poisoned");
        let subscription = state
            .subscriptions
            .get_mut(subscription_ref)
            .ok_or_else(|| {
                ProcessorError::Rejected(format!("no such subscription {subscription_ref}"))
            })?;
        subscription.provider_id = Some(provider_id);
        subscription.plan_id = Some(plan_id);
        Ok(subscription.clone())
    }

    fn cancel_subscription(&self, subscription_ref: &str) -> Result<(), ProcessorError> {
        let mut state = self.state.lock().expect("processor mutex poisoned");
        if let Some(subscription) = state.subscriptions.get_mut(subscription_ref) {
            subscription.status = "canceled".to_string();
        }
        Ok(())
    }

    fn subscriptions_for_customer(
        &self,
        customer_ref: &str,
    ) -> Result<Vec<ExternalSubscription>, ProcessorError> {
        Ok(self
            .state
            .lock()
            .expect("processor mutex poisoned")
            .subscriptions
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
        Ok(InvoiceOutcome {
            invoice_ref: format!("in_local_{subscription_ref}"),
            amount_due: 0.0,
            paid: false,
        })
    }

    fn parse_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookEvent, ProcessorError> {
        if signature != self.secret {
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

/// Fully wired in-memory application graph.
pub(crate) struct Infra {
    pub(crate) directory: Arc<InMemoryDirectory>,
    pub(crate) leads: Arc<InMemoryLeads>,
    pub(crate) audit: Arc<InMemoryAudit>,
    pub(crate) subscriptions: Arc<InMemorySubscriptions>,
    pub(crate) history: Arc<InMemoryHistory>,
    pub(crate) plans: Arc<InMemoryPlans>,
    pub(crate) settings: Arc<InMemorySettings>,
    pub(crate) sink: Arc<LoggingSink>,
    pub(crate) processor: Arc<LocalBillingProcessor>,
    pub(crate) lifecycle: Arc<LeadLifecycle>,
    pub(crate) reconciler: Arc<SubscriptionReconciler>,
}

pub(crate) fn build_infra(config: &AppConfig) -> Infra {
    let directory = Arc::new(InMemoryDirectory::default());
    let leads = Arc::new(InMemoryLeads::default());
    let audit = Arc::new(InMemoryAudit::default());
    let subscriptions = Arc::new(InMemorySubscriptions::default());
    let history = Arc::new(InMemoryHistory::default());
    let plans = Arc::new(InMemoryPlans::default());
    let settings = Arc::new(InMemorySettings::default());
    let sink = Arc::new(LoggingSink::default());
    let secret = if config.billing.webhook_secret.is_empty() {
        "whsec_local".to_string()
    } else {
        config.billing.webhook_secret.clone()
    };
    let processor = Arc::new(LocalBillingProcessor::new(secret));

    let engine = AssignmentEngine::new(
        directory.clone(),
        subscriptions.clone(),
        leads.clone(),
    );
    let lifecycle = Arc::new(LeadLifecycle::new(
        leads.clone(),
        audit.clone(),
        directory.clone(),
        engine,
        sink.clone(),
        settings.clone(),
    ));
    let reconciler = Arc::new(SubscriptionReconciler::new(
        subscriptions.clone(),
        history.clone(),
        plans.clone(),
        processor.clone(),
        CheckoutUrls::from_config(&config.billing),
    ));

    Infra {
        directory,
        leads,
        audit,
        subscriptions,
        history,
        plans,
        settings,
        sink,
        processor,
        lifecycle,
        reconciler,
    }
}

/// Seed a small directory and plan catalog so every assignment policy can be
/// exercised out of the box.
pub(crate) fn seed_directory(infra: &Infra) {
    use leadflow::directory::AssignmentAlgorithm;

    let locations = [
        ("des-moines", AssignmentAlgorithm::RoundRobin),
        ("cedar-rapids", AssignmentAlgorithm::Geographic),
        ("iowa-city", AssignmentAlgorithm::LoadBalance),
        ("quad-cities", AssignmentAlgorithm::Manual),
    ];
    for (index, (slug, algorithm)) in locations.iter().enumerate() {
        let id = LocationId(index as u64 + 1);
        infra.directory.add_location(Location {
            id,
            name: slug
                .split('-')
                .map(|word| {
                    let mut chars = word.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                        None => String::new(),
                    }
                })
                .collect::<Vec<_>>()
                .join(" "),
            slug: (*slug).to_string(),
            assignment_algorithm: *algorithm,
        });
    }

    let providers = [
        (1, "Hawkeye Home Services", "50309"),
        (2, "Riverbend Contracting", "52401"),
        (3, "Prairie Plumbing Co", "52240"),
    ];
    for (id, name, zip) in providers {
        infra.directory.add_provider(ServiceProvider {
            id: ProviderId(id),
            name: name.to_string(),
            email: format!("ops@provider{id}.example.com"),
            phone: Some("555-0100".to_string()),
            address: Some(format!("{id} Main St")),
            zip_code: Some(zip.to_string()),
            is_active: true,
        });
        for (index, _) in locations.iter().enumerate() {
            infra.directory.link(LocationId(index as u64 + 1), ProviderId(id));
        }
    }

    infra.plans.add(SubscriptionPlan {
        id: PlanId(1),
        name: "Silver".to_string(),
        price_ref: "price_silver_monthly".to_string(),
        price: 49.0,
        interval: leadflow::billing::BillingInterval::Month,
        trial_days: 14,
        is_active: true,
        sort_order: 1,
    });
    infra.plans.add(SubscriptionPlan {
        id: PlanId(2),
        name: "Gold".to_string(),
        price_ref: "price_gold_monthly".to_string(),
        price: 99.0,
        interval: leadflow::billing::BillingInterval::Month,
        trial_days: 0,
        is_active: true,
        sort_order: 2,
    });
}

/// Run every seeded provider through checkout and simulate the processor
/// completing it, so the directory starts with eligible providers.
pub(crate) fn activate_seeded_providers(infra: &Infra) -> Result<(), leadflow::error::AppError> {
    let providers = infra
        .directory
        .providers_for_location(LocationId(1))
        .unwrap_or_default();
    for provider in providers {
        let session = infra.reconciler.checkout(&provider, PlanId(1))?;
        if let Some(event) = infra.processor.complete_checkout(&session.id) {
            infra.reconciler.apply_external_event(&event)?;
        }
    }
    Ok(())
}
