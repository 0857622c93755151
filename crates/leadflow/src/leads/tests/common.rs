use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{Duration, Utc};
use serde_json::Value;

use crate::billing::domain::{PlanId, Subscription, SubscriptionStatus};
use crate::billing::repository::{StoreError, SubscriptionRepository};
use crate::directory::{
    AssignmentAlgorithm, DirectoryError, DirectoryRepository, Location, LocationId, ProviderId,
    ServiceProvider,
};
use crate::leads::assignment::AssignmentEngine;
use crate::leads::domain::{
    ActivityEntry, Actor, Lead, LeadId, LeadNote, LeadSubmission,
};
use crate::leads::lifecycle::LeadLifecycle;
use crate::leads::repository::{
    AuditTrail, LeadFilter, LeadRepository, NewActivityEntry, NewLead, NewLeadNote,
    RepositoryError,
};
use crate::notify::{NotificationSink, NotifyError, OutboundEvent};
use crate::settings::{SettingRecord, SettingsError, SettingsStore};

pub(super) fn location(id: u64, algorithm: AssignmentAlgorithm) -> Location {
    Location {
        id: LocationId(id),
        name: format!("Location {id}"),
        slug: format!("loc-{id}"),
        assignment_algorithm: algorithm,
    }
}

pub(super) fn provider(id: u64, zip: Option<&str>) -> ServiceProvider {
    ServiceProvider {
        id: ProviderId(id),
        name: format!("Provider {id}"),
        email: format!("provider{id}@example.com"),
        phone: Some("555-0100".to_string()),
        address: Some(format!("{id} Main St")),
        zip_code: zip.map(str::to_string),
        is_active: true,
    }
}

pub(super) fn active_subscription(provider: ProviderId) -> Subscription {
    Subscription {
        provider_id: provider,
        customer_ref: format!("cus_{}", provider.0),
        subscription_ref: Some(format!("sub_{}", provider.0)),
        status: SubscriptionStatus::Active,
        plan_id: Some(PlanId(1)),
        current_period_end: Some(Utc::now() + Duration::days(30)),
        trial_ends_at: None,
    }
}

pub(super) fn trialing_subscription(provider: ProviderId, days_left: i64) -> Subscription {
    let mut subscription = active_subscription(provider);
    subscription.status = SubscriptionStatus::Trialing;
    subscription.trial_ends_at = Some(Utc::now() + Duration::days(days_left));
    subscription
}

pub(super) fn submission(slug: &str, zip: &str) -> LeadSubmission {
    LeadSubmission {
        location_slug: slug.to_string(),
        name: "Dana Fields".to_string(),
        phone: "555-0142".to_string(),
        email: "dana@example.com".to_string(),
        zip_code: zip.to_string(),
        project_type: "Kitchen remodel".to_string(),
        timing: "Within a month".to_string(),
        notes: None,
    }
}

pub(super) fn admin() -> Actor {
    Actor::admin(1, "Admin One")
}

#[derive(Default)]
pub(super) struct MemoryDirectory {
    locations: Mutex<Vec<Location>>,
    providers: Mutex<Vec<ServiceProvider>>,
    links: Mutex<Vec<(LocationId, ProviderId)>>,
}

impl MemoryDirectory {
    pub(super) fn add_location(&self, location: Location) {
        self.locations
            .lock()
            .expect("directory mutex poisoned")
            .push(location);
    }

    pub(super) fn add_provider(&self, provider: ServiceProvider) {
        self.providers
            .lock()
            .expect("directory mutex poisoned")
            .push(provider);
    }

    pub(super) fn link(&self, location: LocationId, provider: ProviderId) {
        self.links
            .lock()
            .expect("directory mutex poisoned")
            .push((location, provider));
    }

    pub(super) fn deactivate(&self, provider: ProviderId) {
        let mut providers = self.providers.lock().expect("directory mutex poisoned");
        if let Some(entry) = providers.iter_mut().find(|p| p.id == provider) {
            entry.is_active = false;
        }
    }
}

impl DirectoryRepository for MemoryDirectory {
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
pub(super) struct MemoryLeads {
    rows: Mutex<Vec<Lead>>,
    sequence: AtomicU64,
}

impl LeadRepository for MemoryLeads {
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
pub(super) struct MemoryAudit {
    notes: Mutex<Vec<LeadNote>>,
    activity: Mutex<Vec<ActivityEntry>>,
    sequence: AtomicU64,
}

impl MemoryAudit {
    pub(super) fn notes(&self) -> Vec<LeadNote> {
        self.notes.lock().expect("audit mutex poisoned").clone()
    }

    pub(super) fn activity(&self) -> Vec<ActivityEntry> {
        self.activity.lock().expect("audit mutex poisoned").clone()
    }
}

impl AuditTrail for MemoryAudit {
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
pub(super) struct MemorySubscriptions {
    rows: Mutex<HashMap<ProviderId, Subscription>>,
}

impl MemorySubscriptions {
    pub(super) fn set(&self, subscription: Subscription) {
        self.rows
            .lock()
            .expect("subscription mutex poisoned")
            .insert(subscription.provider_id, subscription);
    }
}

impl SubscriptionRepository for MemorySubscriptions {
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
        self.set(subscription);
        Ok(())
    }
}

#[derive(Default)]
pub(super) struct RecordingSink {
    events: Mutex<Vec<OutboundEvent>>,
}

impl RecordingSink {
    pub(super) fn events(&self) -> Vec<OutboundEvent> {
        self.events.lock().expect("sink mutex poisoned").clone()
    }
}

impl NotificationSink for RecordingSink {
    fn deliver(&self, event: OutboundEvent) -> Result<(), NotifyError> {
        self.events
            .lock()
            .expect("sink mutex poisoned")
            .push(event);
        Ok(())
    }
}

pub(super) struct FailingSink;

impl NotificationSink for FailingSink {
    fn deliver(&self, _event: OutboundEvent) -> Result<(), NotifyError> {
        Err(NotifyError::Transport("push gateway offline".to_string()))
    }
}

#[derive(Default)]
pub(super) struct MemorySettings {
    records: Mutex<HashMap<String, SettingRecord>>,
}

impl SettingsStore for MemorySettings {
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

pub(super) struct Harness {
    pub(super) directory: Arc<MemoryDirectory>,
    pub(super) leads: Arc<MemoryLeads>,
    pub(super) audit: Arc<MemoryAudit>,
    pub(super) subscriptions: Arc<MemorySubscriptions>,
    pub(super) sink: Arc<RecordingSink>,
    pub(super) settings: Arc<MemorySettings>,
    pub(super) lifecycle: Arc<LeadLifecycle>,
}

pub(super) fn harness() -> Harness {
    let directory = Arc::new(MemoryDirectory::default());
    let leads = Arc::new(MemoryLeads::default());
    let audit = Arc::new(MemoryAudit::default());
    let subscriptions = Arc::new(MemorySubscriptions::default());
    let sink = Arc::new(RecordingSink::default());
    let settings = Arc::new(MemorySettings::default());

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

    Harness {
        directory,
        leads,
        audit,
        subscriptions,
        sink,
        settings,
        lifecycle,
    }
}

impl Harness {
    /// Seed a location with eligible providers: linked, active, subscribed.
    pub(super) fn seed_eligible(
        &self,
        location: &Location,
        providers: &[ServiceProvider],
    ) {
        self.directory.add_location(location.clone());
        for provider in providers {
            self.directory.add_provider(provider.clone());
            self.directory.link(location.id, provider.id);
            self.subscriptions.set(active_subscription(provider.id));
        }
    }

    pub(super) fn engine(&self) -> AssignmentEngine {
        AssignmentEngine::new(
            self.directory.clone(),
            self.subscriptions.clone(),
            self.leads.clone(),
        )
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
