//! Lead mutation: intake, status transitions, and reassignment.
//!
//! The lead row is the source of truth. Audit notes, activity entries, and
//! notification dispatch are fire-and-forget side effects: their failures
//! are logged and swallowed, never rolled into the primary outcome.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::json;
use tracing::error;

use crate::directory::{DirectoryError, DirectoryRepository, LocationId, ProviderId};
use crate::leads::assignment::{AssignmentEngine, AssignmentError};
use crate::leads::domain::{
    ActivityEventType, Actor, ActorKind, Lead, LeadId, LeadNote, LeadStatus, LeadSubmission,
    NoteKind,
};
use crate::leads::repository::{
    AuditTrail, LeadRepository, NewActivityEntry, NewLead, NewLeadNote, RepositoryError,
};
use crate::notify::{Audience, EventKind, NotificationSink, OutboundEvent};
use crate::settings::{NotificationToggles, SettingsStore};

/// Per-location serialization for the round-robin read-then-decide sequence.
/// Two concurrent submissions for the same location take the same mutex, so
/// the second sees the first's insert.
#[derive(Default)]
struct LocationLocks {
    inner: Mutex<HashMap<LocationId, Arc<Mutex<()>>>>,
}

impl LocationLocks {
    fn for_location(&self, id: LocationId) -> Arc<Mutex<()>> {
        let mut guard = self.inner.lock().expect("location lock map poisoned");
        guard.entry(id).or_default().clone()
    }
}

pub struct LeadLifecycle {
    leads: Arc<dyn LeadRepository>,
    audit: Arc<dyn AuditTrail>,
    directory: Arc<dyn DirectoryRepository>,
    engine: AssignmentEngine,
    notifier: Arc<dyn NotificationSink>,
    settings: Arc<dyn SettingsStore>,
    locks: LocationLocks,
}

impl LeadLifecycle {
    pub fn new(
        leads: Arc<dyn LeadRepository>,
        audit: Arc<dyn AuditTrail>,
        directory: Arc<dyn DirectoryRepository>,
        engine: AssignmentEngine,
        notifier: Arc<dyn NotificationSink>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            leads,
            audit,
            directory,
            engine,
            notifier,
            settings,
            locks: LocationLocks::default(),
        }
    }

    /// Intake a public lead submission: resolve the location, run the
    /// assignment engine, persist, notify.
    pub fn submit(&self, submission: LeadSubmission) -> Result<Lead, LifecycleError> {
        let location = self
            .directory
            .location_by_slug(&submission.location_slug)?
            .ok_or_else(|| LifecycleError::UnknownLocation(submission.location_slug.clone()))?;

        let now = Utc::now();
        let lock = self.locks.for_location(location.id);

        let lead = {
            // Assignment and insert run under the location lock so the
            // round-robin read sees every previously inserted lead.
            let _guard = lock.lock().expect("location lock poisoned");
            let provider_id = self.engine.assign(&submission, &location, now)?;
            self.leads.insert(NewLead {
                location_id: location.id,
                provider_id,
                name: submission.name,
                phone: submission.phone,
                email: submission.email,
                zip_code: submission.zip_code,
                project_type: submission.project_type,
                timing: submission.timing,
                notes: submission.notes,
                status: LeadStatus::New,
                created_at: now,
            })?
        };

        let toggles = NotificationToggles::resolve(self.settings.as_ref());
        if toggles.broadcast_enabled {
            self.dispatch(OutboundEvent {
                kind: EventKind::LeadSubmitted,
                audience: Audience::AllAdmins,
                payload: json!({
                    "lead_id": lead.id,
                    "location_id": lead.location_id,
                    "provider_id": lead.provider_id,
                    "status": lead.status.label(),
                }),
            });
        }
        if let Some(provider_id) = lead.provider_id {
            self.dispatch(OutboundEvent {
                kind: EventKind::LeadAssigned,
                audience: Audience::Provider(provider_id),
                payload: json!({
                    "lead_id": lead.id,
                    "location_id": lead.location_id,
                    "sms": toggles.sms_enabled,
                }),
            });
        }

        Ok(lead)
    }

    /// Move a lead to `new_status`. Equal statuses are a silent no-op: no
    /// note, no activity entry, no event.
    pub fn change_status(
        &self,
        lead_id: LeadId,
        new_status: LeadStatus,
        actor: &Actor,
    ) -> Result<Lead, LifecycleError> {
        let mut lead = self
            .leads
            .fetch(lead_id)?
            .ok_or(LifecycleError::NotFound(lead_id))?;

        if lead.status == new_status {
            return Ok(lead);
        }

        let old_status = lead.status;
        lead.status = new_status;
        lead.updated_at = Utc::now();
        self.leads.update(&lead)?;

        let description = format!(
            "Status changed from {} to {}",
            old_status.label(),
            new_status.label()
        );
        self.record_note(NewLeadNote {
            lead_id,
            author: actor.clone(),
            kind: NoteKind::StatusChange,
            body: description.clone(),
            metadata: json!({
                "old_status": old_status.label(),
                "new_status": new_status.label(),
            }),
            created_at: lead.updated_at,
        });
        self.record_activity(NewActivityEntry {
            lead_id,
            event_type: ActivityEventType::StatusUpdated,
            actor: actor.clone(),
            description,
            metadata: json!({
                "old_status": old_status.label(),
                "new_status": new_status.label(),
            }),
            created_at: lead.updated_at,
        });

        let toggles = NotificationToggles::resolve(self.settings.as_ref());
        let payload = json!({
            "lead_id": lead.id,
            "old_status": old_status.label(),
            "new_status": new_status.label(),
            "updated_by": actor.kind.label(),
            "updated_by_name": actor.name.clone(),
        });
        if toggles.broadcast_enabled {
            self.dispatch(OutboundEvent {
                kind: EventKind::LeadStatusChanged,
                audience: Audience::AllAdmins,
                payload: payload.clone(),
            });
        }
        if let Some(provider_id) = lead.provider_id {
            self.dispatch(OutboundEvent {
                kind: EventKind::LeadStatusChanged,
                audience: Audience::Provider(provider_id),
                payload,
            });
        }

        Ok(lead)
    }

    /// Hand a lead to `new_provider`. Callers guard against handing a lead
    /// to the provider that already owns it; this function does not.
    pub fn reassign(
        &self,
        lead_id: LeadId,
        new_provider: ProviderId,
        actor: &Actor,
    ) -> Result<Lead, LifecycleError> {
        let mut lead = self
            .leads
            .fetch(lead_id)?
            .ok_or(LifecycleError::NotFound(lead_id))?;
        let provider = self
            .directory
            .provider(new_provider)?
            .ok_or(LifecycleError::UnknownProvider(new_provider))?;

        let old_provider_id = lead.provider_id;
        let old_provider_name = match old_provider_id {
            Some(id) => self.directory.provider(id)?.map(|p| p.name),
            None => None,
        };

        lead.provider_id = Some(new_provider);
        lead.updated_at = Utc::now();
        self.leads.update(&lead)?;

        let (event_type, description) = match &old_provider_name {
            Some(old_name) => (
                ActivityEventType::Reassigned,
                format!("Lead reassigned from {} to {}", old_name, provider.name),
            ),
            None => (
                ActivityEventType::Assigned,
                format!("Lead assigned to {}", provider.name),
            ),
        };

        self.record_note(NewLeadNote {
            lead_id,
            author: actor.clone(),
            kind: NoteKind::Assignment,
            body: description.clone(),
            metadata: json!({
                "old_provider_id": old_provider_id,
                "new_provider_id": new_provider,
            }),
            created_at: lead.updated_at,
        });
        self.record_activity(NewActivityEntry {
            lead_id,
            event_type,
            actor: actor.clone(),
            description,
            metadata: json!({
                "old_provider_id": old_provider_id,
                "new_provider_id": new_provider,
            }),
            created_at: lead.updated_at,
        });

        let toggles = NotificationToggles::resolve(self.settings.as_ref());
        self.dispatch(OutboundEvent {
            kind: EventKind::LeadAssigned,
            audience: Audience::Provider(new_provider),
            payload: json!({
                "lead_id": lead.id,
                "location_id": lead.location_id,
                "sms": toggles.sms_enabled,
            }),
        });
        if toggles.broadcast_enabled {
            self.dispatch(OutboundEvent {
                kind: EventKind::LeadAssigned,
                audience: Audience::AllAdmins,
                payload: json!({
                    "lead_id": lead.id,
                    "event": event_type.label(),
                    "provider_id": new_provider,
                }),
            });
        }

        Ok(lead)
    }

    /// Manual note from an admin or the owning provider.
    pub fn add_note(
        &self,
        lead_id: LeadId,
        actor: &Actor,
        body: String,
    ) -> Result<LeadNote, LifecycleError> {
        self.leads
            .fetch(lead_id)?
            .ok_or(LifecycleError::NotFound(lead_id))?;

        Ok(self.audit.append_note(NewLeadNote {
            lead_id,
            author: actor.clone(),
            kind: NoteKind::General,
            body,
            metadata: json!({}),
            created_at: Utc::now(),
        })?)
    }

    /// Amend a note body. Only the original author may amend; notes are
    /// otherwise immutable.
    pub fn amend_note(
        &self,
        note_id: u64,
        actor: &Actor,
        body: String,
    ) -> Result<LeadNote, LifecycleError> {
        let mut note = self
            .audit
            .note(note_id)?
            .ok_or(LifecycleError::NoteNotFound(note_id))?;

        if note.author.kind != actor.kind || note.author.id != actor.id {
            return Err(LifecycleError::Forbidden);
        }

        note.body = body;
        self.audit.amend_note(&note)?;
        Ok(note)
    }

    pub fn lead(&self, id: LeadId) -> Result<Option<Lead>, LifecycleError> {
        Ok(self.leads.fetch(id)?)
    }

    fn record_note(&self, note: NewLeadNote) {
        if let Err(err) = self.audit.append_note(note) {
            error!(%err, "failed to append lead note");
        }
    }

    fn record_activity(&self, entry: NewActivityEntry) {
        if let Err(err) = self.audit.append_activity(entry) {
            error!(%err, "failed to append activity entry");
        }
    }

    fn dispatch(&self, event: OutboundEvent) {
        if let Err(err) = self.notifier.deliver(event) {
            error!(%err, "notification dispatch failed");
        }
    }
}

/// Check used by the provider endpoints: a provider may only touch a lead it
/// owns.
pub fn owns_lead(lead: &Lead, actor: &Actor) -> bool {
    actor.kind == ActorKind::Provider && lead.provider_id == Some(ProviderId(actor.id))
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("unknown location '{0}'")]
    UnknownLocation(String),
    #[error("unknown provider {0}")]
    UnknownProvider(ProviderId),
    #[error("lead {0} not found")]
    NotFound(LeadId),
    #[error("note {0} not found")]
    NoteNotFound(u64),
    #[error("only the original author may amend a note")]
    Forbidden,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Assignment(#[from] AssignmentError),
}
