use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::directory::{LocationId, ProviderId};
use crate::leads::domain::{
    ActivityEntry, ActivityEventType, Actor, Lead, LeadId, LeadNote, LeadStatus, NoteKind,
};

/// Insert payload for a lead; the repository assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLead {
    pub location_id: LocationId,
    pub provider_id: Option<ProviderId>,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub zip_code: String,
    pub project_type: String,
    pub timing: String,
    pub notes: Option<String>,
    pub status: LeadStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadFilter {
    pub location_id: Option<LocationId>,
    pub provider_id: Option<ProviderId>,
    pub status: Option<LeadStatus>,
}

/// Storage abstraction for leads. Leads are never hard-deleted.
pub trait LeadRepository: Send + Sync {
    fn insert(&self, lead: NewLead) -> Result<Lead, RepositoryError>;
    fn update(&self, lead: &Lead) -> Result<(), RepositoryError>;
    fn fetch(&self, id: LeadId) -> Result<Option<Lead>, RepositoryError>;
    /// Leads matching the filter, newest first.
    fn list(&self, filter: &LeadFilter) -> Result<Vec<Lead>, RepositoryError>;
    /// Provider of the most-recently-created lead at `location` whose
    /// provider is one of `candidates`. Feeds the round-robin policy.
    fn last_assigned_provider(
        &self,
        location: LocationId,
        candidates: &[ProviderId],
    ) -> Result<Option<ProviderId>, RepositoryError>;
    /// Number of leads currently open (`new` or `contacted`) for a provider.
    fn open_lead_count(&self, provider: ProviderId) -> Result<usize, RepositoryError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLeadNote {
    pub lead_id: LeadId,
    pub author: Actor,
    pub kind: NoteKind,
    pub body: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewActivityEntry {
    pub lead_id: LeadId,
    pub event_type: ActivityEventType,
    pub actor: Actor,
    pub description: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit trail attached to leads. Notes may only have their body
/// amended, and only by the original author; activity entries are immutable.
pub trait AuditTrail: Send + Sync {
    fn append_note(&self, note: NewLeadNote) -> Result<LeadNote, RepositoryError>;
    fn note(&self, id: u64) -> Result<Option<LeadNote>, RepositoryError>;
    fn amend_note(&self, note: &LeadNote) -> Result<(), RepositoryError>;
    fn notes_for(&self, lead: LeadId) -> Result<Vec<LeadNote>, RepositoryError>;
    fn append_activity(&self, entry: NewActivityEntry)
        -> Result<ActivityEntry, RepositoryError>;
    fn activity_for(&self, lead: LeadId) -> Result<Vec<ActivityEntry>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
