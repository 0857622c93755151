use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::directory::{LocationId, ProviderId};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct LeadId(pub u64);

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lead lifecycle status. Forward-only in the UI, but an operator may set
/// any of the three values; anything outside the vocabulary is rejected at
/// the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    Closed,
}

impl LeadStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "contacted" => Some(Self::Contacted),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Contacted => "contacted",
            Self::Closed => "closed",
        }
    }

    /// Statuses that count toward a provider's open workload.
    pub const fn is_open(self) -> bool {
        matches!(self, Self::New | Self::Contacted)
    }
}

/// A captured sales inquiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
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
    pub updated_at: DateTime<Utc>,
}

/// Public intake payload. The location arrives as a slug; everything else is
/// contact and project detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadSubmission {
    pub location_slug: String,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub zip_code: String,
    pub project_type: String,
    pub timing: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Admin,
    Provider,
}

impl ActorKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Provider => "provider",
        }
    }
}

/// Who performed a mutation: an admin user or a provider. Identity arrives
/// pre-resolved from the caller's authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub kind: ActorKind,
    pub id: u64,
    pub name: String,
}

impl Actor {
    pub fn admin(id: u64, name: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::Admin,
            id,
            name: name.into(),
        }
    }

    pub fn provider(id: u64, name: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::Provider,
            id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    StatusChange,
    Assignment,
    General,
}

impl NoteKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::StatusChange => "status_change",
            Self::Assignment => "assignment",
            Self::General => "general",
        }
    }
}

/// A note on a lead. Immutable once written except that the original author
/// may amend the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadNote {
    pub id: u64,
    pub lead_id: LeadId,
    pub author: Actor,
    pub kind: NoteKind,
    pub body: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityEventType {
    StatusUpdated,
    Assigned,
    Reassigned,
}

impl ActivityEventType {
    pub const fn label(self) -> &'static str {
        match self {
            Self::StatusUpdated => "status_updated",
            Self::Assigned => "assigned",
            Self::Reassigned => "reassigned",
        }
    }
}

/// Append-only audit record for a lead mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: u64,
    pub lead_id: LeadId,
    pub event_type: ActivityEventType,
    pub actor: Actor,
    pub description: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
