//! Outbound notification contract.
//!
//! The core decides *that* an event happened and *what* it carries; delivery
//! (real-time push, SMS, persisted notification rows) is the sink's problem.

use crate::directory::ProviderId;
use serde::{Deserialize, Serialize};

/// Who an event is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "audience", content = "provider_id", rename_all = "snake_case")]
pub enum Audience {
    AllAdmins,
    Provider(ProviderId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    LeadSubmitted,
    LeadAssigned,
    LeadStatusChanged,
}

impl EventKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::LeadSubmitted => "lead_submitted",
            Self::LeadAssigned => "lead_assigned",
            Self::LeadStatusChanged => "lead_status_changed",
        }
    }
}

/// A typed event handed to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    pub kind: EventKind,
    pub audience: Audience,
    pub payload: serde_json::Value,
}

/// Delivery hook implemented by the hosting service (push, SMS, database
/// notifications). Failures are surfaced so callers can log them; they must
/// never change the outcome of the primary operation.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, event: OutboundEvent) -> Result<(), NotifyError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}
