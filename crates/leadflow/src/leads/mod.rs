//! Lead intake, assignment, lifecycle, audit trail, and export.

pub mod assignment;
pub mod domain;
pub mod export;
pub mod lifecycle;
pub mod repository;
pub mod router;

#[cfg(test)]
mod tests;

pub use assignment::{AssignmentEngine, AssignmentError};
pub use domain::{
    ActivityEntry, ActivityEventType, Actor, ActorKind, Lead, LeadId, LeadNote, LeadStatus,
    LeadSubmission, NoteKind,
};
pub use export::{write_leads_csv, ExportError};
pub use lifecycle::{owns_lead, LeadLifecycle, LifecycleError};
pub use repository::{
    AuditTrail, LeadFilter, LeadRepository, NewActivityEntry, NewLead, NewLeadNote,
    RepositoryError,
};
pub use router::{lead_router, LeadState};
