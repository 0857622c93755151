//! Core library for the leadflow platform: multi-tenant lead distribution
//! and subscription billing.
//!
//! Inbound leads are captured per location, routed to subscribed service
//! providers by the assignment engine, and tracked through a status
//! lifecycle with an append-only audit trail. Provider billing state is a
//! local mirror of an external recurring-billing processor, kept in sync by
//! the subscription reconciler.

pub mod billing;
pub mod config;
pub mod directory;
pub mod error;
pub mod leads;
pub mod notify;
pub mod settings;
pub mod telemetry;
