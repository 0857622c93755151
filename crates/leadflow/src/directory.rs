//! Locations, service providers, and the links between them.
//!
//! The directory is read-mostly reference data for the rest of the crate: the
//! assignment engine filters candidates out of it and the lifecycle
//! coordinator resolves names for audit text. Mutation (admin CRUD) lives
//! outside the core.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct LocationId(pub u64);

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ProviderId(pub u64);

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lead routing policy configured per location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentAlgorithm {
    RoundRobin,
    Geographic,
    LoadBalance,
    Manual,
}

impl AssignmentAlgorithm {
    /// Parse a stored algorithm value. Unknown or unset values fall back to
    /// round robin rather than failing the intake path.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "geographic" => Self::Geographic,
            "load_balance" => Self::LoadBalance,
            "manual" => Self::Manual,
            _ => Self::RoundRobin,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::Geographic => "geographic",
            Self::LoadBalance => "load_balance",
            Self::Manual => "manual",
        }
    }
}

impl Default for AssignmentAlgorithm {
    fn default() -> Self {
        Self::RoundRobin
    }
}

/// A geographic intake point leads are submitted against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    pub slug: String,
    pub assignment_algorithm: AssignmentAlgorithm,
}

/// A paying tenant that receives leads for the locations it is linked to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceProvider {
    pub id: ProviderId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub zip_code: Option<String>,
    pub is_active: bool,
}

/// Read-side storage abstraction for locations and providers.
///
/// `providers_for_location` must return candidates in ascending provider id
/// order; the round-robin policy depends on the ordering being stable across
/// calls.
pub trait DirectoryRepository: Send + Sync {
    fn location(&self, id: LocationId) -> Result<Option<Location>, DirectoryError>;
    fn location_by_slug(&self, slug: &str) -> Result<Option<Location>, DirectoryError>;
    fn provider(&self, id: ProviderId) -> Result<Option<ServiceProvider>, DirectoryError>;
    fn providers_for_location(
        &self,
        id: LocationId,
    ) -> Result<Vec<ServiceProvider>, DirectoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}
