//! Provider selection for inbound leads.
//!
//! The engine is pure selection: it reads the directory, subscription
//! eligibility, and prior assignments, and returns a pick (or none). The
//! caller persists the lead and fires notifications. "No eligible provider"
//! is a normal `Ok(None)`, never an error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::billing::repository::{StoreError, SubscriptionRepository};
use crate::directory::{
    AssignmentAlgorithm, DirectoryError, DirectoryRepository, Location, ProviderId,
    ServiceProvider,
};
use crate::leads::domain::LeadSubmission;
use crate::leads::repository::{LeadRepository, RepositoryError};

pub struct AssignmentEngine {
    directory: Arc<dyn DirectoryRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    leads: Arc<dyn LeadRepository>,
}

impl AssignmentEngine {
    pub fn new(
        directory: Arc<dyn DirectoryRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        leads: Arc<dyn LeadRepository>,
    ) -> Self {
        Self {
            directory,
            subscriptions,
            leads,
        }
    }

    /// Pick a provider for a new lead at `location`, or `None` when no
    /// provider is eligible or the location routes manually.
    pub fn assign(
        &self,
        submission: &LeadSubmission,
        location: &Location,
        now: DateTime<Utc>,
    ) -> Result<Option<ProviderId>, AssignmentError> {
        let eligible = self.eligible_providers(location, now)?;
        if eligible.is_empty() {
            warn!(location = %location.id, "no eligible providers for location");
            return Ok(None);
        }

        match location.assignment_algorithm {
            AssignmentAlgorithm::RoundRobin => self.round_robin(location, &eligible).map(Some),
            AssignmentAlgorithm::Geographic => {
                self.geographic(submission, location, &eligible).map(Some)
            }
            AssignmentAlgorithm::LoadBalance => self.load_balance(&eligible).map(Some),
            AssignmentAlgorithm::Manual => Ok(None),
        }
    }

    /// Candidates linked to the location with an active account and an
    /// eligible subscription, in ascending provider id order. The ordering
    /// must be stable across calls: round robin walks it.
    pub fn eligible_providers(
        &self,
        location: &Location,
        now: DateTime<Utc>,
    ) -> Result<Vec<ServiceProvider>, AssignmentError> {
        let mut eligible = Vec::new();
        for provider in self.directory.providers_for_location(location.id)? {
            if !provider.is_active {
                continue;
            }
            let subscribed = self
                .subscriptions
                .for_provider(provider.id)?
                .map_or(false, |sub| sub.is_eligible(now));
            if subscribed {
                eligible.push(provider);
            }
        }
        eligible.sort_by_key(|provider| provider.id);
        Ok(eligible)
    }

    /// Next provider after the one that received the location's most recent
    /// lead, wrapping at the end of the list. First provider when nothing
    /// was assigned before or the previous pick is no longer eligible.
    fn round_robin(
        &self,
        location: &Location,
        eligible: &[ServiceProvider],
    ) -> Result<ProviderId, AssignmentError> {
        let ids: Vec<ProviderId> = eligible.iter().map(|provider| provider.id).collect();
        let last = self.leads.last_assigned_provider(location.id, &ids)?;

        let pick = match last.and_then(|id| ids.iter().position(|candidate| *candidate == id)) {
            Some(index) => ids[(index + 1) % ids.len()],
            None => ids[0],
        };
        Ok(pick)
    }

    /// Provider whose zip code is numerically nearest to the lead's. A crude
    /// proxy metric, not geodesic distance. Providers without a zip code are
    /// skipped; when none carries one the location degrades to round robin.
    fn geographic(
        &self,
        submission: &LeadSubmission,
        location: &Location,
        eligible: &[ServiceProvider],
    ) -> Result<ProviderId, AssignmentError> {
        let lead_zip = zip_value(&submission.zip_code);
        let mut nearest: Option<(u64, ProviderId)> = None;

        for provider in eligible {
            let Some(zip) = provider.zip_code.as_deref() else {
                continue;
            };
            let distance = lead_zip.abs_diff(zip_value(zip));
            if nearest.map_or(true, |(best, _)| distance < best) {
                nearest = Some((distance, provider.id));
            }
        }

        match nearest {
            Some((_, id)) => Ok(id),
            None => self.round_robin(location, eligible),
        }
    }

    /// Provider with the fewest open leads; first-encountered order breaks
    /// ties.
    fn load_balance(&self, eligible: &[ServiceProvider]) -> Result<ProviderId, AssignmentError> {
        let mut lightest: Option<(usize, ProviderId)> = None;
        for provider in eligible {
            let load = self.leads.open_lead_count(provider.id)?;
            if lightest.map_or(true, |(best, _)| load < best) {
                lightest = Some((load, provider.id));
            }
        }

        // eligible is non-empty by the time any policy runs
        lightest
            .map(|(_, id)| id)
            .ok_or_else(|| AssignmentError::Leads(RepositoryError::NotFound))
    }
}

/// Digit-only numeric value of a zip code, for the proxy distance metric.
fn zip_value(zip: &str) -> u64 {
    zip.chars()
        .filter(|c| c.is_ascii_digit())
        .fold(0u64, |acc, c| {
            acc.saturating_mul(10)
                .saturating_add(u64::from(c) - u64::from('0'))
        })
}

#[derive(Debug, thiserror::Error)]
pub enum AssignmentError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Leads(#[from] RepositoryError),
    #[error(transparent)]
    Subscriptions(#[from] StoreError),
}
