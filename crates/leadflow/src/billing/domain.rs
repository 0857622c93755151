use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::directory::ProviderId;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PlanId(pub u64);

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Month,
    Year,
}

impl BillingInterval {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

/// A purchasable recurring plan. `price_ref` is the processor-side price
/// identifier; `price` is the display amount used for upgrade/downgrade
/// classification and audit metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub id: PlanId,
    pub name: String,
    pub price_ref: String,
    pub price: f64,
    pub interval: BillingInterval,
    pub trial_days: u32,
    pub is_active: bool,
    pub sort_order: u32,
}

/// Local subscription status vocabulary. External statuses map through
/// [`SubscriptionStatus::from_external`]; nothing outside that vocabulary is
/// ever stored verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Incomplete,
    Active,
    Trialing,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    /// Map a processor-reported status string. Unrecognized values collapse
    /// to `incomplete` so an unexpected vocabulary change on the processor
    /// side can never mark a provider eligible.
    pub fn from_external(value: &str) -> Self {
        match value {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "past_due" => Self::PastDue,
            "canceled" => Self::Canceled,
            "incomplete" => Self::Incomplete,
            _ => Self::Incomplete,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Incomplete => "incomplete",
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
        }
    }

    pub const fn is_live(self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }
}

/// Local mirror of the processor-side subscription state, one row per
/// provider. Mutated only by the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub provider_id: ProviderId,
    pub customer_ref: String,
    pub subscription_ref: Option<String>,
    pub status: SubscriptionStatus,
    pub plan_id: Option<PlanId>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub trial_ends_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Whether the provider may receive leads: an active subscription, or a
    /// trial that has not ended yet.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active
            || self.trial_ends_at.map_or(false, |ends| ends > now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionEventType {
    Created,
    Updated,
    Canceled,
    Upgraded,
    Downgraded,
}

impl SubscriptionEventType {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Canceled => "canceled",
            Self::Upgraded => "upgraded",
            Self::Downgraded => "downgraded",
        }
    }
}

/// Append-only reconciliation history row. Never read back for decisions;
/// kept for audit and analytics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    pub provider_id: ProviderId,
    pub plan_id: Option<PlanId>,
    pub subscription_ref: Option<String>,
    pub customer_ref: Option<String>,
    pub event_type: SubscriptionEventType,
    pub status: SubscriptionStatus,
    pub amount: Option<f64>,
    pub currency: String,
    pub description: String,
    pub metadata: serde_json::Value,
    pub event_date: DateTime<Utc>,
}
