//! Contract for the external recurring-billing processor.
//!
//! The wire format is opaque to the core: implementations translate these
//! calls into whatever API the processor of record exposes. Network timeouts
//! belong to the implementation and must fail closed via
//! [`ProcessorError::Timeout`] rather than hang.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::billing::domain::PlanId;
use crate::directory::ProviderId;

/// Customer details pushed to the processor when creating or refreshing the
/// customer record backing a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDraft {
    pub provider_id: ProviderId,
    pub email: String,
    pub name: String,
    pub address_line: Option<String>,
    pub postal_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub customer_ref: String,
    pub price_ref: String,
    pub trial_days: u32,
    pub provider_id: ProviderId,
    pub plan_id: PlanId,
    pub success_url: String,
    pub cancel_url: String,
}

/// Hosted-checkout handle returned to the caller for redirection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// Processor-side subscription state as reported by the API or a webhook.
/// `status` stays in the processor's vocabulary; mapping to the local enum
/// happens in the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalSubscription {
    pub subscription_ref: String,
    pub customer_ref: String,
    pub status: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub unit_amount: Option<f64>,
    pub provider_id: Option<ProviderId>,
    pub plan_id: Option<PlanId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceOutcome {
    pub invoice_ref: String,
    pub amount_due: f64,
    pub paid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventKind {
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    Unhandled(String),
}

/// A verified webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub kind: WebhookEventKind,
    pub subscription: ExternalSubscription,
}

pub trait BillingProcessor: Send + Sync {
    fn create_customer(&self, draft: &CustomerDraft) -> Result<String, ProcessorError>;
    fn update_customer(
        &self,
        customer_ref: &str,
        draft: &CustomerDraft,
    ) -> Result<(), ProcessorError>;
    fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProcessorError>;
    fn create_billing_portal_session(
        &self,
        customer_ref: &str,
        return_url: &str,
    ) -> Result<String, ProcessorError>;
    fn retrieve_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<ExternalSubscription, ProcessorError>;
    fn update_subscription_price(
        &self,
        subscription_ref: &str,
        price_ref: &str,
        provider_id: ProviderId,
        plan_id: PlanId,
    ) -> Result<ExternalSubscription, ProcessorError>;
    fn cancel_subscription(&self, subscription_ref: &str) -> Result<(), ProcessorError>;
    fn subscriptions_for_customer(
        &self,
        customer_ref: &str,
    ) -> Result<Vec<ExternalSubscription>, ProcessorError>;
    fn create_and_pay_invoice(
        &self,
        customer_ref: &str,
        subscription_ref: &str,
    ) -> Result<InvoiceOutcome, ProcessorError>;
    /// Verify a webhook signature and decode the delivery. Invalid
    /// signatures must be rejected before any payload inspection.
    fn parse_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookEvent, ProcessorError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("billing processor rejected the request: {0}")]
    Rejected(String),
    #[error("subscription already has an open invoice")]
    OpenInvoice,
    #[error("billing processor unreachable: {0}")]
    Transport(String),
    #[error("billing processor call timed out")]
    Timeout,
    #[error("webhook signature verification failed")]
    InvalidSignature,
}
