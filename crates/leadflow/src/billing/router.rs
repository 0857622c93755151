use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::billing::domain::{PlanId, SubscriptionStatus};
use crate::billing::reconciler::{ReconcileError, SubscriptionReconciler};
use crate::billing::repository::PlanRepository;
use crate::directory::{DirectoryRepository, ProviderId, ServiceProvider};

/// Shared state for the billing endpoints.
pub struct BillingState {
    pub reconciler: Arc<SubscriptionReconciler>,
    pub directory: Arc<dyn DirectoryRepository>,
    pub plans: Arc<dyn PlanRepository>,
}

/// Router builder exposing plan listing, checkout, plan changes, status,
/// history, portal, and the processor webhook.
pub fn billing_router(state: Arc<BillingState>) -> Router {
    Router::new()
        .route("/api/v1/billing/plans", get(plans_handler))
        .route("/api/v1/provider/billing/checkout", post(checkout_handler))
        .route("/api/v1/provider/billing/plan", post(change_plan_handler))
        .route("/api/v1/provider/billing/status", get(status_handler))
        .route("/api/v1/provider/billing/history", get(history_handler))
        .route("/api/v1/provider/billing/portal", post(portal_handler))
        .route("/api/v1/billing/webhook", post(webhook_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub(crate) struct PlanChangeRequest {
    pub(crate) provider_id: u64,
    pub(crate) plan_id: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProviderQuery {
    pub(crate) provider_id: u64,
}

pub(crate) async fn plans_handler(State(state): State<Arc<BillingState>>) -> Response {
    match state.plans.active_plans() {
        Ok(plans) => (StatusCode::OK, axum::Json(plans)).into_response(),
        Err(err) => internal_error(err.to_string()),
    }
}

pub(crate) async fn checkout_handler(
    State(state): State<Arc<BillingState>>,
    axum::Json(request): axum::Json<PlanChangeRequest>,
) -> Response {
    let provider = match load_provider(&state, ProviderId(request.provider_id)) {
        Ok(provider) => provider,
        Err(response) => return response,
    };

    match state
        .reconciler
        .checkout(&provider, PlanId(request.plan_id))
    {
        Ok(session) => (
            StatusCode::OK,
            axum::Json(json!({
                "checkout_url": session.url,
                "checkout_session_id": session.id,
            })),
        )
            .into_response(),
        Err(err) => reconcile_error_response(err),
    }
}

pub(crate) async fn change_plan_handler(
    State(state): State<Arc<BillingState>>,
    axum::Json(request): axum::Json<PlanChangeRequest>,
) -> Response {
    let provider = match load_provider(&state, ProviderId(request.provider_id)) {
        Ok(provider) => provider,
        Err(response) => return response,
    };

    match state
        .reconciler
        .change_plan(&provider, PlanId(request.plan_id), Utc::now())
    {
        Ok(subscription) => (
            StatusCode::OK,
            axum::Json(json!({
                "message": "plan changed",
                "subscription": subscription,
            })),
        )
            .into_response(),
        Err(err) => reconcile_error_response(err),
    }
}

pub(crate) async fn status_handler(
    State(state): State<Arc<BillingState>>,
    Query(query): Query<ProviderQuery>,
) -> Response {
    match state.reconciler.refresh(ProviderId(query.provider_id)) {
        Ok(subscription) => {
            let now = Utc::now();
            let has_active = subscription
                .as_ref()
                .map(|sub| sub.status == SubscriptionStatus::Active)
                .unwrap_or(false);
            let eligible = subscription
                .as_ref()
                .map(|sub| sub.is_eligible(now))
                .unwrap_or(false);
            (
                StatusCode::OK,
                axum::Json(json!({
                    "has_active_subscription": has_active,
                    "eligible": eligible,
                    "subscription": subscription,
                })),
            )
                .into_response()
        }
        Err(err) => reconcile_error_response(err),
    }
}

pub(crate) async fn history_handler(
    State(state): State<Arc<BillingState>>,
    Query(query): Query<ProviderQuery>,
) -> Response {
    match state.reconciler.history_for(ProviderId(query.provider_id)) {
        Ok(events) => (StatusCode::OK, axum::Json(events)).into_response(),
        Err(err) => reconcile_error_response(err),
    }
}

pub(crate) async fn portal_handler(
    State(state): State<Arc<BillingState>>,
    axum::Json(query): axum::Json<ProviderQuery>,
) -> Response {
    match state.reconciler.portal_session(ProviderId(query.provider_id)) {
        Ok(url) => (StatusCode::OK, axum::Json(json!({ "portal_url": url }))).into_response(),
        Err(err) => reconcile_error_response(err),
    }
}

/// Webhook entry point. Signature failures are rejected with 400; once the
/// delivery is verified the endpoint always acknowledges with 200 so the
/// processor never enters a retry storm — reconciliation failures are logged
/// for operator follow-up.
pub(crate) async fn webhook_handler(
    State(state): State<Arc<BillingState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get("billing-signature")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let event = match state.reconciler.parse_webhook(&body, signature) {
        Ok(event) => event,
        Err(err) => {
            error!(%err, "rejected billing webhook");
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(json!({ "error": "invalid signature" })),
            )
                .into_response();
        }
    };

    if let Err(err) = state.reconciler.apply_external_event(&event) {
        error!(%err, "webhook reconciliation failed");
    }

    (StatusCode::OK, axum::Json(json!({ "received": true }))).into_response()
}

fn load_provider(
    state: &BillingState,
    id: ProviderId,
) -> Result<ServiceProvider, Response> {
    match state.directory.provider(id) {
        Ok(Some(provider)) => Ok(provider),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            axum::Json(json!({ "error": format!("unknown provider {id}") })),
        )
            .into_response()),
        Err(err) => Err(internal_error(err.to_string())),
    }
}

fn reconcile_error_response(err: ReconcileError) -> Response {
    let status = match &err {
        ReconcileError::UnknownPlan(_) | ReconcileError::NoSubscription(_) => {
            StatusCode::NOT_FOUND
        }
        ReconcileError::AlreadySubscribed(_) => StatusCode::CONFLICT,
        ReconcileError::Processor(_) | ReconcileError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, axum::Json(json!({ "error": err.to_string() }))).into_response()
}

fn internal_error(message: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        axum::Json(json!({ "error": message })),
    )
        .into_response()
}
