use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use leadflow::billing::{billing_router, BillingState};
use leadflow::leads::{lead_router, LeadState};
use leadflow::settings::{SettingRecord, SettingsStore};

use crate::infra::{AppState, Infra};

/// Assemble the full application router: lead and billing domains, typed
/// settings administration, and the operational endpoints.
pub(crate) fn app_router(infra: &Infra) -> axum::Router {
    let lead_state = Arc::new(LeadState {
        lifecycle: infra.lifecycle.clone(),
        leads: infra.leads.clone(),
        directory: infra.directory.clone(),
    });
    let billing_state = Arc::new(BillingState {
        reconciler: infra.reconciler.clone(),
        directory: infra.directory.clone(),
        plans: infra.plans.clone(),
    });

    lead_router(lead_state)
        .merge(billing_router(billing_state))
        .merge(settings_router(infra.settings.clone()))
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) fn settings_router(store: Arc<dyn SettingsStore>) -> axum::Router {
    axum::Router::new()
        .route(
            "/api/v1/admin/settings",
            axum::routing::get(list_settings).put(upsert_setting),
        )
        .with_state(store)
}

#[derive(Debug, Deserialize)]
pub(crate) struct GroupQuery {
    pub(crate) group: String,
}

pub(crate) async fn list_settings(
    State(store): State<Arc<dyn SettingsStore>>,
    Query(query): Query<GroupQuery>,
) -> impl IntoResponse {
    match store.by_group(&query.group) {
        Ok(records) => (StatusCode::OK, Json(json!({ "settings": records }))),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": err.to_string() })),
        ),
    }
}

pub(crate) async fn upsert_setting(
    State(store): State<Arc<dyn SettingsStore>>,
    Json(record): Json<SettingRecord>,
) -> impl IntoResponse {
    match store.set(record) {
        Ok(record) => (StatusCode::OK, Json(json!({ "setting": record }))),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": err.to_string() })),
        ),
    }
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
