use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::directory::{DirectoryRepository, LocationId, ProviderId};
use crate::leads::domain::{Actor, ActorKind, LeadId, LeadStatus, LeadSubmission};
use crate::leads::export::write_leads_csv;
use crate::leads::lifecycle::{owns_lead, LeadLifecycle, LifecycleError};
use crate::leads::repository::{LeadFilter, LeadRepository};

/// Shared state for the lead endpoints.
pub struct LeadState {
    pub lifecycle: Arc<LeadLifecycle>,
    pub leads: Arc<dyn LeadRepository>,
    pub directory: Arc<dyn DirectoryRepository>,
}

/// Router builder exposing intake, admin mutation, provider status updates,
/// notes, and the CSV export.
pub fn lead_router(state: Arc<LeadState>) -> Router {
    Router::new()
        .route("/api/v1/leads", post(submit_handler))
        .route("/api/v1/admin/leads/:lead_id", patch(admin_update_handler))
        .route(
            "/api/v1/admin/leads/:lead_id/reassign",
            post(reassign_handler),
        )
        .route("/api/v1/admin/leads/:lead_id/notes", post(add_note_handler))
        .route("/api/v1/admin/notes/:note_id", patch(amend_note_handler))
        .route("/api/v1/admin/leads/export", get(export_handler))
        .route(
            "/api/v1/provider/leads/:lead_id/status",
            patch(provider_status_handler),
        )
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub(crate) struct AdminLeadUpdate {
    #[serde(default)]
    pub(crate) status: Option<String>,
    #[serde(default)]
    pub(crate) provider_id: Option<u64>,
    pub(crate) actor: Actor,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReassignRequest {
    pub(crate) provider_id: u64,
    pub(crate) actor: Actor,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusUpdateRequest {
    pub(crate) status: String,
    pub(crate) actor: Actor,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NoteRequest {
    pub(crate) body: String,
    pub(crate) actor: Actor,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExportQuery {
    #[serde(default)]
    pub(crate) location_id: Option<u64>,
    #[serde(default)]
    pub(crate) provider_id: Option<u64>,
    #[serde(default)]
    pub(crate) status: Option<String>,
}

pub(crate) async fn submit_handler(
    State(state): State<Arc<LeadState>>,
    axum::Json(submission): axum::Json<LeadSubmission>,
) -> Response {
    match state.lifecycle.submit(submission) {
        Ok(lead) => (
            StatusCode::CREATED,
            axum::Json(json!({
                "message": "Lead submitted successfully",
                "lead": lead,
            })),
        )
            .into_response(),
        Err(err) => lifecycle_error_response(err),
    }
}

/// Admin PATCH covering status and/or provider in one call. The caller-side
/// no-op guards live here: unchanged values are skipped without touching the
/// lifecycle service.
pub(crate) async fn admin_update_handler(
    State(state): State<Arc<LeadState>>,
    Path(lead_id): Path<u64>,
    axum::Json(update): axum::Json<AdminLeadUpdate>,
) -> Response {
    let lead_id = LeadId(lead_id);
    let mut lead = match state.lifecycle.lead(lead_id) {
        Ok(Some(lead)) => lead,
        Ok(None) => return not_found(format!("lead {lead_id} not found")),
        Err(err) => return lifecycle_error_response(err),
    };

    if let Some(raw) = &update.status {
        let Some(status) = LeadStatus::parse(raw) else {
            return unprocessable(format!("invalid status '{raw}'"));
        };
        if status != lead.status {
            lead = match state.lifecycle.change_status(lead_id, status, &update.actor) {
                Ok(lead) => lead,
                Err(err) => return lifecycle_error_response(err),
            };
        }
    }

    if let Some(provider_id) = update.provider_id {
        let provider_id = ProviderId(provider_id);
        if lead.provider_id != Some(provider_id) {
            lead = match state.lifecycle.reassign(lead_id, provider_id, &update.actor) {
                Ok(lead) => lead,
                Err(err) => return lifecycle_error_response(err),
            };
        }
    }

    (StatusCode::OK, axum::Json(lead)).into_response()
}

pub(crate) async fn reassign_handler(
    State(state): State<Arc<LeadState>>,
    Path(lead_id): Path<u64>,
    axum::Json(request): axum::Json<ReassignRequest>,
) -> Response {
    match state.lifecycle.reassign(
        LeadId(lead_id),
        ProviderId(request.provider_id),
        &request.actor,
    ) {
        Ok(lead) => (StatusCode::OK, axum::Json(lead)).into_response(),
        Err(err) => lifecycle_error_response(err),
    }
}

pub(crate) async fn add_note_handler(
    State(state): State<Arc<LeadState>>,
    Path(lead_id): Path<u64>,
    axum::Json(request): axum::Json<NoteRequest>,
) -> Response {
    match state
        .lifecycle
        .add_note(LeadId(lead_id), &request.actor, request.body)
    {
        Ok(note) => (StatusCode::CREATED, axum::Json(note)).into_response(),
        Err(err) => lifecycle_error_response(err),
    }
}

pub(crate) async fn amend_note_handler(
    State(state): State<Arc<LeadState>>,
    Path(note_id): Path<u64>,
    axum::Json(request): axum::Json<NoteRequest>,
) -> Response {
    match state
        .lifecycle
        .amend_note(note_id, &request.actor, request.body)
    {
        Ok(note) => (StatusCode::OK, axum::Json(note)).into_response(),
        Err(err) => lifecycle_error_response(err),
    }
}

pub(crate) async fn export_handler(
    State(state): State<Arc<LeadState>>,
    Query(query): Query<ExportQuery>,
) -> Response {
    let status = match query.status.as_deref() {
        Some(raw) => match LeadStatus::parse(raw) {
            Some(status) => Some(status),
            None => return unprocessable(format!("invalid status '{raw}'")),
        },
        None => None,
    };

    let filter = LeadFilter {
        location_id: query.location_id.map(LocationId),
        provider_id: query.provider_id.map(ProviderId),
        status,
    };

    let leads = match state.leads.list(&filter) {
        Ok(leads) => leads,
        Err(err) => return internal_error(err.to_string()),
    };

    let mut body = Vec::new();
    if let Err(err) = write_leads_csv(&mut body, &leads, state.directory.as_ref()) {
        return internal_error(err.to_string());
    }

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"leads.csv\"",
            ),
        ],
        body,
    )
        .into_response()
}

/// Provider-facing status update: the actor must be a provider and must own
/// the lead.
pub(crate) async fn provider_status_handler(
    State(state): State<Arc<LeadState>>,
    Path(lead_id): Path<u64>,
    axum::Json(request): axum::Json<StatusUpdateRequest>,
) -> Response {
    let Some(status) = LeadStatus::parse(&request.status) else {
        return unprocessable(format!("invalid status '{}'", request.status));
    };
    if request.actor.kind != ActorKind::Provider {
        return forbidden();
    }

    let lead_id = LeadId(lead_id);
    let lead = match state.lifecycle.lead(lead_id) {
        Ok(Some(lead)) => lead,
        Ok(None) => return not_found(format!("lead {lead_id} not found")),
        Err(err) => return lifecycle_error_response(err),
    };
    if !owns_lead(&lead, &request.actor) {
        return forbidden();
    }

    match state.lifecycle.change_status(lead_id, status, &request.actor) {
        Ok(lead) => (StatusCode::OK, axum::Json(lead)).into_response(),
        Err(err) => lifecycle_error_response(err),
    }
}

fn lifecycle_error_response(err: LifecycleError) -> Response {
    let status = match &err {
        LifecycleError::UnknownLocation(_)
        | LifecycleError::UnknownProvider(_)
        | LifecycleError::NotFound(_)
        | LifecycleError::NoteNotFound(_) => StatusCode::NOT_FOUND,
        LifecycleError::Forbidden => StatusCode::FORBIDDEN,
        LifecycleError::Repository(_)
        | LifecycleError::Directory(_)
        | LifecycleError::Assignment(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, axum::Json(json!({ "error": err.to_string() }))).into_response()
}

fn not_found(message: String) -> Response {
    (
        StatusCode::NOT_FOUND,
        axum::Json(json!({ "error": message })),
    )
        .into_response()
}

fn unprocessable(message: String) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        axum::Json(json!({ "error": message })),
    )
        .into_response()
}

fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        axum::Json(json!({ "error": "forbidden" })),
    )
        .into_response()
}

fn internal_error(message: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        axum::Json(json!({ "error": message })),
    )
        .into_response()
}
