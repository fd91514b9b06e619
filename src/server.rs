//! HTTP hooks called by the mail-receipt service.
//!
//! - `POST /hooks/admission`: synchronous admission check
//! - `POST /hooks/incoming-mail`: queue pipeline executions
//! - `GET /health`

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::admission::{AdmissionFilter, AdmissionResponse, Disposition};
use crate::error::TriggerError;
use crate::mail::event::{ReceiptEvent, parse_notifications};
use crate::pipeline::{PipelineContext, PipelineTrigger};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub admission: Arc<AdmissionFilter>,
    pub trigger: PipelineTrigger,
}

/// Build the Axum router with the receipt hooks.
pub fn hook_routes(admission: Arc<AdmissionFilter>, trigger: PipelineTrigger) -> Router {
    let state = AppState { admission, trigger };

    Router::new()
        .route("/health", get(health))
        .route("/hooks/admission", post(admission_hook))
        .route("/hooks/incoming-mail", post(incoming_mail_hook))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "email-catcher"
    }))
}

// ── Admission ───────────────────────────────────────────────────────────

/// Always answers 200; anything unparseable is a STOP.
async fn admission_hook(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let response = match serde_json::from_slice::<ReceiptEvent>(&body) {
        Ok(event) => state.admission.evaluate(&event).await,
        Err(e) => {
            warn!(error = %e, "Malformed receipt event, stopping receipt");
            AdmissionResponse::from(Disposition::Stop)
        }
    };
    Json(response)
}

// ── Incoming mail ───────────────────────────────────────────────────────

async fn incoming_mail_hook(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let notifications = match parse_notifications(&body) {
        Ok(notifications) => notifications,
        Err(e) => {
            warn!(error = %e, "Rejected incoming-mail notification");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            );
        }
    };

    // Reject the whole batch before queueing anything.
    if let Some(e) = notifications
        .iter()
        .find_map(|n| PipelineContext::try_from(n).err())
    {
        warn!(error = %e, "Rejected incoming-mail notification");
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": e.to_string() })),
        );
    }

    let mut execution_ids = Vec::with_capacity(notifications.len());
    for notification in &notifications {
        match state.trigger.submit(notification).await {
            Ok(id) => execution_ids.push(id),
            Err(e @ TriggerError::Rejected(_)) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": e.to_string() })),
                );
            }
            Err(e @ TriggerError::Closed) => {
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(serde_json::json!({ "error": e.to_string() })),
                );
            }
        }
    }

    info!(count = execution_ids.len(), "Pipeline executions queued");
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "execution_ids": execution_ids })),
    )
}
