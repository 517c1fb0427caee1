//! JSON API over the event registry.
//!
//! | method | path | |
//! |--------|------|-|
//! | POST | `/events` | register `{eventId, status}` |
//! | PUT | `/events/:event_id/status` | change status `{status}` |
//! | GET | `/events/:event_id` | stored state |
//! | GET | `/health` | outbox counts and running jobs |

use crate::{EventRegistry, RegistryError};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use score_relay_database::{Event, EventStatus};
use score_relay_outbox::OutboxEngine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

const INVALID_STATUS: &str = "Invalid status. Allowed values are: LIVE, NOT_LIVE";
const MISSING_STATUS: &str = "Status cannot be null. Allowed values are: LIVE, NOT_LIVE";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<EventRegistry>,
    pub engine: Arc<OutboxEngine>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/events", post(create_event))
        .route("/events/:event_id", get(get_event))
        .route("/events/:event_id/status", put(update_event_status))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateEventRequest {
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateStatusRequest {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventResponse {
    event_id: String,
    status: EventStatus,
}

impl From<Event> for EventResponse {
    fn from(event: Event) -> Self {
        Self {
            event_id: event.event_id,
            status: event.status,
        }
    }
}

async fn create_event(
    State(state): State<AppState>,
    Json(request): Json<CreateEventRequest>,
) -> Response {
    let status = match parse_status(request.status.as_deref()) {
        Ok(status) => status,
        Err(response) => return response,
    };
    let event_id = request.event_id.unwrap_or_default();

    match state.registry.add_event(&event_id, status).await {
        Ok(event) => Json(EventResponse::from(event)).into_response(),
        Err(e) => registry_error_to_response(e),
    }
}

async fn update_event_status(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Json(request): Json<UpdateStatusRequest>,
) -> Response {
    let status = match parse_status(request.status.as_deref()) {
        Ok(status) => status,
        Err(response) => return response,
    };

    match state.registry.update_status(&event_id, status).await {
        Ok(_) => Json(json!({ "message": "Event status updated successfully" })).into_response(),
        Err(e) => registry_error_to_response(e),
    }
}

async fn get_event(State(state): State<AppState>, Path(event_id): Path<String>) -> Response {
    match state.registry.find_by_id(&event_id).await {
        Ok(Some(event)) => Json(EventResponse::from(event)).into_response(),
        Ok(None) => registry_error_to_response(RegistryError::NotFound(event_id)),
        Err(e) => registry_error_to_response(e),
    }
}

async fn health(State(state): State<AppState>) -> Response {
    let counts = match state.engine.status_counts().await {
        Ok(counts) => counts,
        Err(e) => {
            error!(error = %e, "Health check could not read the outbox");
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                e.to_string(),
            );
        }
    };

    Json(json!({
        "status": "ok",
        "runningJobs": state.registry.scheduler().running_jobs().len(),
        "outbox": {
            "pending": counts.pending,
            "sent": counts.sent,
            "failed": counts.failed,
            "permanentlyFailed": counts.permanently_failed,
        },
    }))
    .into_response()
}

fn parse_status(raw: Option<&str>) -> Result<EventStatus, Response> {
    let raw = raw.ok_or_else(|| json_error(StatusCode::BAD_REQUEST, "invalid_status", MISSING_STATUS))?;
    EventStatus::parse(raw)
        .ok_or_else(|| json_error(StatusCode::BAD_REQUEST, "invalid_status", INVALID_STATUS))
}

fn registry_error_to_response(err: RegistryError) -> Response {
    match err {
        RegistryError::InvalidEventId => {
            json_error(StatusCode::BAD_REQUEST, "invalid_event_id", err.to_string())
        }
        RegistryError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        RegistryError::AlreadyExists(_) => {
            json_error(StatusCode::CONFLICT, "already_exists", err.to_string())
        }
        RegistryError::Database(e) => {
            error!(error = %e, "Registry storage failure");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                e.to_string(),
            )
        }
    }
}

fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
