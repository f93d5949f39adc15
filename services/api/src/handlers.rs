//! Axum Handlers for the REST API
//!
//! Session provisioning, termination, metrics, and the room-server webhook
//! endpoint. Error mapping follows the taxonomy: 400 for bad input, 404 for
//! not-found, 401 for webhook authentication failure, 500 otherwise, with
//! internal detail logged but never leaked.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use parley_core::error::CoreError;

use crate::{
    models::{
        CreateSessionPayload, CreateSessionResponse, EndSessionResponse, ErrorResponse, WebhookAck,
    },
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Maps core errors onto the HTTP taxonomy. Not-found conditions become
/// client-facing 404s; everything else is a generic 500.
fn map_core_err(err: CoreError) -> ApiError {
    match err {
        CoreError::AgentNotFound(id) => {
            ApiError::NotFound(format!("Agent with id '{id}' not found"))
        }
        CoreError::SessionNotFound(id) => {
            ApiError::NotFound(format!("Session with id '{id}' not found"))
        }
        other => ApiError::InternalServerError(other.into()),
    }
}

fn require_user_id(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("x-user-id header is required".to_string()))
}

/// Provision a room and open a voice-agent session.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body = CreateSessionPayload,
    responses(
        (status = 200, description = "Session created", body = CreateSessionResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 404, description = "Agent not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user creating the session")
    )
)]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateSessionPayload>,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    let user_id = require_user_id(&headers)?;

    let created = state
        .orchestrator
        .create_session(payload.agent_id, user_id, payload.is_test)
        .await
        .map_err(map_core_err)?;

    Ok(Json(created.into()))
}

/// End a session and tear down its room.
#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    responses(
        (status = 200, description = "Session ended", body = EndSessionResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<EndSessionResponse>, ApiError> {
    state
        .orchestrator
        .end_session(id)
        .await
        .map_err(map_core_err)?;

    Ok(Json(EndSessionResponse {
        message: "Session ended successfully".to_string(),
    }))
}

/// Fetch the composite metrics view for a session.
#[utoipa::path(
    get,
    path = "/sessions/{id}/metrics",
    responses(
        (status = 200, description = "Stored session record, live room snapshot, and derived metrics", body = Object),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn session_metrics(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let metrics = state
        .orchestrator
        .session_metrics(id)
        .await
        .map_err(map_core_err)?
        .ok_or_else(|| ApiError::NotFound(format!("Session with id '{id}' not found")))?;

    Ok(Json(metrics))
}

/// Receive a lifecycle webhook from the room server.
///
/// Authentication failure is the only rejection; reconciliation failures are
/// logged and the delivery is still acknowledged, since the room server's
/// redelivery cannot be steered reliably.
#[utoipa::path(
    post,
    path = "/webhook",
    responses(
        (status = 200, description = "Event received", body = WebhookAck),
        (status = 401, description = "Invalid webhook signature", body = ErrorResponse)
    )
)]
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookAck>, ApiError> {
    let authorization = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let event = state
        .webhook_receiver
        .receive(&body, authorization)
        .ok_or_else(|| ApiError::Unauthorized("Invalid webhook signature".to_string()))?;

    if let Err(err) = state.orchestrator.reconcile(&event).await {
        // Acknowledge anyway; surfacing the failure upstream would only
        // trigger a redelivery storm we cannot steer.
        error!(event = %event.event, error = %err, "webhook reconciliation failed");
    }

    Ok(Json(WebhookAck { received: true }))
}
