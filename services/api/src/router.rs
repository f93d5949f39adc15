//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the session API, the webhook endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        AgentConfigBody, CreateSessionPayload, CreateSessionResponse, EndSessionResponse,
        ErrorResponse, WebhookAck,
    },
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_session,
        handlers::end_session,
        handlers::session_metrics,
        handlers::webhook,
    ),
    components(
        schemas(
            CreateSessionPayload,
            CreateSessionResponse,
            AgentConfigBody,
            EndSessionResponse,
            WebhookAck,
            ErrorResponse
        )
    ),
    tags(
        (name = "Parley API", description = "Voice-agent session provisioning and lifecycle")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/sessions", post(handlers::create_session))
        .route("/sessions/{id}", axum::routing::delete(handlers::end_session))
        .route("/sessions/{id}/metrics", get(handlers::session_metrics))
        .route("/webhook", post(handlers::webhook))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
