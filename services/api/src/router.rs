//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, the WebSocket endpoints, and OpenAPI documentation.

use crate::{
    handlers,
    models::{ErrorResponse, HealthResponse, ProfileView, StartSessionResponse, SummaryView},
    state::AppState,
    ws::{visual_ws_handler, ws_handler},
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
        handlers::health,
        handlers::start_session,
        handlers::get_profile,
        handlers::get_last_summary,
    ),
    components(
        schemas(HealthResponse, StartSessionResponse, ProfileView, SummaryView, ErrorResponse)
    ),
    tags(
        (name = "Vidya API", description = "Session start and learner records for the Vidya tutor")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/session/start", post(handlers::start_session))
        .route("/api/profiles/{id}", get(handlers::get_profile))
        .route("/api/profiles/{id}/summary", get(handlers::get_last_summary))
        .route("/ws/session", get(ws_handler))
        .route("/ws/visual/{session_id}", get(visual_ws_handler))
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    // Create the final router that merges the stateful routes
    // with the stateless routes (like Swagger UI).
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
