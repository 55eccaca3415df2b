//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the relay: the REST
//! surface, the media-stream WebSocket endpoint, and the OpenAPI
//! documentation.

use crate::{
    handlers::{self, ErrorResponse, HealthResponse},
    state::AppState,
    twiml::MEDIA_STREAM_PATH,
    ws::ws_handler,
};

use axum::{Router, routing::get};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::health, handlers::incoming_call),
    components(schemas(HealthResponse, ErrorResponse)),
    tags(
        (name = "Voko Relay", description = "Telephony media-stream to realtime-AI relay")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route(
            "/incoming-call",
            get(handlers::incoming_call).post(handlers::incoming_call),
        )
        .route(MEDIA_STREAM_PATH, get(ws_handler))
        .with_state(app_state);

    // Merge the stateful routes with the stateless Swagger UI.
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
