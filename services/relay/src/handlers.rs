//! Axum Handlers for the HTTP surface
//!
//! Call setup and observability endpoints. The media stream itself is
//! handled by the WebSocket module.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use secrecy::ExposeSecret;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;

use crate::{state::AppState, twiml};

pub enum ApiError {
    BadRequest(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
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

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "healthy")]
    pub status: String,
    pub openai_key_configured: bool,
    pub active_sessions: usize,
}

/// Simple index so load balancers and humans can see the relay is up.
pub async fn index() -> &'static str {
    "Voko media relay is running"
}

/// Report process health, credential presence, and active session count.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Process health report", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        openai_key_configured: !state.config.openai_api_key.expose_secret().is_empty(),
        active_sessions: state.registry.count().await,
    })
}

/// Answer a call-setup request with the markup that connects the caller's
/// media stream to this relay.
#[utoipa::path(
    post,
    path = "/incoming-call",
    responses(
        (status = 200, description = "Voice response connecting the call to the media stream", content_type = "application/xml", body = String),
        (status = 400, description = "Connect-back host could not be determined", body = ErrorResponse)
    )
)]
pub async fn incoming_call(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let base = match &state.config.public_base_url {
        Some(url) => url.clone(),
        None => {
            let host = headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    ApiError::BadRequest(
                        "Unable to determine connect-back host; set PUBLIC_BASE_URL".to_string(),
                    )
                })?;
            format!("https://{host}")
        }
    };

    let stream_url = twiml::stream_url(&base);
    info!(%stream_url, "Answering call setup request");

    let document = twiml::connect_stream(
        &state.config.greeting,
        &stream_url,
        state.config.stream_connect_timeout.as_secs(),
        state.config.stream_max_reconnects,
    );

    Ok((
        [(header::CONTENT_TYPE, "application/xml")],
        document,
    )
        .into_response())
}
