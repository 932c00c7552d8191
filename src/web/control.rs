use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::server::AppState;
use crate::{command::Command, error::ChannelError};

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug)]
pub enum ApiError {
    Forbidden,
    Queue(ChannelError),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                Json(json!({"detail": "Invalid API Key"})),
            )
                .into_response(),
            ApiError::Queue(e @ ChannelError::Locked { .. }) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"detail": e.to_string()})),
            )
                .into_response(),
            ApiError::Queue(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"detail": e.to_string()})),
            )
                .into_response(),
            ApiError::Internal(detail) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": detail })),
            )
                .into_response(),
        }
    }
}

/// Proof that the request carried the configured API key. Extracted before
/// the body, so rejected requests never reach the queue.
#[derive(Debug)]
pub struct Authorized(());

pub fn authorize(state: &AppState, headers: &HeaderMap) -> Result<Authorized, ApiError> {
    let Some(expected) = state.api_key.as_deref() else {
        return Ok(Authorized(()));
    };
    let presented = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    if presented == Some(expected) {
        Ok(Authorized(()))
    } else {
        warn!("Rejected control request with missing or invalid API key");
        Err(ApiError::Forbidden)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Authorized {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authorize(state, &parts.headers)
    }
}

#[derive(Debug, Deserialize)]
pub struct ManualForm {
    pub direction: String,
    #[serde(deserialize_with = "crate::command::lenient_f64")]
    pub speed: f64,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/control/start", post(start))
        .route("/control/stop", post(stop))
        .route("/control/manual", post(manual))
        .route("/commands", post(submit))
}

async fn enqueue(state: &AppState, command: Command) -> Result<Json<Value>, ApiError> {
    let channel = state.channel.clone();
    let action = command.action();
    let id = tokio::task::spawn_blocking(move || channel.submit(&command))
        .await
        .map_err(|e| {
            error!("Command queue task failed: {}", e);
            ApiError::Internal("command queue task failed".to_string())
        })?
        .map_err(|e| {
            error!("Failed to queue {} command: {}", action, e);
            ApiError::Queue(e)
        })?;

    info!("Queued {} command {}", action, id);
    Ok(Json(json!({"status": "queued", "action": action, "id": id})))
}

async fn start(State(state): State<AppState>, _auth: Authorized) -> Result<Json<Value>, ApiError> {
    enqueue(&state, Command::Start).await
}

async fn stop(State(state): State<AppState>, _auth: Authorized) -> Result<Json<Value>, ApiError> {
    enqueue(&state, Command::Stop).await
}

async fn manual(
    State(state): State<AppState>,
    _auth: Authorized,
    Form(form): Form<ManualForm>,
) -> Result<Json<Value>, ApiError> {
    let command = Command::Manual {
        direction: form.direction,
        speed: form.speed,
    };
    enqueue(&state, command).await
}

async fn submit(
    State(state): State<AppState>,
    _auth: Authorized,
    Json(command): Json<Command>,
) -> Result<Json<Value>, ApiError> {
    enqueue(&state, command).await
}
