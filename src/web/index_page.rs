use askama::Template;
use std::io::ErrorKind;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tracing::error;

use super::server::AppState;
use crate::{storage::read_json_lenient, vehicle::StatusSnapshot};

// View Models
#[derive(Debug)]
pub struct StatusViewModel {
    pub state: String,
    pub position: String,
    pub battery: String,
    pub waypoint: String,
    pub reroute_reason: String,
    pub recon_mode: bool,
    pub safety: String,
    pub power_critical: bool,
    pub hazards: Vec<HazardViewModel>,
    pub updated: String,
}

#[derive(Debug)]
pub struct HazardViewModel {
    pub kind: String,
    pub severity: String,
    pub location: String,
    pub seen: String,
}

// Template
#[derive(Template)]
#[template(path = "index.html")]
struct IndexPage {
    version: &'static str,
    status: Option<StatusViewModel>,
    logs: Vec<String>,
    auth_required: bool,
}

impl From<StatusSnapshot> for StatusViewModel {
    fn from(snapshot: StatusSnapshot) -> Self {
        let safety = match (snapshot.safety.override_active, snapshot.safety.abort_active) {
            (false, false) => "clear",
            (true, false) => "emergency override",
            (false, true) => "mission abort",
            (true, true) => "override + abort",
        };
        Self {
            state: snapshot.status.to_string(),
            position: format!("{:.6}, {:.6}", snapshot.position.lat, snapshot.position.lon),
            battery: format!("{:.2}%", snapshot.battery),
            waypoint: format!("{} / {}", snapshot.current_waypoint, snapshot.route.len()),
            reroute_reason: snapshot.reroute_reason.unwrap_or_else(|| "-".to_string()),
            recon_mode: snapshot.recon_mode,
            safety: safety.to_string(),
            power_critical: snapshot.power_critical,
            hazards: snapshot
                .hazards
                .iter()
                .rev()
                .map(|hazard| HazardViewModel {
                    kind: hazard.kind.to_string(),
                    severity: hazard.severity.to_string(),
                    location: hazard.location.to_string(),
                    seen: hazard.timestamp.format("%H:%M:%S").to_string(),
                })
                .collect(),
            updated: snapshot.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        }
    }
}

// Routes and Handlers
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index_page))
        .route("/status", get(status_api))
        .route("/logs", get(logs_api))
        .route("/camera/snapshot", get(camera_snapshot))
}

async fn read_status<T>(state: &AppState) -> Option<T>
where
    T: serde::de::DeserializeOwned + Send + 'static,
{
    let path = state.status_path.clone();
    tokio::task::spawn_blocking(move || read_json_lenient::<T>(&path))
        .await
        .unwrap_or_else(|e| {
            error!("Status read task failed: {}", e);
            None
        })
}

async fn read_logs(state: &AppState) -> Vec<String> {
    let events = state.events.clone();
    let lines = state.tail_lines;
    tokio::task::spawn_blocking(move || events.tail(lines))
        .await
        .unwrap_or_else(|e| {
            error!("Log read task failed: {}", e);
            Vec::new()
        })
}

async fn index_page(State(state): State<AppState>) -> Response {
    let (status, logs) = tokio::join!(read_status::<StatusSnapshot>(&state), read_logs(&state));
    let template = IndexPage {
        version: env!("CARGO_PKG_VERSION"),
        status: status.map(StatusViewModel::from),
        logs,
        auth_required: state.api_key.is_some(),
    };
    match template.render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!("Failed to render dashboard: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to render dashboard").into_response()
        }
    }
}

async fn status_api(State(state): State<AppState>) -> Json<Value> {
    match read_status::<Value>(&state).await {
        Some(status) => Json(status),
        None => Json(json!({"error": "No status available"})),
    }
}

async fn logs_api(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "logs": read_logs(&state).await }))
}

async fn camera_snapshot(State(state): State<AppState>) -> Response {
    let path = state.snapshot_path.clone();
    let frame = tokio::task::spawn_blocking(move || std::fs::read(&path)).await;
    match frame {
        Ok(Ok(bytes)) => ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response(),
        Ok(Err(e)) if e.kind() == ErrorKind::NotFound => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "No snapshot available"})),
        )
            .into_response(),
        Ok(Err(e)) => {
            error!("Failed to read camera snapshot {:?}: {}", state.snapshot_path, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Failed to read snapshot"})),
            )
                .into_response()
        }
        Err(e) => {
            error!("Snapshot read task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
