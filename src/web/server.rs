use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{control, index_page};
use crate::{command::CommandChannel, config::RoadmeshConfig, storage::EventLog};

use anyhow::{Context, Result};

/// Shared handler state. The server only reads the status and log files
/// and only writes through the command channel.
#[derive(Debug, Clone)]
pub struct AppState {
    pub channel: Arc<CommandChannel>,
    pub status_path: PathBuf,
    pub snapshot_path: PathBuf,
    pub events: EventLog,
    pub api_key: Option<String>,
    pub tail_lines: usize,
}

impl AppState {
    pub fn new(config: &RoadmeshConfig, channel: Arc<CommandChannel>) -> Self {
        Self {
            channel,
            status_path: config.paths.status_path(),
            snapshot_path: config.paths.snapshot_path(),
            events: EventLog::new(config.paths.log_path(), config.logs.max_bytes),
            api_key: config.web.api_key.clone().filter(|key| !key.is_empty()),
            tail_lines: config.logs.tail_lines,
        }
    }
}

pub struct WebServer {
    host: String,
    port: u16,
    state: AppState,
    running: Arc<AtomicBool>,
}

impl WebServer {
    pub fn new(config: &RoadmeshConfig, channel: Arc<CommandChannel>) -> Self {
        Self {
            host: config.web.host.clone(),
            port: config.web.port,
            state: AppState::new(config, channel),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .merge(index_page::routes())
            .merge(control::routes())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    pub async fn start(&self) -> Result<()> {
        let app = self.router();
        self.running.store(true, Ordering::SeqCst);

        if self.state.api_key.is_none() {
            tracing::warn!("web.api_key is not set, control routes are unauthenticated");
        }
        info!("Starting web server on http://{}:{}", self.host, self.port);

        let listener = tokio::net::TcpListener::bind(format!("{}:{}", self.host, self.port))
            .await
            .context(format!("Failed to bind to port {}", self.port))?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.running.clone()))
            .await
            .context("Failed to serve")?;

        Ok(())
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

async fn shutdown_signal(running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
