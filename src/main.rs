use anyhow::Result;

use roadmesh::config::RoadmeshConfig;
use roadmesh::mission::MissionLoop;
use roadmesh::util::setup_logging;
use roadmesh::web::WebServer;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = RoadmeshConfig::load()?;
    let _log_guard = setup_logging(&config.log_level, config.log_dir.as_deref());
    info!("Application starting...");
    info!("Data directory: {:?}", config.paths.data_dir);

    // Create a shutdown signal channel
    let (shutdown_tx, _) = broadcast::channel(1);

    // Initialize services
    let mission = MissionLoop::new(&config)?;
    let web_server = WebServer::new(&config, mission.channel());

    // Spawn all services
    let mission_handle = spawn_mission_loop(mission, shutdown_tx.subscribe()).await;
    let web_handle = if config.web.enabled {
        spawn_web_server(web_server, shutdown_tx.subscribe()).await
    } else {
        info!("Web server disabled in config, skipping...");
        tokio::spawn(async {})
    };

    let shutdown_signal = async {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, stopping services...");
                if shutdown_tx.send(()).is_err() {
                    error!("No service was listening for the shutdown signal");
                }
            }
            Err(err) => {
                error!("Failed to listen for shutdown signal: {}", err);
            }
        }
    };

    let results = tokio::join!(mission_handle, web_handle, shutdown_signal);

    for (result, name) in [results.0, results.1]
        .into_iter()
        .zip(["Mission loop", "Web server"])
    {
        if let Err(e) = result {
            error!("{} join error: {}", name, e);
        }
    }

    info!("All services stopped, shutting down");

    Ok(())
}

async fn spawn_mission_loop(
    mut mission: MissionLoop,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = mission.run() => {
                if let Err(e) = result {
                    error!("Mission loop error: {:#}", e);
                }
            }
            _ = shutdown.recv() => {
                info!("Shutting down mission loop...");
            }
        }
        mission.shutdown();
    })
}

async fn spawn_web_server(
    server: WebServer,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = server.start() => {
                if let Err(e) = result {
                    error!("Web server error: {:#}", e);
                }
            }
            _ = shutdown.recv() => {
                info!("Shutting down web server...");
                server.stop().await;
            }
        }
    })
}
