use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use orchestrator_node::{router, AppState, OrchestratorNodeConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{error, info};

const CONFIG_PATH: &str = "config/orchestrator";

#[tokio::main]
async fn main() -> Result<()> {
    let config = OrchestratorNodeConfig::from_file(CONFIG_PATH).unwrap_or_else(|e| {
        eprintln!("falling back to default config: {e}");
        OrchestratorNodeConfig::default()
    });

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.filter.clone())),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    if let Err(e) = config.validate() {
        anyhow::bail!("invalid configuration: {e}");
    }

    info!("Starting orchestrator-node v{}", env!("CARGO_PKG_VERSION"));

    let orchestrator = orchestrator_core::Orchestrator::new(config.to_core_config());
    let state = AppState::new(orchestrator.clone()).with_websocket_enabled(config.server.websocket_enabled);
    let background = orchestrator.spawn_background_loops();
    *state.background.lock().unwrap() = Some(background);

    let metrics_addr: SocketAddr = config
        .server
        .metrics_addr
        .parse()
        .context("metrics_addr is not a valid socket address")?;
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .context("failed to install Prometheus exporter")?;
    info!(metrics_addr = %metrics_addr, "Prometheus metrics server started");

    let broadcast_orchestrator = orchestrator.clone();
    let broadcaster = state.broadcaster.clone();
    let websocket_enabled = config.server.websocket_enabled;
    let broadcast_interval = Duration::from_secs(config.server.broadcast_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(broadcast_interval);
        loop {
            interval.tick().await;
            let snapshot = broadcast_orchestrator.metrics_snapshot();
            if websocket_enabled {
                broadcaster.publish(
                    orchestrator_node::EventType::NetworkStatus,
                    serde_json::json!(snapshot),
                );
            }
        }
    });

    let app = router(state);

    let listen_addr: SocketAddr = config
        .server
        .listen_addr
        .parse()
        .context("server.listen_addr is not a valid socket address")?;

    info!(listen_addr = %listen_addr, "Starting orchestrator API server");
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;

    axum::serve(listener, app)
        .await
        .context("API server error")?;

    error!("orchestrator API server exited");
    Ok(())
}
