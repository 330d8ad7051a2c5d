//! Prometheus Stream Bridge Binary
//!
//! Starts the metrics push bridge.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin prom-stream-bridge
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `PROM_ENDPOINT`: Base URL of the Prometheus-compatible query API
//!
//! ## Optional
//! - `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`: Enable SigV4 request signing
//! - `AWS_SESSION_TOKEN`: Session token for temporary credentials
//! - `AWS_REGION`: Signing region (default: us-east-1)
//! - `SIGNING_SERVICE`: SigV4 service name (default: aps)
//! - `BRIDGE_WS_PORT`: WebSocket server port (default: 8443)
//! - `BRIDGE_HEALTH_PORT`: Health check HTTP port (default: 9090)
//! - `BRIDGE_POLL_MARGIN_MS`: Alignment safety margin in milliseconds (default: 200)
//! - `BRIDGE_DEFAULT_STEP_SECS`: Default subscription step (default: 5)
//! - `BRIDGE_DEFAULT_HISTORY_SECS`: Default catch-up window (default: 60)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: prom-stream-bridge)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use prom_stream_bridge::infrastructure::telemetry;
use prom_stream_bridge::{
    BridgeConfig, BridgeState, HealthServer, HealthServerState, MetricsBackend, PrometheusClient,
    WsServer, WsServerConfig, init_metrics,
};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Prometheus Stream Bridge");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = BridgeConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let bridge_state = Arc::new(BridgeState::new());

    // Backend client shared by every session
    let backend: Arc<dyn MetricsBackend> = Arc::new(PrometheusClient::from_config(&config)?);

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&bridge_state),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // WebSocket server
    let ws_config = WsServerConfig::from_config(&config);
    let ws_server = WsServer::bind(
        ws_config,
        backend,
        Arc::clone(&bridge_state),
        shutdown_token.clone(),
    )
    .await?;
    let ws_task = tokio::spawn(ws_server.run());

    tracing::info!("Stream bridge ready");

    await_shutdown(shutdown_token).await;

    if drain_tasks(SHUTDOWN_TIMEOUT, vec![health_task, ws_task]).await {
        tracing::info!("Stream bridge stopped");
    } else {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timeout elapsed with server tasks still running"
        );
    }
    Ok(())
}

/// Await the spawned server tasks, bounded by `timeout`.
///
/// Returns whether every task exited within the window.
async fn drain_tasks(timeout: Duration, tasks: Vec<JoinHandle<()>>) -> bool {
    let drain = async {
        for task in tasks {
            let _ = task.await;
        }
    };
    tokio::time::timeout(timeout, drain).await.is_ok()
}

/// Log the parsed configuration.
fn log_config(config: &BridgeConfig) {
    tracing::info!(
        endpoint = %config.backend.endpoint,
        region = %config.backend.region,
        signing = config.signing_enabled(),
        ws_port = config.server.ws_port,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        poll_margin = ?config.scheduler.poll_margin,
        default_step_secs = config.scheduler.default_step_secs,
        default_history_secs = config.scheduler.default_history_secs,
        "Scheduler defaults"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
