//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, bridge status reporting, and Prometheus
//! metrics. Used by container orchestrators, load balancers, and monitoring
//! systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks the listener)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::ws::BridgeState;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy" or "unhealthy".
    pub status: HealthStatus,
    /// Bridge version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Whether the WebSocket listener is accepting connections.
    pub listening: bool,
    /// Client connection counts.
    pub connections: ConnectionStatus,
    /// Points delivered to clients since startup.
    pub points_emitted: u64,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// The WebSocket listener is up.
    Healthy,
    /// The WebSocket listener is down.
    Unhealthy,
}

/// Client connection counts.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    /// Currently open connections.
    pub active: i64,
    /// Connections accepted since startup.
    pub total: u64,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    bridge: Arc<BridgeState>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, bridge: Arc<BridgeState>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            bridge,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.bridge.is_listening() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let listening = state.bridge.is_listening();
    let status = if listening {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    };

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        listening,
        connections: ConnectionStatus {
            active: state.bridge.active_connections(),
            total: state.bridge.total_connections(),
        },
        points_emitted: state.bridge.points_emitted(),
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(bridge: Arc<BridgeState>) -> HealthServerState {
        HealthServerState::new("1.2.3".to_string(), bridge)
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn response_reflects_listening_bridge() {
        let bridge = Arc::new(BridgeState::new());
        bridge.set_listening(true);
        bridge.connection_opened();
        bridge.connection_opened();
        bridge.connection_closed();
        bridge.record_point();

        let response = build_health_response(&state_with(bridge));

        assert_eq!(response.status, HealthStatus::Healthy);
        assert!(response.listening);
        assert_eq!(response.version, "1.2.3");
        assert_eq!(response.connections.active, 1);
        assert_eq!(response.connections.total, 2);
        assert_eq!(response.points_emitted, 1);
    }

    #[test]
    fn response_unhealthy_when_listener_down() {
        let bridge = Arc::new(BridgeState::new());

        let response = build_health_response(&state_with(bridge));

        assert_eq!(response.status, HealthStatus::Unhealthy);
        assert!(!response.listening);
    }

    #[test]
    fn response_serializes_expected_shape() {
        let bridge = Arc::new(BridgeState::new());
        bridge.set_listening(true);

        let response = build_health_response(&state_with(bridge));
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["status"], "healthy");
        assert_eq!(value["version"], "1.2.3");
        assert_eq!(value["connections"]["active"], 0);
        assert_eq!(value["connections"]["total"], 0);
        assert_eq!(value["points_emitted"], 0);
    }
}
