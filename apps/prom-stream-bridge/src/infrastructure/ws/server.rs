//! WebSocket Bridge Server
//!
//! Accepts persistent client connections and runs one [`Session`] per
//! connection. Inbound text frames are parsed as control messages and
//! dispatched to the session; points produced by the session's
//! subscription schedules flow back out through a per-connection
//! outbound channel drained by a dedicated writer task.
//!
//! # Connection Lifecycle
//!
//! 1. TCP accept, then WebSocket handshake.
//! 2. Read loop: `start` / `stop` / `reset` control messages, pings,
//!    and close frames.
//! 3. On close, read error, or server shutdown the session is reset,
//!    which cancels every subscription schedule the connection owned.
//!
//! Malformed control frames are logged at debug level and dropped; the
//! connection itself stays up.

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::application::ports::MetricsBackend;
use crate::application::services::{SchedulerConfig, Session};
use crate::domain::subscription::SubscriptionDefaults;
use crate::infrastructure::config::BridgeConfig;
use crate::infrastructure::metrics::{
    ControlKind, record_connection_closed, record_connection_opened, record_control_message,
    record_subscription_started, record_subscriptions_stopped,
};
use crate::infrastructure::ws::messages::ControlMessage;
use crate::infrastructure::ws::sink::WsPointSink;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur while starting the WebSocket server.
#[derive(Debug, thiserror::Error)]
pub enum WsServerError {
    /// Binding the listen socket failed.
    #[error("failed to bind WebSocket listener on port {0}: {1}")]
    BindFailed(u16, String),
}

// =============================================================================
// Bridge State Tracking
// =============================================================================

/// Shared counters describing the bridge, read by the health endpoint.
#[derive(Debug)]
pub struct BridgeState {
    listening: AtomicBool,
    active_connections: AtomicI64,
    total_connections: AtomicU64,
    points_emitted: AtomicU64,
}

impl BridgeState {
    /// Create a zeroed state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            listening: AtomicBool::new(false),
            active_connections: AtomicI64::new(0),
            total_connections: AtomicU64::new(0),
            points_emitted: AtomicU64::new(0),
        }
    }

    /// Mark the listener as up or down.
    pub fn set_listening(&self, listening: bool) {
        self.listening.store(listening, Ordering::Relaxed);
    }

    /// Whether the listener is accepting connections.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }

    /// Record an accepted connection.
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a closed connection.
    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record one point delivered to a client.
    pub fn record_point(&self) {
        self.points_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Currently open connections.
    #[must_use]
    pub fn active_connections(&self) -> i64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Connections accepted since startup.
    #[must_use]
    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    /// Points delivered since startup.
    #[must_use]
    pub fn points_emitted(&self) -> u64 {
        self.points_emitted.load(Ordering::Relaxed)
    }
}

impl Default for BridgeState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the WebSocket server.
#[derive(Debug, Clone, Copy)]
pub struct WsServerConfig {
    /// Port to listen on. Port 0 requests an ephemeral port.
    pub port: u16,
    /// Scheduler tuning handed to every session.
    pub scheduler: SchedulerConfig,
    /// Subscription defaults handed to every session.
    pub defaults: SubscriptionDefaults,
}

impl WsServerConfig {
    /// Build server configuration from the bridge configuration.
    #[must_use]
    pub const fn from_config(config: &BridgeConfig) -> Self {
        Self {
            port: config.server.ws_port,
            scheduler: config.scheduler.scheduler_config(),
            defaults: config.scheduler.subscription_defaults(),
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// The WebSocket server: a bound listener plus everything each
/// connection needs.
pub struct WsServer {
    listener: TcpListener,
    config: WsServerConfig,
    backend: Arc<dyn MetricsBackend>,
    state: Arc<BridgeState>,
    cancel: CancellationToken,
}

impl WsServer {
    /// Bind the listen socket.
    ///
    /// Binding is separate from [`run`](Self::run) so startup can fail
    /// fast on a busy port and so tests can bind port 0 and read the
    /// assigned port back via [`local_addr`](Self::local_addr).
    pub async fn bind(
        config: WsServerConfig,
        backend: Arc<dyn MetricsBackend>,
        state: Arc<BridgeState>,
        cancel: CancellationToken,
    ) -> Result<Self, WsServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|error| WsServerError::BindFailed(config.port, error.to_string()))?;

        Ok(Self {
            listener,
            config,
            backend,
            state,
            cancel,
        })
    }

    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Accept connections until the cancellation token fires.
    pub async fn run(self) {
        let port = self
            .local_addr()
            .map_or(self.config.port, |addr| addr.port());
        tracing::info!(port, "WebSocket server listening");
        self.state.set_listening(true);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let handler = ConnectionHandler {
                                stream,
                                peer,
                                backend: Arc::clone(&self.backend),
                                state: Arc::clone(&self.state),
                                scheduler: self.config.scheduler,
                                defaults: self.config.defaults,
                                cancel: self.cancel.clone(),
                            };
                            tokio::spawn(handler.run());
                        }
                        Err(error) => {
                            tracing::warn!(error = %error, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        self.state.set_listening(false);
        tracing::info!("WebSocket server stopped");
    }
}

impl std::fmt::Debug for WsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsServer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Connection Handling
// =============================================================================

/// One accepted connection: handshake, session, read loop, teardown.
struct ConnectionHandler {
    stream: TcpStream,
    peer: SocketAddr,
    backend: Arc<dyn MetricsBackend>,
    state: Arc<BridgeState>,
    scheduler: SchedulerConfig,
    defaults: SubscriptionDefaults,
    cancel: CancellationToken,
}

impl ConnectionHandler {
    async fn run(self) {
        let ws_stream = match tokio_tungstenite::accept_async(self.stream).await {
            Ok(stream) => stream,
            Err(error) => {
                tracing::debug!(peer = %self.peer, error = %error, "WebSocket handshake failed");
                return;
            }
        };

        tracing::info!(peer = %self.peer, "Client connected");
        self.state.connection_opened();
        record_connection_opened();

        let (write, mut read) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(drain_outbound(outbound_rx, write));

        let sink = Arc::new(WsPointSink::new(
            outbound_tx.clone(),
            Arc::clone(&self.state),
        ));
        let session = Session::new(
            Arc::clone(&self.backend),
            sink,
            self.scheduler,
            self.defaults,
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            dispatch_control(&session, &text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = outbound_tx.send(Message::Pong(data));
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::debug!(peer = %self.peer, "Client sent close frame");
                            break;
                        }
                        Some(Ok(_)) => {
                            // Ignore binary, pong, and frame fragments
                        }
                        Some(Err(error)) => {
                            tracing::debug!(peer = %self.peer, error = %error, "WebSocket read failed");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        // The transport is gone; every schedule this connection owns
        // must stop with it.
        record_subscriptions_stopped(session.reset());
        writer.abort();
        self.state.connection_closed();
        record_connection_closed();
        tracing::info!(peer = %self.peer, "Client disconnected");
    }
}

/// Parse one inbound text frame and apply it to the session.
///
/// Frames that do not parse as a control message are dropped without
/// affecting the connection or any running subscription.
fn dispatch_control(session: &Session, text: &str) {
    match serde_json::from_str::<ControlMessage>(text) {
        Ok(ControlMessage::Start(request)) => {
            record_control_message(ControlKind::Start);
            if session.start_subscription(request) {
                record_subscription_started();
            }
        }
        Ok(ControlMessage::Stop { id }) => {
            record_control_message(ControlKind::Stop);
            if session.stop_subscription(&id) {
                record_subscriptions_stopped(1);
            }
        }
        Ok(ControlMessage::Reset) => {
            record_control_message(ControlKind::Reset);
            record_subscriptions_stopped(session.reset());
        }
        Err(error) => {
            record_control_message(ControlKind::Malformed);
            tracing::debug!(error = %error, "Ignoring malformed control message");
        }
    }
}

/// Forward queued frames to the socket until the channel closes or a
/// write fails.
async fn drain_outbound<W>(mut outbound: mpsc::UnboundedReceiver<Message>, mut write: W)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    while let Some(frame) = outbound.recv().await {
        if let Err(error) = write.send(frame).await {
            tracing::debug!(error = %error, "WebSocket write failed");
            break;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::infrastructure::config::{BackendSettings, SchedulerSettings, ServerSettings};

    #[test]
    fn bridge_state_tracks_connections() {
        let state = BridgeState::new();
        assert_eq!(state.active_connections(), 0);
        assert_eq!(state.total_connections(), 0);

        state.connection_opened();
        state.connection_opened();
        state.connection_closed();

        assert_eq!(state.active_connections(), 1);
        assert_eq!(state.total_connections(), 2);
    }

    #[test]
    fn bridge_state_tracks_points_and_listening() {
        let state = BridgeState::default();
        assert!(!state.is_listening());

        state.set_listening(true);
        state.record_point();
        state.record_point();

        assert!(state.is_listening());
        assert_eq!(state.points_emitted(), 2);

        state.set_listening(false);
        assert!(!state.is_listening());
    }

    #[test]
    fn server_config_maps_bridge_config() {
        let config = BridgeConfig {
            backend: BackendSettings {
                endpoint: "http://prometheus:9090".to_string(),
                region: "us-east-1".to_string(),
                service: "aps".to_string(),
            },
            credentials: None,
            server: ServerSettings {
                ws_port: 9443,
                health_port: 9091,
            },
            scheduler: SchedulerSettings {
                poll_margin: Duration::from_millis(150),
                default_step_secs: 10,
                default_history_secs: 120,
            },
        };

        let server_config = WsServerConfig::from_config(&config);
        assert_eq!(server_config.port, 9443);
        assert_eq!(server_config.scheduler.poll_margin, Duration::from_millis(150));
        assert_eq!(server_config.defaults.step_secs, 10);
        assert_eq!(server_config.defaults.history_secs, 120);
    }

    #[test]
    fn bind_failed_error_names_the_port() {
        let error = WsServerError::BindFailed(8443, "address in use".to_string());
        let rendered = error.to_string();
        assert!(rendered.contains("8443"));
        assert!(rendered.contains("address in use"));
    }
}
