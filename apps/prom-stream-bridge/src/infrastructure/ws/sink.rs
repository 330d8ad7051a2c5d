//! WebSocket Point Sink
//!
//! Bridges the scheduler's point stream onto a connection's outbound
//! WebSocket channel. Each point is serialized to a flat JSON object and
//! queued as a text frame; the connection's writer task drains the queue.
//!
//! Emission is fire-and-forget. Once the connection is torn down the
//! channel is closed and queued points are dropped with it, which is the
//! desired behavior: a departed client has no use for late samples.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::application::ports::PointSink;
use crate::domain::point::Point;
use crate::infrastructure::metrics::record_points_emitted;
use crate::infrastructure::ws::server::BridgeState;

// =============================================================================
// Sink
// =============================================================================

/// Point sink that forwards normalized points to one client connection.
#[derive(Debug, Clone)]
pub struct WsPointSink {
    outbound: mpsc::UnboundedSender<Message>,
    state: Arc<BridgeState>,
}

impl WsPointSink {
    /// Create a sink feeding the given outbound frame channel.
    #[must_use]
    pub const fn new(outbound: mpsc::UnboundedSender<Message>, state: Arc<BridgeState>) -> Self {
        Self { outbound, state }
    }
}

impl PointSink for WsPointSink {
    fn emit(&self, point: &Point) {
        match serde_json::to_string(point) {
            Ok(json) => {
                if self.outbound.send(Message::Text(json.into())).is_ok() {
                    self.state.record_point();
                    record_points_emitted(1);
                }
            }
            Err(error) => {
                tracing::debug!(
                    subscription_id = %point.id,
                    error = %error,
                    "Failed to serialize point"
                );
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn sample_point() -> Point {
        Point {
            id: "cpu".to_string(),
            t: 1_700_000_100.0,
            k: "default/api-6f9c".to_string(),
            v: "0.25".to_string(),
            labels: BTreeMap::from([("namespace".to_string(), "default".to_string())]),
        }
    }

    #[test]
    fn emits_point_as_text_frame() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = Arc::new(BridgeState::new());
        let sink = WsPointSink::new(tx, Arc::clone(&state));

        sink.emit(&sample_point());

        let Ok(Message::Text(text)) = rx.try_recv() else {
            panic!("expected a queued text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["id"], "cpu");
        assert_eq!(value["k"], "default/api-6f9c");
        assert_eq!(value["v"], "0.25");
        assert_eq!(value["namespace"], "default");
        assert_eq!(state.points_emitted(), 1);
    }

    #[test]
    fn closed_channel_drops_points_without_counting() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let state = Arc::new(BridgeState::new());
        let sink = WsPointSink::new(tx, Arc::clone(&state));

        sink.emit(&sample_point());

        assert_eq!(state.points_emitted(), 0);
    }

    #[test]
    fn counts_every_delivered_point() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = Arc::new(BridgeState::new());
        let sink = WsPointSink::new(tx, Arc::clone(&state));

        for _ in 0..3 {
            sink.emit(&sample_point());
        }

        assert_eq!(state.points_emitted(), 3);
        let mut frames = 0;
        while rx.try_recv().is_ok() {
            frames += 1;
        }
        assert_eq!(frames, 3);
    }
}
