//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Connections**: WebSocket client connection counts
//! - **Control**: Control messages received by kind
//! - **Points**: Data points pushed to clients
//! - **Backend**: Query failures and latencies by query kind
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Connection counters and gauges
    describe_counter!(
        "stream_bridge_connections_total",
        "Total WebSocket client connections accepted"
    );
    describe_gauge!(
        "stream_bridge_active_connections",
        "Number of currently open WebSocket client connections"
    );

    // Control message counters
    describe_counter!(
        "stream_bridge_control_messages_total",
        "Total control messages received by kind"
    );

    // Subscription gauges
    describe_gauge!(
        "stream_bridge_active_subscriptions",
        "Number of active subscriptions across all sessions"
    );

    // Point counters
    describe_counter!(
        "stream_bridge_points_emitted_total",
        "Total data points pushed to clients"
    );

    // Backend counters and histograms
    describe_counter!(
        "stream_bridge_backend_failures_total",
        "Total failed backend query cycles by query kind"
    );
    describe_histogram!(
        "stream_bridge_backend_query_seconds",
        "Backend query latency by query kind"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for backend query kinds.
#[derive(Debug, Clone, Copy)]
pub enum QueryKind {
    /// Catch-up range query.
    Range,
    /// Recurring instant query.
    Instant,
}

impl QueryKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Range => "range",
            Self::Instant => "instant",
        }
    }
}

/// Metric labels for control message kinds.
#[derive(Debug, Clone, Copy)]
pub enum ControlKind {
    /// Start a subscription.
    Start,
    /// Stop a subscription.
    Stop,
    /// Stop all subscriptions.
    Reset,
    /// Unparseable control message.
    Malformed,
}

impl ControlKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Reset => "reset",
            Self::Malformed => "malformed",
        }
    }
}

/// Record an accepted client connection.
pub fn record_connection_opened() {
    counter!("stream_bridge_connections_total").increment(1);
    gauge!("stream_bridge_active_connections").increment(1.0);
}

/// Record a closed client connection.
pub fn record_connection_closed() {
    gauge!("stream_bridge_active_connections").decrement(1.0);
}

/// Record a received control message.
pub fn record_control_message(kind: ControlKind) {
    counter!(
        "stream_bridge_control_messages_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a newly started subscription.
pub fn record_subscription_started() {
    gauge!("stream_bridge_active_subscriptions").increment(1.0);
}

/// Record stopped subscriptions.
#[allow(clippy::cast_precision_loss)]
pub fn record_subscriptions_stopped(count: usize) {
    gauge!("stream_bridge_active_subscriptions").decrement(count as f64);
}

/// Record data points pushed to a client.
pub fn record_points_emitted(count: u64) {
    counter!("stream_bridge_points_emitted_total").increment(count);
}

/// Record a failed backend query cycle.
pub fn record_backend_failure(kind: QueryKind) {
    counter!(
        "stream_bridge_backend_failures_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a backend query duration.
pub fn record_query_duration(kind: QueryKind, duration: Duration) {
    histogram!(
        "stream_bridge_backend_query_seconds",
        "kind" => kind.as_str()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_kind_as_str() {
        assert_eq!(QueryKind::Range.as_str(), "range");
        assert_eq!(QueryKind::Instant.as_str(), "instant");
    }

    #[test]
    fn control_kind_as_str() {
        assert_eq!(ControlKind::Start.as_str(), "start");
        assert_eq!(ControlKind::Stop.as_str(), "stop");
        assert_eq!(ControlKind::Reset.as_str(), "reset");
        assert_eq!(ControlKind::Malformed.as_str(), "malformed");
    }
}
