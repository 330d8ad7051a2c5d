//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`MetricsBackend`]: range and instant queries against the
//!   Prometheus-compatible backend
//! - [`PointSink`]: delivery of normalized points to one client
//!   connection

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::point::{Point, SeriesRow};

/// Metrics backend port error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// Request could not be built or sent, or returned a non-success
    /// HTTP status.
    #[error("Backend request failed: {message}")]
    Request {
        /// Error details.
        message: String,
    },

    /// Response body was not the expected envelope shape.
    #[error("Malformed backend response: {message}")]
    MalformedResponse {
        /// Error details.
        message: String,
    },

    /// Request signing failed before the request was sent.
    #[error("Request signing failed: {message}")]
    Signing {
        /// Error details.
        message: String,
    },
}

/// Port for querying the pull-based metrics backend.
///
/// Implementations do not retry. A failed query surfaces as a single
/// [`BackendError`] and the calling cycle decides what to do with it.
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Evaluate `query` over `[start, end]` at `step_secs` resolution.
    ///
    /// Returns rows in backend order, each with its samples in backend
    /// order.
    async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step_secs: u64,
    ) -> Result<Vec<SeriesRow>, BackendError>;

    /// Evaluate `query` at the current instant.
    ///
    /// Returns rows in backend order, each carrying exactly one sample.
    async fn query_instant(&self, query: &str) -> Result<Vec<SeriesRow>, BackendError>;
}

/// Port for pushing normalized points to one client connection.
///
/// Emission is fire-and-forget: a sink whose connection has gone away
/// drops the point silently. Schedules never block on delivery.
pub trait PointSink: Send + Sync {
    /// Push one point to the client.
    fn emit(&self, point: &Point);
}
