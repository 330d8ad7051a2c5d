#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Prometheus Stream Bridge - Metrics Push Multiplexer
//!
//! A WebSocket service that turns a pull-based Prometheus-compatible
//! query API into a push stream. Clients hold one persistent connection,
//! declare named subscriptions to time-series queries, and receive
//! normalized data points as the bridge polls the backend on each
//! subscription's cadence.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core subscription and data point types
//!   - `subscription`: Subscription parameters, lifecycle phases, state
//!   - `point`: Backend result rows and normalized wire points
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Interfaces for the metrics backend and point delivery
//!   - `services`: Per-subscription scheduling, per-connection sessions
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `prometheus`: HTTP query client with optional SigV4 signing
//!   - `ws`: WebSocket server, control messages, point sink
//!   - `config`: Environment-driven configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`: Prometheus metrics recording
//!   - `telemetry`: Tracing and OpenTelemetry setup
//!
//! # Data Flow
//!
//! ```text
//! ┌────────────┐  query   ┌──────────────┐  points  ┌─────────────┐
//! │ Prometheus │◄─────────│ Subscription │─────────►│  WebSocket  │──► Client 1
//! │ Query API  │─────────►│  Schedules   │          │   Server    │──► Client 2
//! └────────────┘ samples  └──────────────┘          └─────────────┘──► Client N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core subscription and point types with no external services.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::point::{Point, Sample, SeriesRow, normalize, series_key};
pub use domain::subscription::{
    StartRequest, SubscriptionDefaults, SubscriptionPhase, SubscriptionSpec, SubscriptionState,
};

// Application ports and services
pub use application::ports::{BackendError, MetricsBackend, PointSink};
pub use application::services::{
    ScheduleHandle, SchedulerConfig, Session, SessionStats, SubscriptionScheduler, alignment_delay,
};

// Infrastructure config
pub use infrastructure::config::{
    BackendSettings, BridgeConfig, ConfigError, Credentials, SchedulerSettings, ServerSettings,
};

// Prometheus backend client
pub use infrastructure::prometheus::{PrometheusClient, RequestSigner, SignerError};

// WebSocket server (for integration tests)
pub use infrastructure::ws::{
    BridgeState, ControlMessage, WsPointSink, WsServer, WsServerConfig, WsServerError,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::{ControlKind, QueryKind, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
