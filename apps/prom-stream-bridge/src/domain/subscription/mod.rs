//! Subscription Parameters and Lifecycle State
//!
//! Domain types for the named subscriptions a client declares over its
//! connection. Each subscription binds a backend query to a polling
//! cadence and an initial catch-up window.
//!
//! # Design
//!
//! A subscription is built from a raw `start` request:
//! - Missing or empty IDs are replaced with a generated UUID
//! - Non-positive `step` and `history` values fall back to defaults
//! - `metrics` lists the label names to copy onto emitted points
//!
//! Lifecycle state is tracked separately from the immutable parameters
//! so a running schedule can expose its current phase and counters
//! without locking the parameters themselves.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;

// =============================================================================
// Defaults
// =============================================================================

/// Default polling cadence in seconds.
pub const DEFAULT_STEP_SECS: u64 = 5;

/// Default catch-up window in seconds.
pub const DEFAULT_HISTORY_SECS: u64 = 60;

/// Fallback values applied when a `start` request omits `step` or
/// `history`, or supplies a non-positive value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionDefaults {
    /// Polling cadence in seconds.
    pub step_secs: u64,
    /// Catch-up window in seconds.
    pub history_secs: u64,
}

impl SubscriptionDefaults {
    /// Create defaults with explicit values.
    #[must_use]
    pub const fn new(step_secs: u64, history_secs: u64) -> Self {
        Self {
            step_secs,
            history_secs,
        }
    }
}

impl Default for SubscriptionDefaults {
    fn default() -> Self {
        Self::new(DEFAULT_STEP_SECS, DEFAULT_HISTORY_SECS)
    }
}

// =============================================================================
// Start Request
// =============================================================================

/// Raw parameters of a `start` control message.
///
/// All fields except `query` are optional on the wire. Validation and
/// defaulting happen in [`SubscriptionSpec::from_request`].
#[derive(Debug, Clone, Deserialize)]
pub struct StartRequest {
    /// Client-supplied subscription ID.
    #[serde(default)]
    pub id: Option<String>,
    /// Opaque backend query expression.
    pub query: String,
    /// Label names to copy from each series row onto emitted points.
    #[serde(default)]
    pub metrics: Vec<String>,
    /// Polling cadence in seconds.
    #[serde(default)]
    pub step: Option<i64>,
    /// Catch-up window in seconds.
    #[serde(default)]
    pub history: Option<i64>,
}

// =============================================================================
// Subscription Spec
// =============================================================================

/// Validated, immutable parameters of one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    /// Unique subscription ID within its connection.
    pub id: String,
    /// Opaque backend query expression.
    pub query: String,
    /// Label names to copy onto emitted points.
    pub metrics: Vec<String>,
    /// Polling cadence in seconds. Always positive.
    pub step_secs: u64,
    /// Catch-up window in seconds. Zero disables catch-up.
    pub history_secs: u64,
}

impl SubscriptionSpec {
    /// Build a spec from a raw `start` request.
    ///
    /// Generates a UUID when the request carries no usable ID and
    /// replaces non-positive `step`/`history` values with the defaults.
    #[must_use]
    pub fn from_request(request: StartRequest, defaults: &SubscriptionDefaults) -> Self {
        let id = match request.id {
            Some(id) if !id.is_empty() => id,
            _ => uuid::Uuid::new_v4().to_string(),
        };

        Self {
            id,
            query: request.query,
            metrics: request.metrics,
            step_secs: positive_or(request.step, defaults.step_secs),
            history_secs: positive_or(request.history, defaults.history_secs),
        }
    }

    /// Polling cadence as a [`Duration`].
    #[must_use]
    pub const fn step(&self) -> Duration {
        Duration::from_secs(self.step_secs)
    }

    /// Whether the subscription starts with a catch-up range query.
    #[must_use]
    pub const fn catch_up_enabled(&self) -> bool {
        self.history_secs > 0
    }
}

/// Keep a requested value only if it is strictly positive.
fn positive_or(requested: Option<i64>, default: u64) -> u64 {
    match requested {
        Some(value) if value > 0 => u64::try_from(value).unwrap_or(default),
        _ => default,
    }
}

// =============================================================================
// Lifecycle Phase
// =============================================================================

/// Phase of a subscription's polling lifecycle.
///
/// Transitions run strictly forward: `Created` to `CatchingUp` to
/// `Aligning` to `Polling`, with `Stopped` reachable from any phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionPhase {
    /// Registered but not yet scheduled.
    Created,
    /// Replaying the historical catch-up window.
    CatchingUp,
    /// Waiting out the delay to the next backend scrape boundary.
    Aligning,
    /// Issuing instant queries on the recurring cadence.
    Polling,
    /// Halted; no further queries or emissions.
    Stopped,
}

impl SubscriptionPhase {
    /// Phase name for logs and metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::CatchingUp => "catching_up",
            Self::Aligning => "aligning",
            Self::Polling => "polling",
            Self::Stopped => "stopped",
        }
    }
}

// =============================================================================
// Lifecycle State
// =============================================================================

/// Observable state of one running subscription.
///
/// Shared between the schedule task that drives the lifecycle and the
/// session that owns the schedule handle.
#[derive(Debug)]
pub struct SubscriptionState {
    phase: RwLock<SubscriptionPhase>,
    points_emitted: AtomicU64,
    failed_cycles: AtomicU64,
}

impl SubscriptionState {
    /// Create state in the `Created` phase with zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: RwLock::new(SubscriptionPhase::Created),
            points_emitted: AtomicU64::new(0),
            failed_cycles: AtomicU64::new(0),
        }
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> SubscriptionPhase {
        *self.phase.read()
    }

    /// Move to a new lifecycle phase.
    pub fn set_phase(&self, phase: SubscriptionPhase) {
        *self.phase.write() = phase;
    }

    /// Total points emitted by this subscription.
    #[must_use]
    pub fn points_emitted(&self) -> u64 {
        self.points_emitted.load(Ordering::Relaxed)
    }

    /// Record emitted points.
    pub fn record_points(&self, count: u64) {
        self.points_emitted.fetch_add(count, Ordering::Relaxed);
    }

    /// Total catch-up or poll cycles that failed against the backend.
    #[must_use]
    pub fn failed_cycles(&self) -> u64 {
        self.failed_cycles.load(Ordering::Relaxed)
    }

    /// Record one failed cycle.
    pub fn record_failed_cycle(&self) {
        self.failed_cycles.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for SubscriptionState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
