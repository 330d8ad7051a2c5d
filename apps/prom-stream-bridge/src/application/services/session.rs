//! Client Session
//!
//! Owns the named subscriptions of one client connection.
//!
//! # Design
//!
//! A session is created when a connection is accepted and lives until
//! the connection goes away. It maps subscription IDs to the owned
//! [`ScheduleHandle`]s driving them, so control messages operate on
//! exactly one place:
//!
//! - `start` inserts a new schedule, ignoring duplicates of an active ID
//! - `stop` removes and cancels one schedule, ignoring unknown IDs
//! - `reset` removes and cancels everything
//!
//! Dropping the session cancels any remaining schedules, so no timer
//! can outlive its connection.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::application::ports::{MetricsBackend, PointSink};
use crate::application::services::scheduler::{
    ScheduleHandle, SchedulerConfig, SubscriptionScheduler,
};
use crate::domain::subscription::{
    StartRequest, SubscriptionDefaults, SubscriptionPhase, SubscriptionSpec,
};

// =============================================================================
// Session
// =============================================================================

/// The subscriptions of one client connection, keyed by ID.
#[derive(Debug)]
pub struct Session {
    scheduler: SubscriptionScheduler,
    defaults: SubscriptionDefaults,
    subscriptions: Mutex<HashMap<String, ScheduleHandle>>,
}

impl Session {
    /// Create an empty session for one connection.
    #[must_use]
    pub fn new(
        backend: Arc<dyn MetricsBackend>,
        sink: Arc<dyn PointSink>,
        config: SchedulerConfig,
        defaults: SubscriptionDefaults,
    ) -> Self {
        Self {
            scheduler: SubscriptionScheduler::new(backend, sink, config),
            defaults,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Handle a `start` control message.
    ///
    /// Builds the subscription and spawns its schedule, returning `true`
    /// if a new schedule started. A `start` for an ID that is already
    /// active is ignored and returns `false`; the running schedule keeps
    /// its original parameters.
    pub fn start_subscription(&self, request: StartRequest) -> bool {
        let spec = SubscriptionSpec::from_request(request, &self.defaults);
        let mut subscriptions = self.subscriptions.lock();

        match subscriptions.entry(spec.id.clone()) {
            Entry::Occupied(_) => {
                tracing::info!(subscription = %spec.id, "Subscription already active, ignoring start");
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(self.scheduler.spawn(spec));
                true
            }
        }
    }

    /// Handle a `stop` control message.
    ///
    /// Cancels and removes the schedule for `id`, returning `true` if
    /// one was active. Unknown IDs are ignored.
    pub fn stop_subscription(&self, id: &str) -> bool {
        let removed = self.subscriptions.lock().remove(id);
        match removed {
            Some(handle) => {
                handle.cancel();
                tracing::info!(subscription = %id, "Subscription stopped");
                true
            }
            None => {
                tracing::debug!(subscription = %id, "Stop for unknown subscription ignored");
                false
            }
        }
    }

    /// Handle a `reset` control message: cancel and remove every
    /// subscription of this session, returning how many were stopped.
    pub fn reset(&self) -> usize {
        let drained = std::mem::take(&mut *self.subscriptions.lock());
        let count = drained.len();
        for handle in drained.into_values() {
            handle.cancel();
        }

        if count > 0 {
            tracing::info!(count, "Session reset, all subscriptions stopped");
        }
        count
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Whether `id` names an active subscription.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.subscriptions.lock().contains_key(id)
    }

    /// IDs of all active subscriptions, sorted for stable output.
    #[must_use]
    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.subscriptions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Current phase of the subscription `id`, if active.
    #[must_use]
    pub fn phase_of(&self, id: &str) -> Option<SubscriptionPhase> {
        self.subscriptions.lock().get(id).map(ScheduleHandle::phase)
    }

    /// Aggregate counters across all active subscriptions.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        let subscriptions = self.subscriptions.lock();
        let mut stats = SessionStats {
            active_subscriptions: subscriptions.len(),
            points_emitted: 0,
            failed_cycles: 0,
        };
        for handle in subscriptions.values() {
            stats.points_emitted += handle.state().points_emitted();
            stats.failed_cycles += handle.state().failed_cycles();
        }
        stats
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reset();
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Aggregated counters for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    /// Number of active subscriptions.
    pub active_subscriptions: usize,
    /// Points emitted across active subscriptions.
    pub points_emitted: u64,
    /// Failed backend cycles across active subscriptions.
    pub failed_cycles: u64,
}
