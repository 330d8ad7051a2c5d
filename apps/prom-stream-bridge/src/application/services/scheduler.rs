//! Subscription Scheduler
//!
//! Drives a single subscription through its polling lifecycle:
//! catch-up, alignment, then recurring instant queries.
//!
//! # Design
//!
//! Each subscription runs as one spawned task owned by a
//! [`ScheduleHandle`]. The task:
//!
//! 1. Replays the catch-up window with one range query and emits every
//!    returned sample in backend order
//! 2. Sleeps until just past the backend's next scrape boundary,
//!    estimated from the newest catch-up sample
//! 3. Issues one immediate instant query, then repeats it on the
//!    subscription's step cadence
//!
//! Backend failures never retry and never tear the schedule down: the
//! failing cycle emits nothing and the cadence carries on. Cancelling
//! the handle stops the schedule at the next await point; a response
//! already in flight when cancellation lands is discarded unread.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{MetricsBackend, PointSink};
use crate::domain::point::{SeriesRow, normalize};
use crate::domain::subscription::{SubscriptionPhase, SubscriptionSpec, SubscriptionState};

// =============================================================================
// Configuration
// =============================================================================

/// Default safety margin added to every alignment delay.
pub const DEFAULT_POLL_MARGIN: Duration = Duration::from_millis(200);

/// Tuning knobs shared by all schedules of a session.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Safety margin added to the alignment delay so the first poll
    /// lands after the backend's next scrape, not on it.
    pub poll_margin: Duration,
}

impl SchedulerConfig {
    /// Create a configuration with an explicit margin.
    #[must_use]
    pub const fn new(poll_margin: Duration) -> Self {
        Self { poll_margin }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_MARGIN)
    }
}

// =============================================================================
// Alignment
// =============================================================================

/// Delay between finishing catch-up and the first instant poll.
///
/// Estimates when the backend will produce its next sample by adding
/// one `step` to the newest catch-up timestamp, then waits out the
/// remainder plus `margin`. Without a reference sample the delay is a
/// full step plus `margin`. Never less than `margin`, even when the
/// newest sample is already older than one step.
#[must_use]
pub fn alignment_delay(
    step: Duration,
    latest_sample_secs: Option<f64>,
    now_ms: i64,
    margin: Duration,
) -> Duration {
    let step_ms = i64::try_from(step.as_millis()).unwrap_or(i64::MAX);

    #[allow(clippy::cast_possible_truncation)]
    let elapsed_ms = latest_sample_secs.map_or(0, |secs| {
        let sample_ms = (secs * 1000.0) as i64;
        now_ms.saturating_sub(sample_ms)
    });

    let remaining_ms = step_ms.saturating_sub(elapsed_ms).max(0);
    margin + Duration::from_millis(u64::try_from(remaining_ms).unwrap_or(0))
}

// =============================================================================
// Schedule Handle
// =============================================================================

/// Owned handle to one running subscription schedule.
///
/// The handle is the only way to reach a schedule after it is spawned.
/// Dropping it cancels the schedule, so a handle removed from a session
/// map can never fire again.
#[derive(Debug)]
pub struct ScheduleHandle {
    spec: Arc<SubscriptionSpec>,
    state: Arc<SubscriptionState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ScheduleHandle {
    /// Parameters this schedule was started with.
    #[must_use]
    pub fn spec(&self) -> &SubscriptionSpec {
        &self.spec
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> SubscriptionPhase {
        self.state.phase()
    }

    /// Lifecycle counters for this schedule.
    #[must_use]
    pub fn state(&self) -> &SubscriptionState {
        &self.state
    }

    /// Request the schedule to stop at its next await point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the schedule task has fully exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ScheduleHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Spawns subscription schedules against one backend and one sink.
pub struct SubscriptionScheduler {
    backend: Arc<dyn MetricsBackend>,
    sink: Arc<dyn PointSink>,
    config: SchedulerConfig,
}

impl SubscriptionScheduler {
    /// Create a scheduler for one client connection.
    #[must_use]
    pub fn new(
        backend: Arc<dyn MetricsBackend>,
        sink: Arc<dyn PointSink>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            backend,
            sink,
            config,
        }
    }

    /// Spawn the schedule task for `spec` and return its owning handle.
    #[must_use]
    pub fn spawn(&self, spec: SubscriptionSpec) -> ScheduleHandle {
        let spec = Arc::new(spec);
        let state = Arc::new(SubscriptionState::new());
        let cancel = CancellationToken::new();

        let runner = ScheduleRunner {
            spec: Arc::clone(&spec),
            state: Arc::clone(&state),
            backend: Arc::clone(&self.backend),
            sink: Arc::clone(&self.sink),
            margin: self.config.poll_margin,
            cancel: cancel.clone(),
        };

        tracing::info!(
            subscription = %spec.id,
            query = %spec.query,
            step_secs = spec.step_secs,
            history_secs = spec.history_secs,
            "Subscription schedule started"
        );

        let task = tokio::spawn(runner.run());

        ScheduleHandle {
            spec,
            state,
            cancel,
            task,
        }
    }
}

impl std::fmt::Debug for SubscriptionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionScheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Schedule Runner
// =============================================================================

/// Task-side half of one schedule.
struct ScheduleRunner {
    spec: Arc<SubscriptionSpec>,
    state: Arc<SubscriptionState>,
    backend: Arc<dyn MetricsBackend>,
    sink: Arc<dyn PointSink>,
    margin: Duration,
    cancel: CancellationToken,
}

impl ScheduleRunner {
    /// Run the lifecycle until cancelled.
    async fn run(self) {
        self.state.set_phase(SubscriptionPhase::CatchingUp);
        let latest = if self.spec.catch_up_enabled() {
            self.catch_up().await
        } else {
            None
        };

        if self.cancel.is_cancelled() {
            self.state.set_phase(SubscriptionPhase::Stopped);
            return;
        }

        self.state.set_phase(SubscriptionPhase::Aligning);
        let delay = alignment_delay(
            self.spec.step(),
            latest,
            Utc::now().timestamp_millis(),
            self.margin,
        );
        tracing::debug!(
            subscription = %self.spec.id,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Aligning to next scrape boundary"
        );

        tokio::select! {
            () = self.cancel.cancelled() => {
                self.state.set_phase(SubscriptionPhase::Stopped);
                return;
            }
            () = tokio::time::sleep(delay) => {}
        }

        self.state.set_phase(SubscriptionPhase::Polling);
        let mut interval = tokio::time::interval(self.spec.step());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // The first tick completes immediately, giving the poll that
        // follows alignment without an extra step of latency.
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.poll_once().await;
                }
            }
        }

        self.state.set_phase(SubscriptionPhase::Stopped);
        tracing::debug!(subscription = %self.spec.id, "Subscription schedule stopped");
    }

    /// Replay the catch-up window. Returns the newest emitted sample
    /// timestamp, if any.
    async fn catch_up(&self) -> Option<f64> {
        let end = Utc::now();
        let history = i64::try_from(self.spec.history_secs).unwrap_or(i64::MAX);
        // Windows too large for the calendar saturate to the epoch.
        let start = TimeDelta::try_seconds(history)
            .and_then(|window| end.checked_sub_signed(window))
            .unwrap_or(DateTime::UNIX_EPOCH);

        let result = self
            .backend
            .query_range(&self.spec.query, start, end, self.spec.step_secs)
            .await;

        match result {
            Ok(rows) => {
                if self.cancel.is_cancelled() {
                    return None;
                }
                let (points, latest) = self.emit_rows(&rows);
                tracing::debug!(subscription = %self.spec.id, points, "Catch-up complete");
                latest
            }
            Err(error) => {
                self.state.record_failed_cycle();
                tracing::debug!(subscription = %self.spec.id, %error, "Catch-up query failed");
                None
            }
        }
    }

    /// Run one instant query cycle.
    async fn poll_once(&self) {
        match self.backend.query_instant(&self.spec.query).await {
            Ok(rows) => {
                if self.cancel.is_cancelled() {
                    return;
                }
                let (points, _) = self.emit_rows(&rows);
                tracing::trace!(subscription = %self.spec.id, points, "Poll cycle complete");
            }
            Err(error) => {
                self.state.record_failed_cycle();
                tracing::debug!(subscription = %self.spec.id, %error, "Poll query failed");
            }
        }
    }

    /// Normalize and emit every sample of every row, in backend order.
    fn emit_rows(&self, rows: &[SeriesRow]) -> (u64, Option<f64>) {
        let mut emitted = 0u64;
        let mut latest: Option<f64> = None;

        for row in rows {
            for sample in &row.samples {
                let point = normalize(&row.labels, sample, &self.spec);
                self.sink.emit(&point);
                emitted += 1;
                latest = Some(latest.map_or(sample.timestamp, |t| t.max(sample.timestamp)));
            }
        }

        if emitted > 0 {
            self.state.record_points(emitted);
        }
        (emitted, latest)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;
    use proptest::prelude::*;

    use super::*;
    use crate::application::ports::BackendError;
    use crate::domain::point::{Point, Sample};
    use crate::domain::subscription::{StartRequest, SubscriptionDefaults};

    // ======== Alignment delay ========

    const MARGIN: Duration = Duration::from_millis(200);

    #[test]
    fn alignment_without_samples_waits_a_full_step() {
        let delay = alignment_delay(Duration::from_secs(5), None, 1_000_000, MARGIN);
        assert_eq!(delay, Duration::from_millis(5200));
    }

    #[test]
    fn alignment_waits_out_the_remainder_of_a_step() {
        // Newest sample 2s old with a 5s step leaves 3s to the boundary.
        let delay = alignment_delay(Duration::from_secs(5), Some(98.0), 100_000, MARGIN);
        assert_eq!(delay, Duration::from_millis(3200));
    }

    #[test]
    fn alignment_clamps_to_margin_for_stale_samples() {
        // Newest sample a full minute old; the boundary already passed.
        let delay = alignment_delay(Duration::from_secs(5), Some(40.0), 100_000, MARGIN);
        assert_eq!(delay, MARGIN);
    }

    #[test]
    fn alignment_at_exact_boundary_leaves_only_margin() {
        let delay = alignment_delay(Duration::from_secs(5), Some(95.0), 100_000, MARGIN);
        assert_eq!(delay, MARGIN);
    }

    #[test]
    fn alignment_handles_fractional_timestamps() {
        // Sample at 97.5s, now 100s: 2.5s elapsed of a 5s step.
        let delay = alignment_delay(Duration::from_secs(5), Some(97.5), 100_000, MARGIN);
        assert_eq!(delay, Duration::from_millis(2700));
    }

    #[test]
    fn alignment_extends_past_a_step_for_future_samples() {
        // Clock skew: sample stamped 1s ahead of now.
        let delay = alignment_delay(Duration::from_secs(5), Some(101.0), 100_000, MARGIN);
        assert_eq!(delay, Duration::from_millis(6200));
    }

    #[test]
    fn alignment_with_zero_margin() {
        let delay = alignment_delay(Duration::from_secs(5), None, 1_000_000, Duration::ZERO);
        assert_eq!(delay, Duration::from_secs(5));
    }

    proptest! {
        #[test]
        fn alignment_never_undershoots_the_margin(
            step_secs in 1u64..3600,
            latest in proptest::option::of(0.0f64..2_000_000_000.0),
            now_ms in 0i64..2_000_000_000_000,
            margin_ms in 0u64..10_000,
        ) {
            let delay = alignment_delay(
                Duration::from_secs(step_secs),
                latest,
                now_ms,
                Duration::from_millis(margin_ms),
            );
            prop_assert!(delay >= Duration::from_millis(margin_ms));
        }
    }

    // ======== Schedule lifecycle ========

    struct StubBackend {
        range_result: Result<Vec<SeriesRow>, BackendError>,
        instant_result: Result<Vec<SeriesRow>, BackendError>,
        response_delay: Option<Duration>,
        range_calls: AtomicU64,
        instant_calls: AtomicU64,
    }

    impl StubBackend {
        fn new(
            range_result: Result<Vec<SeriesRow>, BackendError>,
            instant_result: Result<Vec<SeriesRow>, BackendError>,
        ) -> Self {
            Self {
                range_result,
                instant_result,
                response_delay: None,
                range_calls: AtomicU64::new(0),
                instant_calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl MetricsBackend for StubBackend {
        async fn query_range(
            &self,
            _query: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _step_secs: u64,
        ) -> Result<Vec<SeriesRow>, BackendError> {
            self.range_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.response_delay {
                tokio::time::sleep(delay).await;
            }
            self.range_result.clone()
        }

        async fn query_instant(&self, _query: &str) -> Result<Vec<SeriesRow>, BackendError> {
            self.instant_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.response_delay {
                tokio::time::sleep(delay).await;
            }
            self.instant_result.clone()
        }
    }

    #[derive(Default)]
    struct CaptureSink {
        points: Mutex<Vec<Point>>,
    }

    impl PointSink for CaptureSink {
        fn emit(&self, point: &Point) {
            self.points.lock().push(point.clone());
        }
    }

    // History rides in through the defaults because a request value of
    // zero falls back to them; zero here really disables catch-up.
    fn spec(id: &str, step: i64, history: u64) -> SubscriptionSpec {
        SubscriptionSpec::from_request(
            StartRequest {
                id: Some(id.to_string()),
                query: "up".to_string(),
                metrics: vec!["namespace".to_string()],
                step: Some(step),
                history: None,
            },
            &SubscriptionDefaults::new(5, history),
        )
    }

    fn row(samples: &[(f64, &str)]) -> SeriesRow {
        let mut labels = HashMap::new();
        labels.insert("namespace".to_string(), "default".to_string());
        labels.insert("pod".to_string(), "api-1".to_string());
        SeriesRow {
            labels,
            samples: samples
                .iter()
                .map(|(t, v)| Sample {
                    timestamp: *t,
                    value: (*v).to_string(),
                })
                .collect(),
        }
    }

    fn scheduler(backend: Arc<StubBackend>, sink: Arc<CaptureSink>) -> SubscriptionScheduler {
        SubscriptionScheduler::new(backend, sink, SchedulerConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn catch_up_emits_samples_in_backend_order() {
        let backend = Arc::new(StubBackend::new(
            Ok(vec![row(&[(100.0, "1"), (105.0, "2")])]),
            Ok(vec![]),
        ));
        let sink = Arc::new(CaptureSink::default());
        let handle = scheduler(Arc::clone(&backend), Arc::clone(&sink)).spawn(spec("a", 5, 60));

        tokio::time::sleep(Duration::from_millis(50)).await;

        let points = sink.points.lock().clone();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].t, 100.0);
        assert_eq!(points[0].v, "1");
        assert_eq!(points[1].t, 105.0);
        assert_eq!(points[1].v, "2");
        assert_eq!(handle.state().points_emitted(), 2);
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn polling_starts_after_alignment() {
        let backend = Arc::new(StubBackend::new(Ok(vec![]), Ok(vec![row(&[(7.0, "9")])])));
        let sink = Arc::new(CaptureSink::default());
        let handle = scheduler(Arc::clone(&backend), Arc::clone(&sink)).spawn(spec("a", 5, 0));

        // history 0 skips catch-up, so alignment is a full step.
        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert_eq!(handle.phase(), SubscriptionPhase::Aligning);
        assert_eq!(backend.instant_calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(handle.phase(), SubscriptionPhase::Polling);
        assert_eq!(backend.instant_calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.points.lock().len(), 1);

        // Next poll lands one step later.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(backend.instant_calls.load(Ordering::SeqCst), 2);
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_catch_up_keeps_the_schedule_alive() {
        let backend = Arc::new(StubBackend::new(
            Err(BackendError::Request {
                message: "HTTP 500".to_string(),
            }),
            Ok(vec![row(&[(7.0, "9")])]),
        ));
        let sink = Arc::new(CaptureSink::default());
        let handle = scheduler(Arc::clone(&backend), Arc::clone(&sink)).spawn(spec("a", 5, 60));

        tokio::time::sleep(Duration::from_millis(5300)).await;

        assert_eq!(handle.phase(), SubscriptionPhase::Polling);
        assert_eq!(handle.state().failed_cycles(), 1);
        assert_eq!(sink.points.lock().len(), 1);
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_history_window_still_reaches_polling() {
        let backend = Arc::new(StubBackend::new(Ok(vec![]), Ok(vec![row(&[(7.0, "9")])])));
        let sink = Arc::new(CaptureSink::default());
        let spec = SubscriptionSpec::from_request(
            StartRequest {
                id: Some("a".to_string()),
                query: "up".to_string(),
                metrics: vec![],
                step: Some(5),
                history: Some(i64::MAX),
            },
            &SubscriptionDefaults::new(5, 60),
        );
        let handle = scheduler(Arc::clone(&backend), Arc::clone(&sink)).spawn(spec);

        // Catch-up clamps the window instead of dying, so the schedule
        // aligns and polls as usual.
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(handle.phase(), SubscriptionPhase::Polling);
        assert_eq!(backend.range_calls.load(Ordering::SeqCst), 1);
        assert!(backend.instant_calls.load(Ordering::SeqCst) >= 1);
        assert_eq!(sink.points.lock().len(), 1);
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_polls_do_not_stop_the_cadence() {
        let backend = Arc::new(StubBackend::new(
            Ok(vec![]),
            Err(BackendError::Request {
                message: "HTTP 502".to_string(),
            }),
        ));
        let sink = Arc::new(CaptureSink::default());
        let handle = scheduler(Arc::clone(&backend), Arc::clone(&sink)).spawn(spec("a", 5, 0));

        tokio::time::sleep(Duration::from_secs(17)).await;

        assert_eq!(handle.phase(), SubscriptionPhase::Polling);
        assert!(backend.instant_calls.load(Ordering::SeqCst) >= 3);
        assert!(sink.points.lock().is_empty());
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_the_schedule() {
        let backend = Arc::new(StubBackend::new(Ok(vec![]), Ok(vec![row(&[(7.0, "9")])])));
        let sink = Arc::new(CaptureSink::default());
        let handle = scheduler(Arc::clone(&backend), Arc::clone(&sink)).spawn(spec("a", 5, 0));

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(handle.phase(), SubscriptionPhase::Stopped);
        assert!(handle.is_finished());

        // No further polls after stopping.
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(backend.instant_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn response_arriving_after_cancel_is_discarded() {
        let mut backend = StubBackend::new(Ok(vec![row(&[(100.0, "1")])]), Ok(vec![]));
        backend.response_delay = Some(Duration::from_secs(10));
        let backend = Arc::new(backend);
        let sink = Arc::new(CaptureSink::default());
        let handle = scheduler(Arc::clone(&backend), Arc::clone(&sink)).spawn(spec("a", 5, 60));

        // Let the catch-up request get in flight, then cancel.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.range_calls.load(Ordering::SeqCst), 1);
        handle.cancel();

        // The response lands well after cancellation.
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(sink.points.lock().is_empty());
        assert_eq!(handle.phase(), SubscriptionPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_cancels_the_schedule() {
        let backend = Arc::new(StubBackend::new(Ok(vec![]), Ok(vec![row(&[(7.0, "9")])])));
        let sink = Arc::new(CaptureSink::default());
        let handle = scheduler(Arc::clone(&backend), Arc::clone(&sink)).spawn(spec("a", 5, 0));

        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(handle);
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(backend.instant_calls.load(Ordering::SeqCst), 0);
        assert!(sink.points.lock().is_empty());
    }
}
