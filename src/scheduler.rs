//! Request Scheduler (§4.D)
//!
//! A bounded in-process queue: FIFO submission, a concurrency cap on
//! in-flight matrix computations, cooldown pacing between dispatch
//! batches, retry with backoff on retryable upstream failures, and
//! one-shot result delivery. All shared state lives behind a single
//! `std::sync::Mutex`, released around every blocking sleep and every
//! network call (spec §5).

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use tokio::sync::Notify;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{MatrixError, SubmitError};
use crate::types::{
    FormValues, Matrix, MatrixOutcome, MatrixParams, RequestStatus, SchedulerStats, StatusRecord,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Anything the scheduler can dispatch work to. Implemented by
/// [`crate::matrix::MatrixEngine`]; kept as a trait so the dispatch loop
/// and its tests don't need a live upstream client.
pub trait Worker: Send + Sync + 'static {
    fn invoke(&self, params: MatrixParams) -> BoxFuture<'static, Result<Matrix, MatrixError>>;
}

const MAX_ATTEMPTS: u32 = 3;
const PROCESSING_TIME_WINDOW: usize = 50;
const ABANDONMENT_WINDOW: usize = 100;
const DEFAULT_AVG_PROCESSING_SECS: f64 = 8.0;
const RESULT_TTL: Duration = Duration::from_secs(30 * 60);

struct QueuedItem {
    id: String,
    params: MatrixParams,
    form_values: FormValues,
    created_at: chrono::DateTime<Utc>,
    last_heartbeat: Instant,
    attempt: u32,
}

struct ProcessingItem {
    created_at: chrono::DateTime<Utc>,
    last_heartbeat: Instant,
    started_at: Instant,
}

struct ResultRecord {
    outcome: MatrixOutcome,
    stored_at: Instant,
    created_at: chrono::DateTime<Utc>,
}

struct Inner {
    queue: VecDeque<QueuedItem>,
    processing: HashMap<String, ProcessingItem>,
    /// Processing ids cancelled mid-flight. Consulted by `get_status`
    /// (so a cancelled processing request reads back as gone, not
    /// `Processing`) and by `run_one` (so the eventual result is
    /// dropped instead of stored).
    cancelled_processing: std::collections::HashSet<String>,
    results: HashMap<String, ResultRecord>,
    processing_times: VecDeque<f64>,
    abandonments: VecDeque<Instant>,
    cancellations_since_cleanup: usize,
}

impl Inner {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            processing: HashMap::new(),
            cancelled_processing: std::collections::HashSet::new(),
            results: HashMap::new(),
            processing_times: VecDeque::new(),
            abandonments: VecDeque::new(),
            cancellations_since_cleanup: 0,
        }
    }

    fn avg_processing_time(&self) -> f64 {
        if self.processing_times.is_empty() {
            return DEFAULT_AVG_PROCESSING_SECS;
        }
        self.processing_times.iter().sum::<f64>() / self.processing_times.len() as f64
    }

    fn record_processing_time(&mut self, secs: f64) {
        self.processing_times.push_back(secs);
        if self.processing_times.len() > PROCESSING_TIME_WINDOW {
            self.processing_times.pop_front();
        }
    }

    fn record_abandonment(&mut self) {
        self.abandonments.push_back(Instant::now());
        if self.abandonments.len() > ABANDONMENT_WINDOW {
            self.abandonments.pop_front();
        }
    }

    /// Count of abandonments recorded within the last `window`.
    fn abandonments_within(&self, window: Duration) -> usize {
        let now = Instant::now();
        self.abandonments
            .iter()
            .filter(|t| now.duration_since(**t) < window)
            .count()
    }
}

/// Predicted number of still-queued requests at `position` that will be
/// abandoned before reaching the front, per spec §4.D
/// `predicted_abandonments(pos)`: silent (0) unless at least 5
/// abandonments have landed in the last 30 minutes.
fn predicted_abandonments(position: i64, inner: &Inner) -> i64 {
    let recent = inner.abandonments_within(Duration::from_secs(1800)) as f64;
    if recent < 5.0 {
        return 0;
    }
    let rate = (recent / (position.max(10) as f64)).min(0.2);
    (position as f64 * rate * 0.5).floor() as i64
}

/// The bounded request scheduler described in spec §4.D.
pub struct Scheduler {
    inner: Arc<Mutex<Inner>>,
    config: SchedulerConfig,
    worker: Arc<dyn Worker>,
    notify: Arc<Notify>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, worker: Arc<dyn Worker>) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(Mutex::new(Inner::new())),
            config,
            worker,
            notify: Arc::new(Notify::new()),
        })
    }

    /// Spawn the background dispatch loop and the stale-queue reaper.
    /// Returns immediately; both tasks run for the lifetime of the
    /// returned `Arc<Scheduler>`.
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        if !self.config.enabled {
            warn!("scheduler disabled via configuration, background tasks not started");
            return;
        }
        let dispatch_handle = Arc::clone(self);
        tokio::spawn(async move { dispatch_handle.dispatch_loop().await });

        let reap_handle = Arc::clone(self);
        tokio::spawn(async move { reap_handle.reap_loop().await });
    }

    /// Enqueue a new matrix computation. Returns the generated request id.
    pub fn submit(&self, params: MatrixParams, form_values: FormValues) -> Result<String, SubmitError> {
        if !self.config.enabled {
            return Err(SubmitError::SchedulerDisabled);
        }
        let id = Uuid::new_v4().to_string();
        let mut inner = self.inner.lock().expect("scheduler mutex poisoned");
        inner.queue.push_back(QueuedItem {
            id: id.clone(),
            params,
            form_values,
            created_at: Utc::now(),
            last_heartbeat: Instant::now(),
            attempt: 0,
        });
        drop(inner);
        self.notify.notify_one();
        Ok(id)
    }

    /// Point-in-time status for a request id, across all three tables.
    pub fn get_status(&self, id: &str) -> Option<StatusRecord> {
        let inner = self.inner.lock().expect("scheduler mutex poisoned");

        if let Some(pos) = inner.queue.iter().position(|item| item.id == id) {
            let item = &inner.queue[pos];
            return Some(StatusRecord {
                status: RequestStatus::Queued,
                position: pos + 1,
                created_at: item.created_at,
                estimated_time: self.estimate_wait(&inner, pos),
                last_heartbeat_age: item.last_heartbeat.elapsed().as_secs_f64(),
                error_message: None,
            });
        }

        // A cancelled processing request is gone as far as callers are
        // concerned (spec §4.D `cancel` removes it from the status
        // table too); its entry lingers internally only so `run_one`
        // can still find `started_at` when the worker returns.
        if !inner.cancelled_processing.contains(id) {
            if let Some(item) = inner.processing.get(id) {
                return Some(StatusRecord {
                    status: RequestStatus::Processing,
                    position: 0,
                    created_at: item.created_at,
                    estimated_time: 0.0,
                    last_heartbeat_age: item.last_heartbeat.elapsed().as_secs_f64(),
                    error_message: None,
                });
            }
        }

        if let Some(record) = inner.results.get(id) {
            return Some(match &record.outcome {
                MatrixOutcome::Success { .. } => StatusRecord {
                    status: RequestStatus::Completed,
                    position: 0,
                    created_at: record.created_at,
                    estimated_time: 0.0,
                    last_heartbeat_age: 0.0,
                    error_message: None,
                },
                MatrixOutcome::Failure { error } => StatusRecord {
                    status: RequestStatus::Failed,
                    position: 0,
                    created_at: record.created_at,
                    estimated_time: 0.0,
                    last_heartbeat_age: 0.0,
                    error_message: Some(error.clone()),
                },
            });
        }

        None
    }

    /// Wait-time estimate for the queued item at `pos` (0-based), per
    /// spec §4.D: discount the raw position by a predicted abandonment
    /// count, then split the remainder into dispatch batches paced by
    /// the cooldown period.
    fn estimate_wait(&self, inner: &Inner, pos: usize) -> f64 {
        let position = (pos + 1) as i64;
        let max_concurrent = self.config.max_concurrent.max(1) as i64;
        let base = inner.avg_processing_time() + self.config.cooldown_period / max_concurrent as f64;

        let predicted = predicted_abandonments(position, inner);
        let effective_pos = (position - predicted).max(1);

        let mut batch = effective_pos / max_concurrent;
        let mut pib = effective_pos % max_concurrent;
        if pib == 0 {
            pib = max_concurrent;
            batch -= 1;
        }

        (batch as f64 * self.config.cooldown_period + pib as f64 * base).max(1.0)
    }

    /// Non-destructive peek used by handlers that still need the error
    /// message without consuming the one-shot result.
    pub fn peek_result(&self, id: &str) -> Option<MatrixOutcome> {
        let inner = self.inner.lock().expect("scheduler mutex poisoned");
        inner.results.get(id).map(|r| r.outcome.clone())
    }

    /// Atomically remove and return the terminal result for `id`, from
    /// whichever table currently holds it. Delivered exactly once.
    pub fn get_result(&self, id: &str) -> Option<MatrixOutcome> {
        let mut inner = self.inner.lock().expect("scheduler mutex poisoned");
        inner.results.remove(id).map(|r| r.outcome)
    }

    /// Record a heartbeat for a queued or processing request, extending
    /// its reap window.
    pub fn heartbeat(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().expect("scheduler mutex poisoned");
        if let Some(item) = inner.queue.iter_mut().find(|i| i.id == id) {
            item.last_heartbeat = Instant::now();
            return true;
        }
        if let Some(item) = inner.processing.get_mut(id) {
            item.last_heartbeat = Instant::now();
            return true;
        }
        false
    }

    /// Cancel a request. Queued requests are removed immediately and
    /// counted as an abandonment. Processing requests cannot be
    /// pre-empted: they're marked so their eventual result is dropped
    /// silently instead of stored.
    pub fn cancel(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().expect("scheduler mutex poisoned");
        if let Some(pos) = inner.queue.iter().position(|item| item.id == id) {
            inner.queue.remove(pos);
            inner.record_abandonment();
            inner.cancellations_since_cleanup += 1;
            self.maybe_force_cleanup(&mut inner);
            return true;
        }
        if inner.processing.contains_key(id) {
            inner.cancelled_processing.insert(id.to_string());
            return true;
        }
        false
    }

    pub fn stats(&self) -> SchedulerStats {
        let inner = self.inner.lock().expect("scheduler mutex poisoned");
        SchedulerStats {
            queued: inner.queue.len(),
            processing: inner.processing.len(),
            avg_processing_time: inner.avg_processing_time(),
            recent_abandonments: inner.abandonments_within(Duration::from_secs(3600)),
            queue_size: inner.queue.len(),
        }
    }

    /// Synchronously run both background reapers once: stale-queue
    /// eviction and terminal-result expiry (spec §4.D `force_cleanup`).
    /// Exposed for an explicit `/cleanup` endpoint and invoked
    /// automatically once `batch_cleanup_threshold` cancellations have
    /// accumulated.
    pub fn force_cleanup(&self) -> usize {
        let mut inner = self.inner.lock().expect("scheduler mutex poisoned");
        let reaped = self.reap_stale_queue(&mut inner);
        let expired = self.cleanup_terminal_expired(&mut inner);
        reaped + expired
    }

    /// Evict queued requests whose heartbeat has gone stale longer than
    /// `heartbeat_timeout`, recording an abandonment for each.
    fn reap_stale_queue(&self, inner: &mut Inner) -> usize {
        let timeout = Duration::from_secs_f64(self.config.heartbeat_timeout);
        let mut reaped = 0;
        inner.queue.retain(|item| {
            let stale = item.last_heartbeat.elapsed() > timeout;
            if stale {
                reaped += 1;
            }
            !stale
        });
        for _ in 0..reaped {
            inner.record_abandonment();
        }
        reaped
    }

    fn cleanup_terminal_expired(&self, inner: &mut Inner) -> usize {
        let now = Instant::now();
        let before = inner.results.len();
        inner
            .results
            .retain(|_, record| now.duration_since(record.stored_at) < RESULT_TTL);
        inner.cancellations_since_cleanup = 0;
        before - inner.results.len()
    }

    fn maybe_force_cleanup(&self, inner: &mut Inner) {
        if inner.cancellations_since_cleanup >= self.config.batch_cleanup_threshold {
            self.cleanup_terminal_expired(inner);
        }
    }

    /// Background dispatch loop: drains up to `max_concurrent` queued
    /// items per batch, runs them concurrently with retry-on-retryable
    /// semantics, then paces the next batch so its start is at least
    /// `cooldown_period` after this batch's start (spec §4.D steps 1-2):
    /// a batch that already ran longer than the cooldown gets no extra
    /// delay before the next one.
    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            let batch = self.drain_batch();
            if batch.is_empty() {
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
                self.idle_cleanup_tick();
                continue;
            }

            let batch_start = Instant::now();

            let mut handles = Vec::with_capacity(batch.len());
            for item in batch {
                let this = Arc::clone(&self);
                handles.push(tokio::spawn(async move { this.run_one(item).await }));
            }
            for handle in handles {
                let _ = handle.await;
            }

            let cooldown = Duration::from_secs_f64(self.config.cooldown_period);
            let elapsed = batch_start.elapsed();
            if elapsed < cooldown {
                tokio::time::sleep(cooldown - elapsed).await;
            }
        }
    }

    fn drain_batch(&self) -> Vec<QueuedItem> {
        let mut inner = self.inner.lock().expect("scheduler mutex poisoned");
        let capacity = self.config.max_concurrent.saturating_sub(inner.processing.len());
        let mut batch = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            match inner.queue.pop_front() {
                Some(item) => batch.push(item),
                None => break,
            }
        }
        for item in &batch {
            inner.processing.insert(
                item.id.clone(),
                ProcessingItem {
                    created_at: item.created_at,
                    last_heartbeat: Instant::now(),
                    started_at: Instant::now(),
                },
            );
        }
        batch
    }

    fn idle_cleanup_tick(&self) {
        let mut inner = self.inner.lock().expect("scheduler mutex poisoned");
        self.cleanup_terminal_expired(&mut inner);
    }

    /// Run one matrix computation, with up to [`MAX_ATTEMPTS`] tries on
    /// retryable failures (spec §4.D retry envelope), then store the
    /// terminal outcome — unless the request was cancelled mid-flight, in
    /// which case the result is dropped silently.
    async fn run_one(self: Arc<Self>, mut item: QueuedItem) {
        let outcome = loop {
            item.attempt += 1;
            match self.worker.invoke(item.params.clone()).await {
                Ok(matrix) => {
                    break MatrixOutcome::success(
                        matrix,
                        FormValues {
                            train: item.form_values.train.clone(),
                            date: item.form_values.date.clone(),
                        },
                    );
                }
                Err(err) => {
                    if err.is_retryable() && item.attempt < MAX_ATTEMPTS {
                        let backoff = retry_backoff_secs(item.attempt);
                        warn!(
                            request_id = %item.id,
                            attempt = item.attempt,
                            backoff_secs = backoff,
                            "retrying matrix computation after retryable upstream error"
                        );
                        tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                        continue;
                    }
                    break MatrixOutcome::failure(err.to_string());
                }
            }
        };

        let mut inner = self.inner.lock().expect("scheduler mutex poisoned");
        let processing = inner.processing.remove(&item.id);
        let cancelled = inner.cancelled_processing.remove(&item.id);

        // Only a successful completion counts toward the processing-time
        // average (spec §3 "the last 50 completions"); a failed or
        // cancelled-and-dropped run shouldn't skew `avg_processing_time`.
        if matches!(outcome, MatrixOutcome::Success { .. }) {
            if let Some(p) = &processing {
                inner.record_processing_time(p.started_at.elapsed().as_secs_f64());
            }
        }

        if cancelled {
            // Only cancellation of a *queued* request counts as an
            // abandonment (spec §3); this request was already
            // dispatched, so `Scheduler::cancel` recorded nothing and
            // neither do we — its result is simply dropped.
            info!(request_id = %item.id, "dropping result for cancelled request");
            return;
        }

        inner.results.insert(
            item.id.clone(),
            ResultRecord {
                outcome,
                stored_at: Instant::now(),
                created_at: item.created_at,
            },
        );
    }

    /// Evicts queued requests whose heartbeat has gone stale longer than
    /// `heartbeat_timeout`, so an abandoned browser tab doesn't hold a
    /// queue slot forever.
    async fn reap_loop(self: Arc<Self>) {
        let tick = Duration::from_secs_f64(self.config.cleanup_interval.max(1.0));
        loop {
            tokio::time::sleep(tick).await;
            let mut inner = self.inner.lock().expect("scheduler mutex poisoned");
            let reaped = self.reap_stale_queue(&mut inner);
            if reaped > 0 {
                warn!(count = reaped, "reaped stale queued requests");
            }
            self.cleanup_terminal_expired(&mut inner);
        }
    }
}

/// Jittered backoff for attempt `n` (1-based): `5 + 2n + uniform(0, 2)`
/// seconds, per spec §4.D.
fn retry_backoff_secs(attempt: u32) -> f64 {
    let jitter: f64 = rand::thread_rng().gen_range(0.0..2.0);
    5.0 + 2.0 * attempt as f64 + jitter
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyWorker {
        calls: AtomicUsize,
        fail_times: usize,
    }

    impl Worker for FlakyWorker {
        fn invoke(&self, params: MatrixParams) -> BoxFuture<'static, Result<Matrix, MatrixError>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let fail_times = self.fail_times;
            Box::pin(async move {
                if call < fail_times {
                    return Err(MatrixError::Upstream(
                        crate::error::UpstreamError::HighTraffic,
                    ));
                }
                Ok(Matrix {
                    train_model: params.train_model,
                    train_name: "Test Express".into(),
                    date: params.journey_date_display,
                    stations: vec!["A".into(), "B".into()],
                    seat_types: vec![],
                    fare_matrices: HashMap::new(),
                    has_data_map: HashMap::new(),
                    routes: vec![],
                    days: vec![],
                    total_duration: None,
                    station_dates: HashMap::new(),
                    station_dates_formatted: HashMap::new(),
                    has_segmented_dates: false,
                    next_day_str: None,
                    prev_day_str: None,
                })
            })
        }
    }

    struct AlwaysFailWorker;

    impl Worker for AlwaysFailWorker {
        fn invoke(&self, _params: MatrixParams) -> BoxFuture<'static, Result<Matrix, MatrixError>> {
            Box::pin(async { Err(MatrixError::NoSeatsAvailable) })
        }
    }

    fn params(model: &str) -> MatrixParams {
        MatrixParams {
            train_model: model.into(),
            train_form_value: format!("Test Express ({model})"),
            journey_date_display: "01-Jul-2025".into(),
            journey_date_api: "2025-07-01".into(),
            auth: Some(crate::types::AuthCredentials {
                token: "tok".into(),
                device_key: "dev".into(),
            }),
        }
    }

    fn form_values() -> FormValues {
        FormValues {
            train: "Test Express (726)".into(),
            date: "01-Jul-2025".into(),
        }
    }

    #[test]
    fn submit_assigns_queue_position() {
        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            Arc::new(AlwaysFailWorker),
        );
        let first = scheduler.submit(params("1"), form_values()).unwrap();
        let second = scheduler.submit(params("2"), form_values()).unwrap();
        assert_eq!(scheduler.get_status(&first).unwrap().position, 1);
        assert_eq!(scheduler.get_status(&second).unwrap().position, 2);
    }

    #[test]
    fn cancelling_a_queued_request_shifts_later_positions() {
        let scheduler = Scheduler::new(SchedulerConfig::default(), Arc::new(AlwaysFailWorker));
        let first = scheduler.submit(params("1"), form_values()).unwrap();
        let second = scheduler.submit(params("2"), form_values()).unwrap();
        assert!(scheduler.cancel(&first));
        assert_eq!(scheduler.get_status(&second).unwrap().position, 1);
        assert!(scheduler.get_status(&first).is_none());
    }

    #[tokio::test]
    async fn retryable_failure_succeeds_after_retries() {
        let worker = Arc::new(FlakyWorker {
            calls: AtomicUsize::new(0),
            fail_times: 2,
        });
        let scheduler = Scheduler {
            inner: Arc::new(Mutex::new(Inner::new())),
            config: SchedulerConfig {
                cooldown_period: 0.0,
                ..SchedulerConfig::default()
            },
            worker: worker.clone(),
            notify: Arc::new(Notify::new()),
        };
        let item = QueuedItem {
            id: "req-1".into(),
            params: params("726"),
            form_values: form_values(),
            created_at: Utc::now(),
            last_heartbeat: Instant::now(),
            attempt: 0,
        };
        {
            let mut inner = scheduler.inner.lock().unwrap();
            inner.processing.insert(
                "req-1".into(),
                ProcessingItem {
                    created_at: Utc::now(),
                    last_heartbeat: Instant::now(),
                    started_at: Instant::now(),
                },
            );
        }
        scheduler.run_one(item).await;
        let outcome = scheduler.get_result("req-1").unwrap();
        assert!(matches!(outcome, MatrixOutcome::Success { .. }));
        assert_eq!(worker.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancelled_processing_request_drops_result_silently() {
        let scheduler = Scheduler {
            inner: Arc::new(Mutex::new(Inner::new())),
            config: SchedulerConfig::default(),
            worker: Arc::new(AlwaysFailWorker),
            notify: Arc::new(Notify::new()),
        };
        let item = QueuedItem {
            id: "req-2".into(),
            params: params("726"),
            form_values: form_values(),
            created_at: Utc::now(),
            last_heartbeat: Instant::now(),
            attempt: 0,
        };
        {
            let mut inner = scheduler.inner.lock().unwrap();
            inner.processing.insert(
                "req-2".into(),
                ProcessingItem {
                    created_at: Utc::now(),
                    last_heartbeat: Instant::now(),
                    started_at: Instant::now(),
                },
            );
            inner.cancelled_processing.insert("req-2".into());
        }
        scheduler.run_one(item).await;
        assert!(scheduler.get_result("req-2").is_none());
    }

    #[test]
    fn cancelling_a_processing_request_makes_status_disappear() {
        let scheduler = Scheduler::new(SchedulerConfig::default(), Arc::new(AlwaysFailWorker));
        let id = "req-processing".to_string();
        {
            let mut inner = scheduler.inner.lock().unwrap();
            inner.processing.insert(
                id.clone(),
                ProcessingItem {
                    created_at: Utc::now(),
                    last_heartbeat: Instant::now(),
                    started_at: Instant::now(),
                },
            );
        }
        assert!(scheduler.get_status(&id).is_some());
        assert!(scheduler.cancel(&id));
        assert!(scheduler.get_status(&id).is_none());
    }

    #[test]
    fn result_is_delivered_exactly_once() {
        let scheduler = Scheduler {
            inner: Arc::new(Mutex::new(Inner::new())),
            config: SchedulerConfig::default(),
            worker: Arc::new(AlwaysFailWorker),
            notify: Arc::new(Notify::new()),
        };
        {
            let mut inner = scheduler.inner.lock().unwrap();
            inner.results.insert(
                "req-3".into(),
                ResultRecord {
                    outcome: MatrixOutcome::failure("boom"),
                    stored_at: Instant::now(),
                    created_at: Utc::now(),
                },
            );
        }
        assert!(scheduler.get_result("req-3").is_some());
        assert!(scheduler.get_result("req-3").is_none());
    }

    #[test]
    fn heartbeat_extends_reap_window() {
        let scheduler = Scheduler::new(SchedulerConfig::default(), Arc::new(AlwaysFailWorker));
        let id = scheduler.submit(params("726"), form_values()).unwrap();
        assert!(scheduler.heartbeat(&id));
        assert!(scheduler.get_status(&id).unwrap().last_heartbeat_age < 1.0);
    }

    #[test]
    fn stats_report_queue_and_processing_counts() {
        let scheduler = Scheduler::new(SchedulerConfig::default(), Arc::new(AlwaysFailWorker));
        scheduler.submit(params("1"), form_values()).unwrap();
        scheduler.submit(params("2"), form_values()).unwrap();
        let stats = scheduler.stats();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.queue_size, stats.queued);
    }

    #[test]
    fn predicted_abandonments_is_zero_below_threshold() {
        let mut inner = Inner::new();
        for _ in 0..4 {
            inner.record_abandonment();
        }
        assert_eq!(predicted_abandonments(50, &inner), 0);
    }

    #[test]
    fn predicted_abandonments_discounts_position_once_past_threshold() {
        let mut inner = Inner::new();
        for _ in 0..8 {
            inner.record_abandonment();
        }
        // recent=8, position=50: rate = min(0.2, 8/50) = 0.16; floor(50*0.16*0.5) = 4
        assert_eq!(predicted_abandonments(50, &inner), 4);
    }

    #[test]
    fn estimate_wait_matches_spec_formula_for_single_concurrency() {
        let scheduler = Scheduler::new(
            SchedulerConfig {
                max_concurrent: 1,
                cooldown_period: 3.0,
                ..SchedulerConfig::default()
            },
            Arc::new(AlwaysFailWorker),
        );
        let inner = scheduler.inner.lock().unwrap();
        // position=1, max_concurrent=1: batch=1, pib=0 -> pib=1, batch=0.
        // base = avg(8.0) + cooldown(3.0)/1 = 11.0; estimate = 0*3 + 1*11 = 11.
        assert_eq!(scheduler.estimate_wait(&inner, 0), 11.0);
    }

    #[test]
    fn estimate_wait_never_drops_below_one_second() {
        let scheduler = Scheduler::new(SchedulerConfig::default(), Arc::new(AlwaysFailWorker));
        let inner = scheduler.inner.lock().unwrap();
        assert!(scheduler.estimate_wait(&inner, 0) >= 1.0);
    }

    #[test]
    fn recent_abandonments_in_stats_ignores_entries_older_than_an_hour() {
        let mut inner = Inner::new();
        inner.abandonments.push_back(Instant::now() - Duration::from_secs(3700));
        inner.abandonments.push_back(Instant::now());
        assert_eq!(inner.abandonments_within(Duration::from_secs(3600)), 1);
    }

    #[test]
    fn force_cleanup_reaps_stale_queue_entries() {
        let scheduler = Scheduler::new(
            SchedulerConfig {
                heartbeat_timeout: 0.0,
                ..SchedulerConfig::default()
            },
            Arc::new(AlwaysFailWorker),
        );
        let id = scheduler.submit(params("726"), form_values()).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        scheduler.force_cleanup();
        assert!(scheduler.get_status(&id).is_none());
    }

    #[tokio::test]
    async fn completed_status_retains_original_created_at() {
        let scheduler = Scheduler {
            inner: Arc::new(Mutex::new(Inner::new())),
            config: SchedulerConfig::default(),
            worker: Arc::new(FlakyWorker {
                calls: AtomicUsize::new(0),
                fail_times: 0,
            }),
            notify: Arc::new(Notify::new()),
        };
        let created_at = Utc::now() - chrono::Duration::minutes(5);
        let item = QueuedItem {
            id: "req-created-at".into(),
            params: params("726"),
            form_values: form_values(),
            created_at,
            last_heartbeat: Instant::now(),
            attempt: 0,
        };
        {
            let mut inner = scheduler.inner.lock().unwrap();
            inner.processing.insert(
                "req-created-at".into(),
                ProcessingItem {
                    created_at,
                    last_heartbeat: Instant::now(),
                    started_at: Instant::now(),
                },
            );
        }
        scheduler.run_one(item).await;
        let status = scheduler.get_status("req-created-at").unwrap();
        assert_eq!(status.status, RequestStatus::Completed);
        assert_eq!(status.created_at, created_at);
    }

    #[tokio::test]
    async fn failed_run_does_not_skew_avg_processing_time() {
        let scheduler = Scheduler {
            inner: Arc::new(Mutex::new(Inner::new())),
            config: SchedulerConfig::default(),
            worker: Arc::new(AlwaysFailWorker),
            notify: Arc::new(Notify::new()),
        };
        let item = QueuedItem {
            id: "req-fail".into(),
            params: params("726"),
            form_values: form_values(),
            created_at: Utc::now(),
            last_heartbeat: Instant::now(),
            attempt: 0,
        };
        {
            let mut inner = scheduler.inner.lock().unwrap();
            inner.processing.insert(
                "req-fail".into(),
                ProcessingItem {
                    created_at: Utc::now(),
                    last_heartbeat: Instant::now(),
                    started_at: Instant::now(),
                },
            );
        }
        scheduler.run_one(item).await;
        let stats = scheduler.stats();
        assert_eq!(stats.avg_processing_time, DEFAULT_AVG_PROCESSING_SECS);
    }

}
