//! Activity lifecycle: start, reconfigure, stop and await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use uuid::Uuid;

use cyclegen_core::metrics::ACTIVE_WORKERS;
use cyclegen_core::{
    ActivityConfig, CoreError, CoreResult, CycleRange, DriverAdapter, OpDispenser, ParamMap,
    RateSpec,
};

use crate::activity::Activity;
use crate::input::Input;
use crate::ratelimit::RateLimiter;
use crate::sequence::OpSequence;
use crate::tracker::{CompletionTracker, TrackerSnapshot};
use crate::worker::{run_worker, WorkerState};

/// Activity lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    Initialized,
    Running,
    Stopping,
    /// Stopped on request, on timeout or by `erroroncycle`.
    Stopped,
    /// Every cycle was processed.
    Finished,
    /// Stopped by a fatal engine error or an error handler `stop`.
    Errored,
}

impl ActivityState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Finished | Self::Errored)
    }
}

/// Why an activity ended. The first reason given wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    Requested(String),
    ErrorOnCycle(u64),
    ErrorHandler(String),
    Timeout(Duration),
    Fatal(String),
}

impl StopReason {
    fn terminal_state(&self) -> ActivityState {
        match self {
            Self::Completed => ActivityState::Finished,
            Self::Requested(_) | Self::ErrorOnCycle(_) | Self::Timeout(_) => ActivityState::Stopped,
            Self::ErrorHandler(_) | Self::Fatal(_) => ActivityState::Errored,
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => f.write_str("all cycles completed"),
            Self::Requested(why) => write!(f, "stop requested: {why}"),
            Self::ErrorOnCycle(cycle) => write!(f, "injected error on cycle {cycle}"),
            Self::ErrorHandler(why) => write!(f, "stopped by error handler: {why}"),
            Self::Timeout(after) => write!(f, "max runtime of {after:?} reached"),
            Self::Fatal(why) => write!(f, "fatal engine error: {why}"),
        }
    }
}

/// Result of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct ActivitySummary {
    pub run_id: Uuid,
    pub alias: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub state: ActivityState,
    pub reason: Option<StopReason>,
    pub counts: TrackerSnapshot,
    pub elapsed: Duration,
    /// Completed cycles per second of elapsed time.
    pub achieved_rate: f64,
}

#[derive(Default)]
struct Lifecycle {
    running: usize,
    finalized: bool,
    workers: HashMap<usize, AbortHandle>,
    cells: Vec<Arc<AtomicU8>>,
    timers: Vec<AbortHandle>,
    started: Option<(DateTime<Utc>, Instant)>,
    ended: Option<(DateTime<Utc>, Instant)>,
}

/// State shared by the controller and its workers.
pub(crate) struct ActivityShared {
    pub(crate) alias: String,
    pub(crate) run_id: Uuid,
    pub(crate) config: RwLock<Arc<ActivityConfig>>,
    pub(crate) config_version: AtomicU64,
    pub(crate) target_threads: AtomicUsize,
    pub(crate) input: Arc<dyn Input>,
    pub(crate) sequence: OpSequence<Arc<dyn OpDispenser>>,
    pub(crate) limiter: RateLimiter,
    pub(crate) tracker: CompletionTracker,
    adapter: Arc<dyn DriverAdapter>,
    stop_tx: watch::Sender<bool>,
    state_tx: watch::Sender<ActivityState>,
    stop_reason: Mutex<Option<StopReason>>,
    lifecycle: Mutex<Lifecycle>,
    runtime: Mutex<Option<Handle>>,
}

impl ActivityShared {
    pub(crate) fn config(&self) -> Arc<ActivityConfig> {
        self.config.read().clone()
    }

    pub(crate) fn subscribe_stop(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    pub(crate) fn is_stopping(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Records the first stop reason, halts new claims and arms the grace
    /// timer. Later calls are no-ops.
    pub(crate) fn request_stop(self: &Arc<Self>, reason: StopReason) {
        {
            let mut current = self.stop_reason.lock();
            if current.is_some() {
                return;
            }
            *current = Some(reason.clone());
        }
        match &reason {
            StopReason::Fatal(_) | StopReason::ErrorHandler(_) => {
                tracing::error!(activity = %self.alias, reason = %reason, "Stopping activity");
            }
            _ => tracing::info!(activity = %self.alias, reason = %reason, "Stopping activity"),
        }
        self.stop_tx.send_replace(true);
        self.state_tx.send_if_modified(|state| {
            if state.is_terminal() || *state == ActivityState::Stopping {
                return false;
            }
            *state = ActivityState::Stopping;
            true
        });

        let idle = {
            let mut lifecycle = self.lifecycle.lock();
            let idle = lifecycle.running == 0 && !lifecycle.finalized;
            if idle {
                lifecycle.finalized = true;
            }
            idle
        };
        if idle {
            self.finalize(Vec::new());
            return;
        }

        let grace = self.config().grace;
        if let Some(runtime) = self.runtime.lock().clone() {
            let shared = Arc::clone(self);
            let timer = runtime.spawn(async move {
                tokio::time::sleep(grace).await;
                shared.abort_workers();
            });
            self.lifecycle.lock().timers.push(timer.abort_handle());
        }
    }

    fn abort_workers(&self) {
        let handles: Vec<AbortHandle> = self.lifecycle.lock().workers.values().cloned().collect();
        if !handles.is_empty() {
            tracing::warn!(
                activity = %self.alias,
                workers = handles.len(),
                "Grace period expired, interrupting workers"
            );
        }
        for handle in handles {
            handle.abort();
        }
    }

    /// Spawns every missing slot below the target thread count.
    fn spawn_missing(self: &Arc<Self>, runtime: &Handle) {
        let target = self.target_threads.load(Ordering::Acquire);
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.finalized || self.is_stopping() {
            return;
        }
        for slot in 0..target {
            if lifecycle.workers.contains_key(&slot) {
                continue;
            }
            while lifecycle.cells.len() <= slot {
                lifecycle
                    .cells
                    .push(Arc::new(AtomicU8::new(WorkerState::Idle as u8)));
            }
            let cell = Arc::clone(&lifecycle.cells[slot]);
            cell.store(WorkerState::Idle as u8, Ordering::Release);
            lifecycle.running += 1;
            let handle = runtime.spawn(run_worker(Arc::clone(self), slot, cell));
            lifecycle.workers.insert(slot, handle.abort_handle());
            ACTIVE_WORKERS.with_label_values(&[&self.alias]).inc();
            tracing::debug!(activity = %self.alias, slot, "Worker started");
        }
    }

    /// Called by each worker on the way out, including when aborted.
    ///
    /// `retired` means the worker left because its slot fell above the
    /// target. If the target has grown back past the slot since, the slot is
    /// restarted.
    pub(crate) fn worker_exited(self: &Arc<Self>, slot: usize, retired: bool) {
        ACTIVE_WORKERS.with_label_values(&[&self.alias]).dec();
        let runtime = if retired { self.runtime.lock().clone() } else { None };
        let timers = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.workers.remove(&slot);
            lifecycle.running = lifecycle.running.saturating_sub(1);
            let regrown = !lifecycle.finalized
                && !self.is_stopping()
                && slot < self.target_threads.load(Ordering::Acquire);
            if let (true, Some(runtime)) = (regrown, runtime) {
                drop(lifecycle);
                tracing::debug!(activity = %self.alias, slot, "Restarting retired worker");
                self.spawn_missing(&runtime);
                return;
            }
            if lifecycle.running > 0 || lifecycle.finalized {
                return;
            }
            lifecycle.finalized = true;
            std::mem::take(&mut lifecycle.timers)
        };
        self.finalize(timers);
    }

    fn finalize(&self, timers: Vec<AbortHandle>) {
        for timer in timers {
            timer.abort();
        }
        self.tracker.flush_interrupted();
        self.tracker.close();
        self.adapter.shutdown();

        let reason = self
            .stop_reason
            .lock()
            .get_or_insert(StopReason::Completed)
            .clone();
        let state = reason.terminal_state();
        self.lifecycle.lock().ended = Some((Utc::now(), Instant::now()));

        let counts = self.tracker.snapshot();
        tracing::info!(
            activity = %self.alias,
            state = ?state,
            reason = %reason,
            completed = counts.completed,
            errors = counts.errors,
            "Activity ended"
        );
        self.state_tx.send_replace(state);
    }

    fn summary(&self) -> ActivitySummary {
        let counts = self.tracker.snapshot();
        let (started, ended) = {
            let lifecycle = self.lifecycle.lock();
            (lifecycle.started, lifecycle.ended)
        };
        let elapsed = match (started, ended) {
            (Some((_, from)), Some((_, to))) => to.duration_since(from),
            (Some((_, from)), None) => from.elapsed(),
            _ => Duration::ZERO,
        };
        let secs = elapsed.as_secs_f64();
        ActivitySummary {
            run_id: self.run_id,
            alias: self.alias.clone(),
            started_at: started.map(|(at, _)| at),
            ended_at: ended.map(|(at, _)| at),
            state: *self.state_tx.borrow(),
            reason: self.stop_reason.lock().clone(),
            counts,
            elapsed,
            achieved_rate: if secs > 0.0 {
                counts.completed as f64 / secs
            } else {
                0.0
            },
        }
    }
}

/// Owns a running activity.
pub struct ActivityController {
    shared: Arc<ActivityShared>,
}

impl std::fmt::Debug for ActivityController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityController")
            .field("alias", &self.shared.alias)
            .field("run_id", &self.shared.run_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ActivityController {
    /// Wires up the limiter and tracker for `activity`.
    ///
    /// # Errors
    ///
    /// A window consumer without a `window` size is a configuration error.
    pub fn new(activity: Activity) -> CoreResult<Self> {
        let Activity {
            config,
            adapter,
            sequence,
            input,
            consumer,
        } = activity;

        let alias = config.alias.clone();
        let tracker = match (config.window, consumer) {
            (Some(window), Some(consumer)) => {
                CompletionTracker::with_windows(alias.clone(), window, config.max_reorder, consumer)?
            }
            (None, Some(_)) => {
                return Err(CoreError::config(
                    "a window consumer needs the `window` parameter",
                ))
            }
            (_, None) => CompletionTracker::new(alias.clone()),
        };
        let limiter = RateLimiter::new(alias.clone(), config.cyclerate);
        let (stop_tx, _) = watch::channel(false);
        let (state_tx, _) = watch::channel(ActivityState::Initialized);

        Ok(Self {
            shared: Arc::new(ActivityShared {
                alias,
                run_id: Uuid::new_v4(),
                target_threads: AtomicUsize::new(config.thread_count()),
                config: RwLock::new(Arc::new(config)),
                config_version: AtomicU64::new(0),
                input,
                sequence,
                limiter,
                tracker,
                adapter,
                stop_tx,
                state_tx,
                stop_reason: Mutex::new(None),
                lifecycle: Mutex::new(Lifecycle::default()),
                runtime: Mutex::new(None),
            }),
        })
    }

    #[must_use]
    pub fn alias(&self) -> &str {
        &self.shared.alias
    }

    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.shared.run_id
    }

    /// Spawns the workers on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails outside a runtime or if the activity was already started.
    pub fn start(&self) -> CoreResult<()> {
        let runtime = Handle::try_current()
            .map_err(|_| CoreError::invalid_state("activities must be started inside a tokio runtime"))?;
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            if lifecycle.started.is_some() || lifecycle.finalized {
                return Err(CoreError::invalid_state(format!(
                    "activity `{}` was already started",
                    self.shared.alias
                )));
            }
            lifecycle.started = Some((Utc::now(), Instant::now()));
        }
        *self.shared.runtime.lock() = Some(runtime.clone());

        let config = self.shared.config();
        tracing::info!(
            activity = %self.shared.alias,
            run_id = %self.shared.run_id,
            threads = config.thread_count(),
            cycles = %config.cycles,
            rate = ?config.cyclerate.map(|r| r.to_string()),
            "Starting activity"
        );
        self.shared.state_tx.send_replace(ActivityState::Running);

        if let Some(limit) = config.max_runtime {
            let shared = Arc::clone(&self.shared);
            let timer = runtime.spawn(async move {
                tokio::time::sleep(limit).await;
                shared.request_stop(StopReason::Timeout(limit));
            });
            self.shared.lifecycle.lock().timers.push(timer.abort_handle());
        }
        self.shared.spawn_missing(&runtime);
        Ok(())
    }

    /// Asks the activity to stop. Idempotent; the first reason is kept.
    pub fn request_stop(&self, why: impl Into<String>) {
        self.shared.request_stop(StopReason::Requested(why.into()));
    }

    /// Stops the activity and waits for it to wind down.
    pub async fn stop(&self) -> CoreResult<ActivitySummary> {
        self.request_stop("stop called");
        self.await_completion().await
    }

    /// Waits for a terminal state.
    pub async fn await_completion(&self) -> CoreResult<ActivitySummary> {
        let mut state = self.shared.state_tx.subscribe();
        loop {
            if state.borrow_and_update().is_terminal() {
                return Ok(self.shared.summary());
            }
            state
                .changed()
                .await
                .map_err(|_| CoreError::internal("activity state channel closed"))?;
        }
    }

    /// Starts the activity and waits for it to finish.
    pub async fn run(&self) -> CoreResult<ActivitySummary> {
        self.start()?;
        self.await_completion().await
    }

    /// Applies reconfigurable parameters to the running activity.
    ///
    /// Workers pick up the new settings before their next cycle.
    pub fn apply_params(&self, update: &ParamMap) -> CoreResult<()> {
        let shared = &self.shared;
        let (old, new) = {
            let mut config = shared.config.write();
            let old = Arc::clone(&config);
            let new = Arc::new(old.with_updates(update)?);
            if new.cycles != old.cycles {
                shared.input.set_range(new.cycles.clone())?;
            }
            *config = Arc::clone(&new);
            shared.config_version.fetch_add(1, Ordering::AcqRel);
            (old, new)
        };

        if new.cyclerate != old.cyclerate {
            shared.limiter.apply(new.cyclerate.as_ref());
        }
        tracing::info!(activity = %shared.alias, update = %update, "Activity reconfigured");

        let threads = new.thread_count();
        if threads != shared.target_threads.swap(threads, Ordering::AcqRel) {
            tracing::info!(activity = %shared.alias, threads, "Thread count changed");
            if let Some(runtime) = shared.runtime.lock().clone() {
                shared.spawn_missing(&runtime);
            }
        }
        Ok(())
    }

    /// Resizes the worker pool. Extra workers exit after their current cycle.
    pub fn set_threads(&self, threads: usize) -> CoreResult<()> {
        if threads == 0 {
            return Err(CoreError::config("threads must be > 0"));
        }
        self.apply_params(&ParamMap::new().with("threads", threads.to_string()))
    }

    /// Replaces the rate.
    pub fn set_rate(&self, rate: RateSpec) -> CoreResult<()> {
        self.apply_params(&ParamMap::new().with("cyclerate", rate.to_string()))
    }

    /// Replaces the cycle range.
    pub fn set_cycles(&self, cycles: CycleRange) -> CoreResult<()> {
        self.apply_params(&ParamMap::new().with("cycles", cycles.to_string()))
    }

    #[must_use]
    pub fn state(&self) -> ActivityState {
        *self.shared.state_tx.borrow()
    }

    /// Receiver for lifecycle changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ActivityState> {
        self.shared.state_tx.subscribe()
    }

    #[must_use]
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.shared.stop_reason.lock().clone()
    }

    /// State of each worker slot ever started.
    #[must_use]
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.shared
            .lifecycle
            .lock()
            .cells
            .iter()
            .map(|cell| WorkerState::from_u8(cell.load(Ordering::Acquire)))
            .collect()
    }

    /// Workers currently running.
    #[must_use]
    pub fn running_workers(&self) -> usize {
        self.shared.lifecycle.lock().running
    }

    #[must_use]
    pub fn snapshot(&self) -> TrackerSnapshot {
        self.shared.tracker.snapshot()
    }

    /// Summary so far; final once the activity is terminal.
    #[must_use]
    pub fn summary(&self) -> ActivitySummary {
        self.shared.summary()
    }

    #[must_use]
    pub fn config(&self) -> Arc<ActivityConfig> {
        self.shared.config()
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.shared.limiter
    }
}
