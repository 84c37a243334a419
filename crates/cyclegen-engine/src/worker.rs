//! Worker loops.
//!
//! A worker claims segments of cycles, builds each op through the template's
//! dispenser, waits on the rate gate and executes the op. In async mode the
//! executing half runs in a finisher inside the same task, so up to `async`
//! ops per worker are in flight while the issuer keeps claiming.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use cyclegen_core::metrics::{CYCLE_ERRORS, RESULT_PAYLOAD};
use cyclegen_core::{
    ActivityConfig, CompletionRecord, CoreResult, DryRun, ErrorKind, Op, Outcome, WorkerContext,
};

use crate::controller::{ActivityShared, StopReason};
use crate::errors::{CycleError, Decision, ErrorHandler};
use crate::interval::IntervalReporter;

/// Where a worker is in its loop.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    Idle = 0,
    Claiming = 1,
    Building = 2,
    RateGated = 3,
    Executing = 4,
    Reporting = 5,
    Stopped = 6,
}

impl WorkerState {
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Claiming,
            2 => Self::Building,
            3 => Self::RateGated,
            4 => Self::Executing,
            5 => Self::Reporting,
            _ => Self::Stopped,
        }
    }
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Awaits `fut` unless the activity is asked to stop first.
async fn until_stopped<F: Future>(stop: &mut watch::Receiver<bool>, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = stopped(stop) => None,
        out = fut => Some(out),
    }
}

/// Marks the slot stopped and tells the controller, even on abort.
struct WorkerGuard {
    shared: Arc<ActivityShared>,
    slot: usize,
    cell: Arc<AtomicU8>,
    retired: bool,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.cell.store(WorkerState::Stopped as u8, Ordering::Release);
        tracing::debug!(activity = %self.shared.alias, slot = self.slot, "Worker exited");
        self.shared.worker_exited(self.slot, self.retired);
    }
}

/// Settings a worker refreshes when the configuration version changes.
struct Settings {
    version: u64,
    config: Arc<ActivityConfig>,
    handler: Arc<ErrorHandler>,
}

impl Settings {
    fn load(shared: &ActivityShared) -> Self {
        let version = shared.config_version.load(Ordering::Acquire);
        let config = shared.config();
        Self {
            version,
            handler: Arc::new(ErrorHandler::from_config(&config)),
            config,
        }
    }
}

/// An op past the rate gate, ready to execute.
struct Job {
    ordinal: u64,
    cycle: u64,
    recycle: u64,
    started_at_nanos: u64,
    op: Box<dyn Op>,
    handler: Arc<ErrorHandler>,
    log_cycle: bool,
    dry_run: bool,
}

pub(crate) async fn run_worker(shared: Arc<ActivityShared>, slot: usize, cell: Arc<AtomicU8>) {
    let mut guard = WorkerGuard {
        shared: Arc::clone(&shared),
        slot,
        cell: Arc::clone(&cell),
        retired: false,
    };
    let mut worker = Worker::new(Arc::clone(&shared), slot, cell);
    let result = match worker.settings.config.async_depth {
        Some(depth) => worker.run_async(depth).await,
        None => worker.run_sync().await,
    };
    guard.retired = worker.retired;
    if let Err(err) = result {
        tracing::error!(activity = %shared.alias, slot, error = %err, "Worker failed");
        shared.request_stop(StopReason::Fatal(err.to_string()));
    }
}

struct Worker {
    shared: Arc<ActivityShared>,
    slot: usize,
    cell: Arc<AtomicU8>,
    ctx: WorkerContext,
    settings: Settings,
    reporter: Option<IntervalReporter>,
    stop: watch::Receiver<bool>,
    cycles_done: u64,
    /// Left because the slot fell above the target thread count.
    retired: bool,
}

impl Worker {
    fn new(shared: Arc<ActivityShared>, slot: usize, cell: Arc<AtomicU8>) -> Self {
        let settings = Settings::load(&shared);
        let reporter = settings.config.interval.map(|interval| {
            IntervalReporter::new(
                shared.alias.clone(),
                slot,
                settings.config.thread_count(),
                interval,
                Instant::now(),
            )
        });
        Self {
            stop: shared.subscribe_stop(),
            shared,
            slot,
            cell,
            ctx: WorkerContext::new(slot),
            settings,
            reporter,
            cycles_done: 0,
            retired: false,
        }
    }

    fn set_state(&self, state: WorkerState) {
        self.cell.store(state as u8, Ordering::Release);
    }

    fn should_exit(&mut self) -> bool {
        if self.shared.is_stopping() {
            return true;
        }
        self.retired = self.slot >= self.shared.target_threads.load(Ordering::Acquire);
        self.retired
    }

    fn refresh(&mut self) {
        if self.shared.config_version.load(Ordering::Acquire) == self.settings.version {
            return;
        }
        self.settings = Settings::load(&self.shared);
        let config = &self.settings.config;
        match (config.interval, self.reporter.as_mut()) {
            (Some(interval), Some(reporter)) => {
                reporter.reconfigure(config.thread_count(), interval, Instant::now());
            }
            (Some(interval), None) => {
                self.reporter = Some(IntervalReporter::new(
                    self.shared.alias.clone(),
                    self.slot,
                    config.thread_count(),
                    interval,
                    Instant::now(),
                ));
            }
            (None, _) => self.reporter = None,
        }
        tracing::debug!(
            activity = %self.shared.alias,
            slot = self.slot,
            version = self.settings.version,
            "Worker picked up new settings"
        );
    }

    async fn run_sync(&mut self) -> CoreResult<()> {
        tracing::debug!(activity = %self.shared.alias, slot = self.slot, "Worker running");
        'claims: while !self.should_exit() {
            self.refresh();
            self.set_state(WorkerState::Claiming);
            let Some(segment) = self.shared.input.claim(self.settings.config.stride)? else {
                break;
            };
            for (ordinal, cycle) in segment.iter() {
                if self.shared.is_stopping() {
                    break 'claims;
                }
                self.refresh();
                let Some(job) = self.issue(ordinal, cycle, segment.recycle).await? else {
                    if self.shared.is_stopping() {
                        break 'claims;
                    }
                    continue;
                };
                self.set_state(WorkerState::Executing);
                let stop = execute_job(&self.shared, self.stop.clone(), job).await?;
                self.set_state(WorkerState::Reporting);
                if let Some(reason) = stop {
                    self.shared.request_stop(StopReason::ErrorHandler(reason));
                    break 'claims;
                }
                self.after_cycle();
            }
        }
        self.set_state(WorkerState::Stopped);
        Ok(())
    }

    async fn run_async(&mut self, depth: usize) -> CoreResult<()> {
        tracing::debug!(activity = %self.shared.alias, slot = self.slot, depth, "Async worker running");
        let (tx, mut rx) = mpsc::channel::<(Job, OwnedSemaphorePermit)>(depth);
        let permits = Arc::new(Semaphore::new(depth));

        let finisher_shared = Arc::clone(&self.shared);
        let finisher_stop = self.stop.clone();
        let finisher = async move {
            let mut running = FuturesUnordered::new();
            loop {
                tokio::select! {
                    Some((job, permit)) = rx.recv() => {
                        let shared = Arc::clone(&finisher_shared);
                        let stop = finisher_stop.clone();
                        running.push(async move {
                            let result = execute_job(&shared, stop, job).await;
                            drop(permit);
                            result
                        });
                    }
                    Some(result) = running.next(), if !running.is_empty() => match result {
                        Ok(Some(reason)) => {
                            finisher_shared.request_stop(StopReason::ErrorHandler(reason));
                        }
                        Ok(None) => {}
                        Err(err) => {
                            finisher_shared.request_stop(StopReason::Fatal(err.to_string()));
                        }
                    },
                    else => break,
                }
            }
        };

        let issuer = async {
            let result = self.issue_loop(&tx, &permits).await;
            drop(tx);
            // In-flight ops still finishing.
            self.set_state(WorkerState::Reporting);
            result
        };
        let (issued, ()) = tokio::join!(issuer, finisher);
        self.set_state(WorkerState::Stopped);
        issued
    }

    async fn issue_loop(
        &mut self,
        tx: &mpsc::Sender<(Job, OwnedSemaphorePermit)>,
        permits: &Arc<Semaphore>,
    ) -> CoreResult<()> {
        'claims: while !self.should_exit() {
            self.refresh();
            self.set_state(WorkerState::Claiming);
            let Some(segment) = self.shared.input.claim(self.settings.config.stride)? else {
                break;
            };
            for (ordinal, cycle) in segment.iter() {
                if self.shared.is_stopping() {
                    break 'claims;
                }
                self.refresh();
                let Some(Ok(permit)) =
                    until_stopped(&mut self.stop, Arc::clone(permits).acquire_owned()).await
                else {
                    break 'claims;
                };
                let Some(job) = self.issue(ordinal, cycle, segment.recycle).await? else {
                    if self.shared.is_stopping() {
                        break 'claims;
                    }
                    continue;
                };
                self.set_state(WorkerState::Executing);
                if tx.send((job, permit)).await.is_err() {
                    break 'claims;
                }
                self.after_cycle();
            }
        }
        Ok(())
    }

    /// Takes one cycle up to the point of execution.
    ///
    /// Returns `None` when the cycle was settled without executing, or when
    /// a stop arrived while waiting.
    async fn issue(&mut self, ordinal: u64, cycle: u64, recycle: u64) -> CoreResult<Option<Job>> {
        let shared = Arc::clone(&self.shared);
        let config = Arc::clone(&self.settings.config);

        if until_stopped(&mut self.stop, shared.tracker.await_capacity(ordinal))
            .await
            .is_none()
        {
            return Ok(None);
        }

        if config.error_on_cycle == Some(cycle) {
            tracing::warn!(activity = %shared.alias, cycle, "Injecting error and stopping");
            let kind = ErrorKind::Injected.as_str();
            CYCLE_ERRORS.with_label_values(&[&shared.alias, kind, kind]).inc();
            self.settle_unexecuted(
                ordinal,
                cycle,
                recycle,
                Outcome::error(ErrorKind::Injected, format!("erroroncycle={cycle}")),
            )?;
            shared.request_stop(StopReason::ErrorOnCycle(cycle));
            return Ok(None);
        }

        if config.throw_on_cycle == Some(cycle) {
            let message = format!("throwoncycle={cycle}");
            self.route_unexecuted(ordinal, cycle, recycle, ErrorKind::Injected, &message)?;
            return Ok(None);
        }

        self.set_state(WorkerState::Building);
        let dispenser = Arc::clone(shared.sequence.get(cycle));
        let op = match dispenser.apply(cycle, &mut self.ctx) {
            Ok(op) => {
                self.ctx.note_op_built();
                op
            }
            Err(err) => {
                let message = err.to_string();
                self.route_unexecuted(ordinal, cycle, recycle, ErrorKind::Dispense, &message)?;
                return Ok(None);
            }
        };

        self.set_state(WorkerState::RateGated);
        if until_stopped(&mut self.stop, shared.limiter.maybe_wait_for_op())
            .await
            .is_none()
        {
            return Ok(None);
        }

        let started_at_nanos = shared.tracker.start(ordinal, cycle, recycle)?;
        Ok(Some(Job {
            ordinal,
            cycle,
            recycle,
            started_at_nanos,
            op,
            handler: Arc::clone(&self.settings.handler),
            log_cycle: config.log_cycle,
            dry_run: config.dry_run == DryRun::Op,
        }))
    }

    /// Routes a failure that happened before execution through the handler.
    fn route_unexecuted(
        &mut self,
        ordinal: u64,
        cycle: u64,
        recycle: u64,
        kind: ErrorKind,
        message: &str,
    ) -> CoreResult<()> {
        let decision = self.settings.handler.handle(&CycleError {
            cycle,
            kind,
            name: kind.as_str(),
            message,
            retryable: false,
            tries: 0,
        });
        let (outcome, stop) = match decision {
            Decision::Finish { outcome, stop } => (outcome, stop),
            Decision::Retry(_) => (Outcome::error(kind, message), None),
        };
        self.settle_unexecuted(ordinal, cycle, recycle, outcome)?;
        match stop {
            Some(reason) => self.shared.request_stop(StopReason::ErrorHandler(reason)),
            None => self.after_cycle(),
        }
        Ok(())
    }

    fn settle_unexecuted(
        &mut self,
        ordinal: u64,
        cycle: u64,
        recycle: u64,
        outcome: Outcome,
    ) -> CoreResult<()> {
        self.set_state(WorkerState::Reporting);
        let tracker = &self.shared.tracker;
        if self.settings.config.log_cycle {
            tracing::trace!(
                activity = %self.shared.alias,
                slot = self.slot,
                cycle,
                outcome = outcome.label(),
                "Cycle settled without executing"
            );
        }
        tracker.record(CompletionRecord {
            ordinal,
            cycle,
            recycle,
            started_at_nanos: tracker.elapsed_nanos(),
            service_nanos: 0,
            tries: 0,
            outcome,
        })
    }

    fn after_cycle(&mut self) {
        self.cycles_done += 1;
        let config = &self.settings.config;
        if self.cycles_done % config.modulo == 0 {
            tracing::info!(
                activity = %self.shared.alias,
                slot = self.slot,
                cycles = self.cycles_done,
                "Worker progress"
            );
        }
        if let Some(reporter) = self.reporter.as_mut() {
            let now = Instant::now();
            if reporter.is_due(now) {
                reporter.on_cycle(now, &self.shared.tracker.snapshot());
            }
        }
        self.set_state(WorkerState::Idle);
    }
}

/// Runs a job to its final outcome, retrying per the error handler, and
/// reports it. Returns a stop reason if the handler asked for one.
async fn execute_job(
    shared: &ActivityShared,
    mut stop: watch::Receiver<bool>,
    mut job: Job,
) -> CoreResult<Option<String>> {
    let began = Instant::now();
    let mut tries = 0u32;
    let mut stop_reason = None;

    let outcome = if job.dry_run {
        Outcome::Success { code: 0 }
    } else {
        loop {
            tries += 1;
            match job.op.execute().await {
                Ok(success) => {
                    if let Some(bytes) = success.payload_bytes {
                        RESULT_PAYLOAD
                            .with_label_values(&[&shared.alias])
                            .observe(bytes as f64);
                    }
                    break Outcome::Success { code: success.code };
                }
                Err(failure) => {
                    let decision = job.handler.handle(&CycleError {
                        cycle: job.cycle,
                        kind: ErrorKind::Execution,
                        name: &failure.name,
                        message: &failure.message,
                        retryable: failure.retryable,
                        tries,
                    });
                    match decision {
                        Decision::Retry(backoff) => {
                            if backoff.is_zero() {
                                continue;
                            }
                            if until_stopped(&mut stop, tokio::time::sleep(backoff))
                                .await
                                .is_some()
                            {
                                continue;
                            }
                            break Outcome::Error {
                                kind: ErrorKind::Execution,
                                name: failure.name,
                                message: failure.message,
                            };
                        }
                        Decision::Finish { outcome, stop } => {
                            stop_reason = stop;
                            break outcome;
                        }
                    }
                }
            }
        }
    };

    if job.log_cycle {
        tracing::trace!(
            activity = %shared.alias,
            cycle = job.cycle,
            op = %job.op.describe(),
            tries,
            outcome = outcome.label(),
            "Cycle complete"
        );
    }
    shared.tracker.complete(CompletionRecord {
        ordinal: job.ordinal,
        cycle: job.cycle,
        recycle: job.recycle,
        started_at_nanos: job.started_at_nanos,
        service_nanos: u64::try_from(began.elapsed().as_nanos()).unwrap_or(u64::MAX),
        tries,
        outcome,
    })?;
    Ok(stop_reason)
}
