//! Start/completion accounting and windowed delivery.
//!
//! Every claimed cycle is identified by its ordinal. The tracker keeps the
//! low-water mark below which every ordinal is complete; window `k` covers
//! ordinals `[k * size, (k + 1) * size)` and is handed to the consumer once
//! the low-water mark passes its end. Windows are delivered strictly in
//! order, whatever order their records completed in.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;

use cyclegen_core::metrics::{CYCLES_COMPLETED, CYCLE_TRIES, IN_FLIGHT_OPS, SERVICE_TIME};
use cyclegen_core::{CompletionRecord, CoreError, CoreResult, ErrorKind, Outcome};

/// Records for one contiguous ordinal window, in ordinal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedWindow {
    pub start: u64,
    pub end: u64,
    pub records: Vec<CompletionRecord>,
}

/// Receives closed windows, one call per window, in increasing order.
pub trait WindowConsumer: Send + Sync {
    fn on_window(&self, window: CompletedWindow);
}

/// Counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackerSnapshot {
    pub started: u64,
    pub completed: u64,
    pub in_flight: u64,
    pub low_water: u64,
    pub success: u64,
    pub errors: u64,
    pub ignored: u64,
    pub interrupted: u64,
    pub windows_delivered: u64,
}

#[derive(Debug)]
struct InFlight {
    cycle: u64,
    recycle: u64,
    started_at_nanos: u64,
}

#[derive(Debug, Default)]
struct TrackerState {
    in_flight: HashMap<u64, InFlight>,
    low_water: u64,
    ahead: BTreeSet<u64>,
    pending: BTreeMap<u64, CompletionRecord>,
    next_window: u64,
    closed: bool,
    counts: TrackerSnapshot,
}

impl TrackerState {
    fn is_done(&self, ordinal: u64) -> bool {
        ordinal < self.low_water || self.ahead.contains(&ordinal)
    }

    fn mark_done(&mut self, ordinal: u64) {
        if ordinal == self.low_water {
            self.low_water += 1;
            while self.ahead.remove(&self.low_water) {
                self.low_water += 1;
            }
        } else {
            self.ahead.insert(ordinal);
        }
    }

    fn take_window(&mut self, size: u64, force: bool) -> Option<CompletedWindow> {
        let start = self.next_window;
        let end = start.checked_add(size)?;
        if !force && self.low_water < end {
            return None;
        }
        if force && self.pending.is_empty() {
            return None;
        }
        let rest = self.pending.split_off(&end);
        let records: Vec<CompletionRecord> =
            std::mem::replace(&mut self.pending, rest).into_values().collect();
        self.next_window = end;
        self.counts.windows_delivered += 1;
        Some(CompletedWindow {
            start,
            end,
            records,
        })
    }
}

/// Shared completion accounting for one activity.
pub struct CompletionTracker {
    alias: String,
    origin: Instant,
    window: Option<u64>,
    max_reorder: u64,
    consumer: Option<Arc<dyn WindowConsumer>>,
    state: Mutex<TrackerState>,
    deliver: Mutex<()>,
    progress: Notify,
}

impl std::fmt::Debug for CompletionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionTracker")
            .field("alias", &self.alias)
            .field("window", &self.window)
            .field("max_reorder", &self.max_reorder)
            .field("has_consumer", &self.consumer.is_some())
            .finish_non_exhaustive()
    }
}

impl CompletionTracker {
    /// Tracker that only counts.
    #[must_use]
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            origin: Instant::now(),
            window: None,
            max_reorder: u64::MAX,
            consumer: None,
            state: Mutex::new(TrackerState::default()),
            deliver: Mutex::new(()),
            progress: Notify::new(),
        }
    }

    /// Tracker delivering windows of `window` ordinals to `consumer`.
    ///
    /// Workers may not start an ordinal `max_reorder` or more past the
    /// first undelivered window, which bounds the records held back.
    pub fn with_windows(
        alias: impl Into<String>,
        window: u64,
        max_reorder: u64,
        consumer: Arc<dyn WindowConsumer>,
    ) -> CoreResult<Self> {
        if window == 0 || max_reorder < window {
            return Err(CoreError::config(format!(
                "window ({window}) must be > 0 and no larger than maxreorder ({max_reorder})"
            )));
        }
        Ok(Self {
            window: Some(window),
            max_reorder,
            consumer: Some(consumer),
            ..Self::new(alias)
        })
    }

    /// Nanoseconds since the tracker was created.
    #[must_use]
    pub fn elapsed_nanos(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    /// Registers an op about to execute. Returns its start time.
    ///
    /// # Errors
    ///
    /// A second start of the same ordinal is a fatal engine error.
    pub fn start(&self, ordinal: u64, cycle: u64, recycle: u64) -> CoreResult<u64> {
        let started_at_nanos = self.elapsed_nanos();
        let mut state = self.state.lock();
        if state.is_done(ordinal) || state.in_flight.contains_key(&ordinal) {
            return Err(CoreError::fatal(format!(
                "ordinal {ordinal} (cycle {cycle}) was claimed twice"
            )));
        }
        state.in_flight.insert(
            ordinal,
            InFlight {
                cycle,
                recycle,
                started_at_nanos,
            },
        );
        state.counts.started += 1;
        drop(state);
        IN_FLIGHT_OPS.with_label_values(&[&self.alias]).inc();
        Ok(started_at_nanos)
    }

    /// Settles a started op.
    ///
    /// # Errors
    ///
    /// Completing an ordinal that is not in flight is a fatal engine error.
    pub fn complete(&self, record: CompletionRecord) -> CoreResult<()> {
        {
            let mut state = self.state.lock();
            if state.in_flight.remove(&record.ordinal).is_none() {
                return Err(CoreError::fatal(format!(
                    "ordinal {} (cycle {}) completed without being started",
                    record.ordinal, record.cycle
                )));
            }
        }
        IN_FLIGHT_OPS.with_label_values(&[&self.alias]).dec();
        self.settle(record)
    }

    /// Settles a cycle that never executed, such as a failed dispense.
    ///
    /// # Errors
    ///
    /// Recording an ordinal twice is a fatal engine error.
    pub fn record(&self, record: CompletionRecord) -> CoreResult<()> {
        {
            let state = self.state.lock();
            if state.in_flight.contains_key(&record.ordinal) {
                return Err(CoreError::fatal(format!(
                    "ordinal {} is in flight and cannot be recorded directly",
                    record.ordinal
                )));
            }
        }
        self.settle(record)
    }

    fn settle(&self, record: CompletionRecord) -> CoreResult<()> {
        let ready = {
            let mut state = self.state.lock();
            if state.is_done(record.ordinal) {
                return Err(CoreError::fatal(format!(
                    "ordinal {} (cycle {}) completed twice",
                    record.ordinal, record.cycle
                )));
            }
            state.mark_done(record.ordinal);
            state.counts.completed += 1;
            match &record.outcome {
                Outcome::Success { .. } => state.counts.success += 1,
                Outcome::Ignored { .. } => state.counts.ignored += 1,
                Outcome::Error { kind, .. } => {
                    state.counts.errors += 1;
                    if *kind == ErrorKind::Interrupted {
                        state.counts.interrupted += 1;
                    }
                }
            }
            self.observe(&record);
            match self.window {
                Some(size) if !state.closed => {
                    state.pending.insert(record.ordinal, record);
                    state.low_water >= state.next_window.saturating_add(size)
                }
                _ => false,
            }
        };
        if ready {
            self.deliver_windows(false);
        }
        self.progress.notify_waiters();
        Ok(())
    }

    fn observe(&self, record: &CompletionRecord) {
        CYCLES_COMPLETED
            .with_label_values(&[&self.alias, record.outcome.label()])
            .inc();
        if record.tries > 0 {
            CYCLE_TRIES
                .with_label_values(&[&self.alias])
                .observe(f64::from(record.tries));
            SERVICE_TIME
                .with_label_values(&[&self.alias])
                .observe(Duration::from_nanos(record.service_nanos).as_secs_f64());
        }
    }

    fn deliver_windows(&self, force: bool) {
        let (Some(size), Some(consumer)) = (self.window, self.consumer.as_ref()) else {
            return;
        };
        let _order = self.deliver.lock();
        let windows: Vec<CompletedWindow> = {
            let mut state = self.state.lock();
            std::iter::from_fn(|| state.take_window(size, force)).collect()
        };
        for window in windows {
            tracing::debug!(
                activity = %self.alias,
                start = window.start,
                end = window.end,
                records = window.records.len(),
                "Delivering window"
            );
            consumer.on_window(window);
        }
    }

    fn has_capacity(&self, ordinal: u64) -> bool {
        if self.consumer.is_none() {
            return true;
        }
        let state = self.state.lock();
        state.closed || ordinal < state.next_window.saturating_add(self.max_reorder)
    }

    /// Waits until `ordinal` is within the reorder bound of the oldest
    /// undelivered window. Returns at once without a window consumer.
    pub async fn await_capacity(&self, ordinal: u64) {
        loop {
            let notified = self.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.has_capacity(ordinal) {
                return;
            }
            notified.await;
        }
    }

    /// Waits until every ordinal in `[start, end)` has completed.
    pub async fn await_range(&self, start: u64, end: u64) {
        loop {
            let notified = self.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.state.lock();
                if state.closed || (start..end).all(|ordinal| state.is_done(ordinal)) {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Waits until nothing is in flight.
    pub async fn await_idle(&self) {
        loop {
            let notified = self.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.state.lock().in_flight.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Settles every in-flight op as interrupted. Returns how many there were.
    pub fn flush_interrupted(&self) -> u64 {
        let now = self.elapsed_nanos();
        let interrupted: Vec<(u64, InFlight)> = self.state.lock().in_flight.drain().collect();
        let count = interrupted.len() as u64;
        for (ordinal, op) in interrupted {
            IN_FLIGHT_OPS.with_label_values(&[&self.alias]).dec();
            let record = CompletionRecord {
                ordinal,
                cycle: op.cycle,
                recycle: op.recycle,
                started_at_nanos: op.started_at_nanos,
                service_nanos: now.saturating_sub(op.started_at_nanos),
                tries: 0,
                outcome: Outcome::error(
                    ErrorKind::Interrupted,
                    "activity stopped before the op completed",
                ),
            };
            if let Err(err) = self.settle(record) {
                tracing::error!(activity = %self.alias, error = %err, "Failed to flush op");
            }
        }
        if count > 0 {
            tracing::info!(activity = %self.alias, count, "Flushed interrupted ops");
        }
        count
    }

    /// Delivers whatever is left, partial windows included, and releases
    /// every waiter. Later completions are still counted.
    pub fn close(&self) {
        self.deliver_windows(true);
        self.state.lock().closed = true;
        self.progress.notify_waiters();
    }

    #[must_use]
    pub fn snapshot(&self) -> TrackerSnapshot {
        let state = self.state.lock();
        TrackerSnapshot {
            in_flight: state.in_flight.len() as u64,
            low_water: state.low_water,
            ..state.counts
        }
    }
}
