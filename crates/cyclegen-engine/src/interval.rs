//! Staggered interval reporting.
//!
//! Each of `N` workers reports every `interval * N`, offset by its slot, so
//! the pool as a whole reports roughly once per `interval` whatever the
//! thread count. A worker that falls behind records the delay and skips the
//! missed slots instead of reporting in a burst.

use std::time::Duration;

use tokio::time::Instant;

use cyclegen_core::metrics::REPORT_DELAY;

use crate::tracker::TrackerSnapshot;

#[derive(Debug, Clone)]
pub struct IntervalReporter {
    alias: String,
    slot: usize,
    interval: Duration,
    quantized: Duration,
    next: Instant,
    last_completed: u64,
    last_at: Instant,
}

impl IntervalReporter {
    /// Reporter for the worker in `slot` of `threads`, first due one
    /// staggered interval after `start`.
    #[must_use]
    pub fn new(
        alias: impl Into<String>,
        slot: usize,
        threads: usize,
        interval: Duration,
        start: Instant,
    ) -> Self {
        let threads = threads.max(1) as u32;
        let quantized = interval * threads;
        let offset = interval * (slot as u32 % threads + 1);
        Self {
            alias: alias.into(),
            slot,
            interval,
            quantized,
            next: start + offset,
            last_completed: 0,
            last_at: start,
        }
    }

    /// Time of the next report.
    #[must_use]
    pub fn next_due(&self) -> Instant {
        self.next
    }

    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next
    }

    /// Reports if due. Returns the delay past the scheduled slot.
    pub fn on_cycle(&mut self, now: Instant, snapshot: &TrackerSnapshot) -> Option<Duration> {
        if !self.is_due(now) {
            return None;
        }
        let delay = now.duration_since(self.next);
        REPORT_DELAY
            .with_label_values(&[&self.alias])
            .observe(delay.as_secs_f64());

        let span = now.duration_since(self.last_at).as_secs_f64();
        let done = snapshot.completed.saturating_sub(self.last_completed);
        let rate = if span > 0.0 { done as f64 / span } else { 0.0 };
        tracing::info!(
            activity = %self.alias,
            slot = self.slot,
            completed = snapshot.completed,
            errors = snapshot.errors,
            in_flight = snapshot.in_flight,
            ops_per_sec = %format_args!("{rate:.1}"),
            delay_ms = delay.as_millis() as u64,
            "Progress"
        );
        self.last_completed = snapshot.completed;
        self.last_at = now;

        self.next += self.quantized;
        if self.next <= now {
            let behind = now.duration_since(self.next).as_nanos();
            let skipped = behind / self.quantized.as_nanos().max(1) + 1;
            self.next += self.quantized * u32::try_from(skipped).unwrap_or(u32::MAX);
        }
        Some(delay)
    }

    /// Re-spaces the schedule for a new thread count or interval.
    pub fn reconfigure(&mut self, threads: usize, interval: Duration, now: Instant) {
        let threads = threads.max(1) as u32;
        if self.interval == interval && self.quantized == interval * threads {
            return;
        }
        self.interval = interval;
        self.quantized = interval * threads;
        self.next = now + interval * (self.slot as u32 % threads + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(completed: u64) -> TrackerSnapshot {
        TrackerSnapshot {
            completed,
            ..TrackerSnapshot::default()
        }
    }

    #[test]
    fn test_slots_are_staggered() {
        let start = Instant::now();
        let second = Duration::from_secs(1);
        let due: Vec<Duration> = (0..4)
            .map(|slot| IntervalReporter::new("t", slot, 4, second, start).next_due() - start)
            .collect();
        assert_eq!(
            due,
            vec![second, second * 2, second * 3, second * 4]
        );
    }

    #[test]
    fn test_reports_on_quantized_schedule() {
        let start = Instant::now();
        let mut reporter = IntervalReporter::new("interval-test", 1, 2, Duration::from_millis(100), start);
        assert_eq!(reporter.on_cycle(start + Duration::from_millis(150), &snapshot(1)), None);
        assert_eq!(
            reporter.on_cycle(start + Duration::from_millis(205), &snapshot(2)),
            Some(Duration::from_millis(5))
        );
        assert_eq!(reporter.next_due() - start, Duration::from_millis(400));
    }

    #[test]
    fn test_drift_skips_missed_slots() {
        let start = Instant::now();
        let mut reporter = IntervalReporter::new("interval-test", 0, 1, Duration::from_millis(100), start);
        let late = start + Duration::from_millis(550);
        assert_eq!(reporter.on_cycle(late, &snapshot(10)), Some(Duration::from_millis(450)));
        assert!(reporter.next_due() > late);
        assert_eq!(reporter.next_due() - start, Duration::from_millis(600));
        assert_eq!(reporter.on_cycle(late, &snapshot(10)), None);
    }

    #[test]
    fn test_reconfigure_respaces() {
        let start = Instant::now();
        let mut reporter = IntervalReporter::new("t", 3, 4, Duration::from_millis(100), start);
        reporter.reconfigure(8, Duration::from_millis(100), start);
        assert_eq!(reporter.next_due() - start, Duration::from_millis(400));
        reporter.on_cycle(start + Duration::from_millis(400), &snapshot(0));
        assert_eq!(reporter.next_due() - start, Duration::from_millis(1200));
    }
}
