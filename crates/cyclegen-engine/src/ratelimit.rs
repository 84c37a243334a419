//! Shared op pacing.
//!
//! Admission is a ticket counter plus a CAS on the last admission time, both
//! atomics. The schedule sits behind a read-mostly lock that is only written
//! on reconfiguration, so the per-op path never contends on a mutex.
//!
//! - Strict: each op is admitted no sooner than one interval after the
//!   previous one. Time lost to a stall is not made up.
//! - Best-effort: op `k` is due at `epoch + k * interval`. After a stall ops
//!   are admitted at `burst_ratio` times the rate until the schedule is met.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use cyclegen_core::metrics::{RATE_LAG_NANOS, RATE_WAIT_NANOS};
use cyclegen_core::{RatePolicy, RateSpec, RateVerb};

#[derive(Debug, Clone, Copy)]
struct Schedule {
    spec: Option<RateSpec>,
    interval: i64,
    burst: i64,
    strict: bool,
    epoch: i64,
    base_ticket: u64,
}

impl Schedule {
    fn inactive() -> Self {
        Self {
            spec: None,
            interval: 0,
            burst: 0,
            strict: false,
            epoch: 0,
            base_ticket: 0,
        }
    }

    fn is_active(&self) -> bool {
        self.interval > 0
    }

    fn ideal(&self, ticket: u64) -> i64 {
        let due = ticket.saturating_sub(self.base_ticket);
        self.epoch
            .saturating_add(i64::try_from(due).unwrap_or(i64::MAX).saturating_mul(self.interval))
    }
}

fn interval_nanos(spec: &RateSpec) -> Option<(i64, i64)> {
    if !spec.is_active() {
        return None;
    }
    let interval = (1e9 / spec.ops_per_sec).round().max(1.0);
    let burst = (interval / spec.burst_ratio.max(1.0)).round().max(1.0);
    Some((interval as i64, burst as i64))
}

/// Rate gate shared by every worker of an activity.
#[derive(Debug)]
pub struct RateLimiter {
    alias: String,
    origin: Instant,
    schedule: RwLock<Schedule>,
    ticket: AtomicU64,
    last_admit: AtomicI64,
}

impl RateLimiter {
    /// Limiter for `alias`, pacing per `spec` or not at all.
    #[must_use]
    pub fn new(alias: impl Into<String>, spec: Option<RateSpec>) -> Self {
        let limiter = Self {
            alias: alias.into(),
            origin: Instant::now(),
            schedule: RwLock::new(Schedule::inactive()),
            ticket: AtomicU64::new(0),
            last_admit: AtomicI64::new(i64::MIN / 2),
        };
        limiter.apply(spec.as_ref());
        limiter
    }

    fn now(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }

    /// Active spec, if pacing is on.
    #[must_use]
    pub fn spec(&self) -> Option<RateSpec> {
        self.schedule.read().spec
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.schedule.read().is_active()
    }

    /// How far best-effort pacing is behind schedule. Zero when on time,
    /// in strict mode, or when pacing is off.
    #[must_use]
    pub fn lag(&self) -> Duration {
        let schedule = self.schedule.read();
        if !schedule.is_active() || schedule.strict {
            return Duration::ZERO;
        }
        let behind = self.now() - schedule.ideal(self.ticket.load(Ordering::Acquire));
        Duration::from_nanos(u64::try_from(behind).unwrap_or(0))
    }

    /// Reserves the next admission time, in nanos since `origin`.
    fn reserve(&self) -> Option<(i64, i64)> {
        let schedule = self.schedule.read();
        if !schedule.is_active() {
            return None;
        }
        let now = self.now();
        let ticket = self.ticket.fetch_add(1, Ordering::AcqRel);
        let ideal = schedule.ideal(ticket);

        let mut prev = self.last_admit.load(Ordering::Acquire);
        loop {
            let admit = if schedule.strict {
                prev.saturating_add(schedule.interval).max(now)
            } else {
                ideal.max(prev.saturating_add(schedule.burst)).max(now)
            };
            match self.last_admit.compare_exchange_weak(
                prev,
                admit,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some((now, admit)),
                Err(actual) => prev = actual,
            }
        }
    }

    /// Waits until proceeding would not exceed the rate.
    ///
    /// Returns how long the caller waited. Dropping the future gives up the
    /// reserved slot, which only makes pacing slightly more conservative.
    pub async fn maybe_wait_for_op(&self) -> Duration {
        let Some((now, admit)) = self.reserve() else {
            return Duration::ZERO;
        };
        let wait = u64::try_from(admit - now).unwrap_or(0);
        if wait > 0 {
            tokio::time::sleep_until(self.origin + Duration::from_nanos(admit as u64)).await;
            RATE_WAIT_NANOS
                .with_label_values(&[&self.alias])
                .inc_by(wait);
        }
        let lag = i64::try_from(self.lag().as_nanos()).unwrap_or(i64::MAX);
        RATE_LAG_NANOS.with_label_values(&[&self.alias]).set(lag);
        Duration::from_nanos(wait)
    }

    /// Replaces the active rate without a discontinuity.
    ///
    /// `configure` and `start` keep the current backlog, measured in ops and
    /// rescaled to the new interval. `restart` drops any backlog and admits
    /// the next op immediately. `stop`, a zero rate or `None` turn pacing off.
    pub fn apply(&self, spec: Option<&RateSpec>) {
        let mut schedule = self.schedule.write();
        let now = self.now();
        let ticket = self.ticket.load(Ordering::Acquire);

        let Some((spec, (interval, burst))) =
            spec.and_then(|spec| interval_nanos(spec).map(|n| (*spec, n)))
        else {
            if schedule.is_active() {
                tracing::info!(activity = %self.alias, "Rate limiting disabled");
            }
            *schedule = Schedule::inactive();
            return;
        };

        let carried_lag = match spec.verb {
            RateVerb::Restart => 0,
            RateVerb::Configure | RateVerb::Start if schedule.is_active() && !schedule.strict => {
                let behind = (now - schedule.ideal(ticket)).max(0);
                let ops = behind as f64 / schedule.interval as f64;
                (ops * interval as f64).round() as i64
            }
            RateVerb::Configure | RateVerb::Start | RateVerb::Stop => 0,
        };

        if spec.verb == RateVerb::Restart || !schedule.is_active() {
            self.last_admit
                .store(now.saturating_sub(interval), Ordering::Release);
        }

        *schedule = Schedule {
            spec: Some(spec),
            interval,
            burst,
            strict: spec.policy == RatePolicy::Strict,
            epoch: now - carried_lag,
            base_ticket: ticket,
        };
        tracing::info!(
            activity = %self.alias,
            rate = %spec,
            carried_lag_ms = carried_lag / 1_000_000,
            "Rate limiter configured"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn best_effort(rate: f64, burst: f64) -> RateSpec {
        RateSpec::new(rate).with_burst_ratio(burst)
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_limiter_never_waits() {
        let limiter = RateLimiter::new("t", None);
        for _ in 0..100 {
            assert_eq!(limiter.maybe_wait_for_op().await, Duration::ZERO);
        }
        assert!(!limiter.is_active());
        assert_eq!(limiter.lag(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_paces_at_rate() {
        let limiter = RateLimiter::new("t", Some(RateSpec::new(100.0).strict()));
        let start = Instant::now();
        for _ in 0..101 {
            limiter.maybe_wait_for_op().await;
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1010), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_best_effort_catches_up_after_stall() {
        let limiter = RateLimiter::new("t", Some(best_effort(100.0, 2.0)));
        for _ in 0..10 {
            limiter.maybe_wait_for_op().await;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(limiter.lag() >= Duration::from_millis(900));

        let start = Instant::now();
        for _ in 0..100 {
            limiter.maybe_wait_for_op().await;
        }
        let elapsed = start.elapsed();
        assert!(elapsed < Duration::from_millis(750), "{elapsed:?}");
        assert!(elapsed >= Duration::from_millis(450), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_does_not_catch_up() {
        let limiter = RateLimiter::new("t", Some(RateSpec::new(100.0).strict()));
        for _ in 0..10 {
            limiter.maybe_wait_for_op().await;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        let start = Instant::now();
        for _ in 0..100 {
            limiter.maybe_wait_for_op().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(980));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_carries_backlog_in_ops() {
        let limiter = RateLimiter::new("t", Some(best_effort(100.0, 1.1)));
        limiter.maybe_wait_for_op().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(limiter.lag(), Duration::from_millis(490));

        limiter.apply(Some(&best_effort(200.0, 1.1)));
        let lag = limiter.lag();
        assert!(
            lag >= Duration::from_millis(244) && lag <= Duration::from_millis(246),
            "{lag:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_drops_backlog() {
        let limiter = RateLimiter::new("t", Some(best_effort(100.0, 1.1)));
        limiter.maybe_wait_for_op().await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        let mut spec = best_effort(50.0, 1.1);
        spec.verb = RateVerb::Restart;
        limiter.apply(Some(&spec));
        assert_eq!(limiter.lag(), Duration::ZERO);
        assert_eq!(limiter.maybe_wait_for_op().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_verb_disables_pacing() {
        let limiter = RateLimiter::new("t", Some(RateSpec::new(1.0)));
        let mut spec = RateSpec::new(1.0);
        spec.verb = RateVerb::Stop;
        limiter.apply(Some(&spec));
        assert!(!limiter.is_active());
        assert!(limiter.spec().is_none());
        assert_eq!(limiter.maybe_wait_for_op().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_change_stays_within_twice_new_rate() {
        let limiter = RateLimiter::new("t", Some(best_effort(100.0, 1.1)));
        let mut admitted = Vec::new();
        for _ in 0..50 {
            limiter.maybe_wait_for_op().await;
            admitted.push(Instant::now());
        }
        limiter.apply(Some(&best_effort(400.0, 1.1)));
        for _ in 0..800 {
            limiter.maybe_wait_for_op().await;
            admitted.push(Instant::now());
        }
        for (i, at) in admitted.iter().enumerate() {
            let in_window = admitted[i..]
                .iter()
                .take_while(|later| later.duration_since(*at) < Duration::from_secs(1))
                .count();
            assert!(in_window <= 800, "{in_window} ops in one second");
        }
    }
}
