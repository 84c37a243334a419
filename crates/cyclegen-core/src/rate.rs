//! Rate limiter settings parsed from `rate[,burst_ratio[,verb]][,mode]`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::units::parse_decimal;

/// Burst ratio used when none is given.
pub const DEFAULT_BURST_RATIO: f64 = 1.1;

/// How the limiter treats time lost to slow ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatePolicy {
    /// Never exceed the configured rate; lost time is absorbed, not repaid.
    Strict,
    /// Catch up on lost time at up to `rate * burst_ratio`.
    BestEffort,
}

/// Lifecycle verb carried by a rate spec update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateVerb {
    /// Apply settings; pacing starts with the next op.
    Configure,
    /// Apply settings and restart the schedule from now.
    Start,
    /// Like `Start`, discarding any accumulated lag.
    Restart,
    /// Disable pacing.
    Stop,
}

/// Parsed rate limiter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateSpec {
    /// Target ops per second; 0 disables pacing.
    pub ops_per_sec: f64,
    /// Ceiling for catch-up rate as a multiple of `ops_per_sec`.
    pub burst_ratio: f64,
    /// Lifecycle verb.
    pub verb: RateVerb,
    /// Catch-up policy.
    pub policy: RatePolicy,
}

impl RateSpec {
    /// Best-effort spec at the given rate with the default burst ratio.
    #[must_use]
    pub fn new(ops_per_sec: f64) -> Self {
        Self {
            ops_per_sec,
            burst_ratio: DEFAULT_BURST_RATIO,
            verb: RateVerb::Start,
            policy: RatePolicy::BestEffort,
        }
    }

    /// Same spec with strict policy.
    #[must_use]
    pub fn strict(mut self) -> Self {
        self.policy = RatePolicy::Strict;
        self
    }

    /// Same spec with a different burst ratio.
    #[must_use]
    pub fn with_burst_ratio(mut self, burst_ratio: f64) -> Self {
        self.burst_ratio = burst_ratio;
        self
    }

    /// Parses the textual form. Separators may be `,`, `:` or `;`.
    pub fn parse(spec: &str) -> CoreResult<Self> {
        let err = |message: String| CoreError::parse("rate spec", spec, message);
        let parts: Vec<&str> = spec
            .split(|c| c == ',' || c == ':' || c == ';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        let Some((rate, rest)) = parts.split_first() else {
            return Err(err("a rate is required".to_string()));
        };
        let mut parsed = Self::new(parse_decimal(rate).map_err(err)?);

        for (position, part) in rest.iter().enumerate() {
            match part.to_ascii_lowercase().as_str() {
                "configure" => parsed.verb = RateVerb::Configure,
                "start" => parsed.verb = RateVerb::Start,
                "restart" => parsed.verb = RateVerb::Restart,
                "stop" => parsed.verb = RateVerb::Stop,
                "strict" => parsed.policy = RatePolicy::Strict,
                "besteffort" | "best-effort" => parsed.policy = RatePolicy::BestEffort,
                other if position == 0 => {
                    parsed.burst_ratio = other
                        .parse()
                        .map_err(|_| err(format!("`{other}` is not a burst ratio")))?;
                }
                other => return Err(err(format!("unknown rate option `{other}`"))),
            }
        }

        parsed.validate().map_err(err)?;
        Ok(parsed)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), String> {
        if !self.ops_per_sec.is_finite() || self.ops_per_sec < 0.0 {
            return Err(format!("rate {} must be a non-negative number", self.ops_per_sec));
        }
        if !self.burst_ratio.is_finite() || self.burst_ratio < 1.0 {
            return Err(format!(
                "burst ratio {} must be at least 1.0",
                self.burst_ratio
            ));
        }
        Ok(())
    }

    /// Whether this spec actually paces ops.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.ops_per_sec > 0.0 && self.verb != RateVerb::Stop
    }

    /// Nominal gap between ops. `None` when pacing is off.
    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        self.is_active()
            .then(|| Duration::from_secs_f64(1.0 / self.ops_per_sec))
    }
}

impl fmt::Display for RateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.verb {
            RateVerb::Configure => "configure",
            RateVerb::Start => "start",
            RateVerb::Restart => "restart",
            RateVerb::Stop => "stop",
        };
        let policy = match self.policy {
            RatePolicy::Strict => "strict",
            RatePolicy::BestEffort => "besteffort",
        };
        write!(
            f,
            "{},{},{verb},{policy}",
            self.ops_per_sec, self.burst_ratio
        )
    }
}

impl FromStr for RateSpec {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_only() {
        let spec = RateSpec::parse("1000").unwrap();
        assert_eq!(spec.ops_per_sec, 1000.0);
        assert_eq!(spec.burst_ratio, DEFAULT_BURST_RATIO);
        assert_eq!(spec.verb, RateVerb::Start);
        assert_eq!(spec.policy, RatePolicy::BestEffort);
        assert_eq!(spec.interval(), Some(Duration::from_millis(1)));
    }

    #[test]
    fn test_full_form_with_mixed_separators() {
        let spec = RateSpec::parse("5K:1.5;restart,strict").unwrap();
        assert_eq!(spec.ops_per_sec, 5000.0);
        assert_eq!(spec.burst_ratio, 1.5);
        assert_eq!(spec.verb, RateVerb::Restart);
        assert_eq!(spec.policy, RatePolicy::Strict);
    }

    #[test]
    fn test_verb_without_burst_ratio() {
        let spec = RateSpec::parse("100,stop").unwrap();
        assert_eq!(spec.verb, RateVerb::Stop);
        assert!(!spec.is_active());
        assert_eq!(spec.interval(), None);
    }

    #[test]
    fn test_zero_rate_is_inactive() {
        assert!(!RateSpec::parse("0").unwrap().is_active());
    }

    #[test]
    fn test_rejects_low_burst_ratio() {
        assert!(RateSpec::parse("100,0.9").is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(RateSpec::parse("").is_err());
        assert!(RateSpec::parse("fast").is_err());
        assert!(RateSpec::parse("100,1.2,start,sideways").is_err());
    }

    #[test]
    fn test_display_parses_back() {
        let spec = RateSpec::new(250.0).with_burst_ratio(2.0).strict();
        assert_eq!(RateSpec::parse(&spec.to_string()).unwrap(), spec);
    }
}
