//! Activity configuration.
//!
//! Parameters are layered with the `config` crate:
//! 1. Explicit `key=value` parameters (highest priority)
//! 2. Environment variables prefixed `CYCLEGEN_` (e.g. `CYCLEGEN_THREADS=8`)
//! 3. An optional config file (TOML, JSON or YAML by extension)
//! 4. Declared defaults (lowest priority)
//!
//! The merged [`ParamMap`] is resolved against [`ActivityConfig::model`] and
//! then parsed field by field into a typed [`ActivityConfig`]. Every problem
//! found on the way ends up in one [`ConfigError`].

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use config::{Config, Environment, File, Source};
use serde::{Deserialize, Serialize};

use crate::cycles::CycleRange;
use crate::error::ConfigError;
use crate::error_policy::{ErrorPolicy, DEFAULT_ERROR_SPEC};
use crate::params::{Param, ParamMap, ParamModel};
use crate::rate::RateSpec;
use crate::units::{parse_count, parse_duration};

/// Parameters that may be changed while an activity runs.
pub const RECONFIGURABLE: &[&str] = &[
    "threads",
    "cyclerate",
    "cycles",
    "erroroncycle",
    "throwoncycle",
    "logcycle",
    "interval",
    "modulo",
    "errors",
    "maxtries",
];

/// Order in which op templates are interleaved over cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequencerKind {
    /// Round-robin draw from each template's remaining ratio.
    Bucket,
    /// Each template spread evenly over the plan.
    Interval,
    /// Templates back to back, each repeated by its ratio.
    Concat,
}

impl FromStr for SequencerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bucket" => Ok(Self::Bucket),
            "interval" => Ok(Self::Interval),
            "concat" => Ok(Self::Concat),
            other => Err(format!(
                "unknown sequencer `{other}` (expected bucket, interval or concat)"
            )),
        }
    }
}

/// Whether ops are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DryRun {
    /// Normal execution.
    None,
    /// Build ops but skip execution; each cycle completes successfully.
    Op,
}

/// Worker count as written: `N`, `Nx` (N per core) or `auto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadSpec {
    /// Exact count.
    Fixed(usize),
    /// Multiple of available cores.
    PerCore(usize),
    /// One per available core.
    Auto,
}

impl ThreadSpec {
    /// Concrete worker count on this machine.
    #[must_use]
    pub fn resolve(self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        match self {
            Self::Fixed(n) => n,
            Self::PerCore(n) => n.saturating_mul(cores),
            Self::Auto => cores,
        }
    }
}

impl FromStr for ThreadSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        let (digits, per_core) = match text.strip_suffix(['x', 'X']) {
            Some(digits) => (digits, true),
            None => (text, false),
        };
        let n: usize = digits
            .parse()
            .map_err(|_| format!("threads `{s}` must be N, Nx or auto"))?;
        if n == 0 {
            return Err("threads must be at least 1".to_string());
        }
        Ok(if per_core {
            Self::PerCore(n)
        } else {
            Self::Fixed(n)
        })
    }
}

/// Retry backoff for retryable execution errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total tries per cycle, first attempt included
    pub max_tries: u32,

    /// Delay before the first retry in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum delay between retries in milliseconds
    pub max_backoff_ms: u64,

    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_tries: 10,
            initial_backoff_ms: 0,
            max_backoff_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0 = first retry).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powi(attempt as i32))
        .min(self.max_backoff_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error (default: "info")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty (default: "pretty")
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    /// Checks level and format names.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.level, valid_levels
            ));
        }
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(format!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.format, valid_formats
            ));
        }
        Ok(())
    }
}

/// Fully validated activity settings.
#[derive(Debug, Clone)]
pub struct ActivityConfig {
    pub alias: String,
    pub driver: String,
    pub cycles: CycleRange,
    pub recycles: u64,
    pub threads: ThreadSpec,
    pub stride: u64,
    pub cyclerate: Option<RateSpec>,
    pub seq: SequencerKind,
    /// In-flight ops per worker when running in async mode.
    pub async_depth: Option<usize>,
    pub retry: RetryConfig,
    pub errors: ErrorPolicy,
    pub error_on_cycle: Option<u64>,
    pub throw_on_cycle: Option<u64>,
    pub log_cycle: bool,
    /// Interval reporting period; `None` disables it.
    pub interval: Option<Duration>,
    pub modulo: u64,
    pub window: Option<u64>,
    pub max_reorder: u64,
    pub max_runtime: Option<Duration>,
    pub grace: Duration,
    pub fold_recycles: bool,
    pub dry_run: DryRun,
    params: ParamMap,
}

impl ActivityConfig {
    /// Every parameter an activity accepts.
    #[must_use]
    pub fn model() -> ParamModel {
        ParamModel::new()
            .add(Param::defaulted("alias", "activity", "name used in logs and metrics"))
            .add(Param::defaulted("driver", "diag", "adapter name").synonyms(&["type"]))
            .add(Param::defaulted("cycles", "1", "cycle range: M, N..M or N..+K"))
            .add(Param::defaulted("recycles", "1", "passes over the cycle range"))
            .add(Param::defaulted("threads", "1", "workers: N, Nx or auto"))
            .add(Param::defaulted("stride", "1", "cycles claimed per counter bump"))
            .add(
                Param::optional("cyclerate", "rate[,burst_ratio[,verb]][,strict]")
                    .synonyms(&["rate", "targetrate"]),
            )
            .add(Param::defaulted("seq", "bucket", "bucket, interval or concat"))
            .add(Param::optional("async", "in-flight ops per worker"))
            .add(Param::defaulted("maxtries", "10", "tries per cycle"))
            .add(Param::defaulted("retrydelay", "0ms", "first retry backoff"))
            .add(Param::defaulted("maxretrydelay", "1s", "retry backoff ceiling"))
            .add(Param::defaulted("errors", DEFAULT_ERROR_SPEC, "error handler spec"))
            .add(Param::optional("erroroncycle", "inject an error and stop"))
            .add(Param::optional("throwoncycle", "inject an error"))
            .add(Param::defaulted("logcycle", "false", "trace every cycle"))
            .add(Param::defaulted("interval", "1000", "report interval in ms, 0 disables"))
            .add(Param::defaulted("modulo", "10000000", "progress log period in cycles"))
            .add(Param::optional("window", "windowed consumer size"))
            .add(Param::defaulted("maxreorder", "100000", "max cycles ahead of the oldest open window"))
            .add(Param::optional("maxruntime", "stop after this long"))
            .add(Param::defaulted("grace", "5s", "grace period for in-flight ops"))
            .add(Param::defaulted("foldrecycles", "false", "distinct cycle per pass"))
            .add(Param::defaulted("dryrun", "none", "none or op"))
    }

    /// Validates parameters and builds the typed configuration.
    pub fn from_params(params: &ParamMap) -> Result<Self, ConfigError> {
        let resolved = Self::model().resolve(params)?;
        Self::from_resolved(resolved)
    }

    /// Layers defaults, `file`, `CYCLEGEN_*` environment variables and `params`.
    pub fn load(file: Option<&Path>, params: &ParamMap) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(Environment::with_prefix("CYCLEGEN"));

        let layered: HashMap<String, config::Value> = builder.build()?.collect()?;

        let mut errors = ConfigError::default();
        let mut merged = ParamMap::new();
        for (key, value) in layered {
            match value.into_string() {
                Ok(text) => {
                    merged.set(key, text);
                }
                Err(_) => errors.push(format!("`{key}` must be a scalar value")),
            }
        }
        merged.merge(params);

        match Self::from_params(&merged) {
            Ok(config) => errors.into_result(config),
            Err(more) => {
                errors.extend(more);
                Err(errors)
            }
        }
    }

    /// Applies a partial update to a running activity's configuration.
    ///
    /// Only [`RECONFIGURABLE`] parameters are accepted.
    pub fn with_updates(&self, update: &ParamMap) -> Result<Self, ConfigError> {
        let update = Self::model().resolve_partial(update)?;
        let mut errors = ConfigError::default();
        for (key, _) in update.iter() {
            if !RECONFIGURABLE.contains(&key) {
                errors.push(format!("`{key}` cannot be changed while the activity runs"));
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }
        let mut merged = self.params.clone();
        merged.merge(&update);
        Self::from_resolved(merged)
    }

    /// Canonical parameters this configuration was built from.
    #[must_use]
    pub fn params(&self) -> &ParamMap {
        &self.params
    }

    /// Resolved worker count.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.resolve().max(1)
    }

    /// Total cycles across all passes.
    #[must_use]
    pub fn total_cycles(&self) -> u64 {
        self.cycles.count().saturating_mul(self.recycles)
    }

    fn from_resolved(params: ParamMap) -> Result<Self, ConfigError> {
        let mut errors = ConfigError::default();
        let mut field = FieldReader {
            params: &params,
            errors: &mut errors,
        };

        let alias = field.text("alias");
        let driver = field.text("driver");
        let cycles = field.parse_with("cycles", |v| {
            CycleRange::parse(v).map_err(|e| e.to_string())
        });
        let recycles = field.count("recycles");
        let threads = field.parse_with("threads", ThreadSpec::from_str);
        let stride = field.count("stride");
        let cyclerate = field.optional("cyclerate", |v| {
            RateSpec::parse(v).map_err(|e| e.to_string())
        });
        let seq = field.parse_with("seq", SequencerKind::from_str);
        let async_depth = field.optional("async", |v| {
            parse_count(v).and_then(|n| usize::try_from(n).map_err(|e| e.to_string()))
        });
        let max_tries = field.parse_with("maxtries", |v| {
            v.parse::<u32>().map_err(|_| format!("`{v}` is not a try count"))
        });
        let retry_delay = field.parse_with("retrydelay", parse_duration);
        let max_retry_delay = field.parse_with("maxretrydelay", parse_duration);
        let errors_spec = field.parse_with("errors", |v| {
            ErrorPolicy::parse(v).map_err(|e| e.to_string())
        });
        let error_on_cycle = field.optional("erroroncycle", parse_count);
        let throw_on_cycle = field.optional("throwoncycle", parse_count);
        let log_cycle = field.flag("logcycle");
        let interval = field.count("interval");
        let modulo = field.count("modulo");
        let window = field.optional("window", parse_count);
        let max_reorder = field.count("maxreorder");
        let max_runtime = field.optional("maxruntime", parse_duration);
        let grace = field.parse_with("grace", parse_duration);
        let fold_recycles = field.flag("foldrecycles");
        let dry_run = field.parse_with("dryrun", |v| match v {
            "none" | "false" => Ok(DryRun::None),
            "op" | "true" => Ok(DryRun::Op),
            other => Err(format!("unknown dryrun mode `{other}` (expected none or op)")),
        });

        for (name, value) in [
            ("recycles", recycles),
            ("stride", stride),
            ("modulo", modulo),
            ("maxreorder", max_reorder),
        ] {
            if value == Some(0) {
                errors.push(format!("`{name}` must be > 0"));
            }
        }
        if max_tries == Some(0) {
            errors.push("`maxtries` must be > 0");
        }
        if let Some(Some(0)) = async_depth {
            errors.push("`async` must be > 0");
        }
        if let Some(Some(0)) = window {
            errors.push("`window` must be > 0");
        }
        if let (Some(Some(window)), Some(max_reorder)) = (window, max_reorder) {
            if max_reorder < window {
                errors.push(format!(
                    "`maxreorder` ({max_reorder}) must be >= `window` ({window})"
                ));
            }
        }
        if let (Some(cycles), Some(recycles)) = (&cycles, recycles) {
            if cycles.count().checked_mul(recycles).is_none() {
                errors.push(format!(
                    "{recycles} passes over {cycles} overflow the cycle counter"
                ));
            }
            if fold_recycles == Some(true)
                && recycles
                    .checked_sub(1)
                    .and_then(|r| r.checked_mul(cycles.count()))
                    .and_then(|span| span.checked_add(cycles.last()))
                    .is_none()
            {
                errors.push("folded recycle cycles overflow the cycle counter");
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        // Every field parsed, so the unwrapping below cannot fail.
        let retry_delay = retry_delay.unwrap_or_default();
        let max_retry_delay = max_retry_delay.unwrap_or_default();
        Ok(Self {
            alias: alias.unwrap_or_default(),
            driver: driver.unwrap_or_default(),
            cycles: cycles.unwrap_or_default(),
            recycles: recycles.unwrap_or(1),
            threads: threads.unwrap_or(ThreadSpec::Fixed(1)),
            stride: stride.unwrap_or(1),
            cyclerate: cyclerate.flatten(),
            seq: seq.unwrap_or(SequencerKind::Bucket),
            async_depth: async_depth.flatten(),
            retry: RetryConfig {
                max_tries: max_tries.unwrap_or(1),
                initial_backoff_ms: retry_delay.as_millis() as u64,
                max_backoff_ms: max_retry_delay.as_millis() as u64,
                ..RetryConfig::default()
            },
            errors: errors_spec.unwrap_or_default(),
            error_on_cycle: error_on_cycle.flatten(),
            throw_on_cycle: throw_on_cycle.flatten(),
            log_cycle: log_cycle.unwrap_or(false),
            interval: interval
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            modulo: modulo.unwrap_or(1),
            window: window.flatten(),
            max_reorder: max_reorder.unwrap_or(1),
            max_runtime: max_runtime.flatten(),
            grace: grace.unwrap_or_default(),
            fold_recycles: fold_recycles.unwrap_or(false),
            dry_run: dry_run.unwrap_or(DryRun::None),
            params,
        })
    }
}

/// Parses named fields, recording failures instead of returning early.
struct FieldReader<'a> {
    params: &'a ParamMap,
    errors: &'a mut ConfigError,
}

impl FieldReader<'_> {
    fn text(&mut self, name: &str) -> Option<String> {
        match self.params.get(name) {
            Some(v) if !v.is_empty() => Some(v.to_string()),
            _ => {
                self.errors.push(format!("`{name}` must not be empty"));
                None
            }
        }
    }

    fn parse_with<T, F>(&mut self, name: &str, parse: F) -> Option<T>
    where
        F: FnOnce(&str) -> Result<T, String>,
    {
        let Some(value) = self.params.get(name) else {
            self.errors.push(format!("`{name}` is required"));
            return None;
        };
        match parse(value) {
            Ok(parsed) => Some(parsed),
            Err(message) => {
                self.errors.push(format!("`{name}`: {message}"));
                None
            }
        }
    }

    /// `Some(None)` when absent, `None` when present but invalid.
    fn optional<T, F>(&mut self, name: &str, parse: F) -> Option<Option<T>>
    where
        F: FnOnce(&str) -> Result<T, String>,
    {
        match self.params.get(name) {
            None => Some(None),
            Some(_) => self.parse_with(name, parse).map(Some),
        }
    }

    fn count(&mut self, name: &str) -> Option<u64> {
        self.parse_with(name, parse_count)
    }

    fn flag(&mut self, name: &str) -> Option<bool> {
        self.parse_with(name, |v| match v.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            other => Err(format!("`{other}` is not a boolean")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_configuration() {
        let config = ActivityConfig::from_params(&ParamMap::new()).unwrap();
        assert_eq!(config.alias, "activity");
        assert_eq!(config.driver, "diag");
        assert_eq!(config.cycles, CycleRange::new(0, 1).unwrap());
        assert_eq!(config.recycles, 1);
        assert_eq!(config.threads, ThreadSpec::Fixed(1));
        assert_eq!(config.stride, 1);
        assert!(config.cyclerate.is_none());
        assert_eq!(config.seq, SequencerKind::Bucket);
        assert_eq!(config.retry.max_tries, 10);
        assert_eq!(config.interval, Some(Duration::from_secs(1)));
        assert_eq!(config.modulo, 10_000_000);
        assert_eq!(config.grace, Duration::from_secs(5));
        assert_eq!(config.dry_run, DryRun::None);
    }

    #[test]
    fn test_typed_fields() {
        let params = ParamMap::parse(
            "cycles=10..20;threads=4;rate=100,1.5;seq=concat;async=8;erroroncycle=15;interval=0;maxruntime=30s;foldrecycles=true;recycles=2",
        )
        .unwrap();
        let config = ActivityConfig::from_params(&params).unwrap();
        assert_eq!(config.cycles.count(), 10);
        assert_eq!(config.thread_count(), 4);
        assert_eq!(config.cyclerate.unwrap().burst_ratio, 1.5);
        assert_eq!(config.seq, SequencerKind::Concat);
        assert_eq!(config.async_depth, Some(8));
        assert_eq!(config.error_on_cycle, Some(15));
        assert_eq!(config.interval, None);
        assert_eq!(config.max_runtime, Some(Duration::from_secs(30)));
        assert!(config.fold_recycles);
        assert_eq!(config.total_cycles(), 20);
    }

    #[test]
    fn test_collects_every_violation() {
        let params = ParamMap::parse(
            "cycles=10..5;threads=zero;stride=0;rate=100,0.5;errors=explode;thread=3;cyclerate=1",
        )
        .unwrap();
        let err = ActivityConfig::from_params(&params).unwrap_err();
        // unknown `thread`, rate/cyclerate synonym conflict
        assert_eq!(err.violations.len(), 2, "{err}");

        let params = ParamMap::parse(
            "cycles=10..5;threads=zero;stride=0;rate=100,0.5;errors=explode",
        )
        .unwrap();
        let err = ActivityConfig::from_params(&params).unwrap_err();
        assert_eq!(err.violations.len(), 5, "{err}");
    }

    #[test]
    fn test_window_must_fit_reorder_bound() {
        let params = ParamMap::parse("window=1000;maxreorder=10").unwrap();
        let err = ActivityConfig::from_params(&params).unwrap_err();
        assert!(err.to_string().contains("maxreorder"));
    }

    #[test]
    fn test_recycle_overflow_is_config_error() {
        let params = ParamMap::parse("cycles=10E;recycles=10").unwrap();
        assert!(ActivityConfig::from_params(&params).is_err());
    }

    #[test]
    fn test_thread_spec_forms() {
        assert_eq!("8".parse::<ThreadSpec>().unwrap(), ThreadSpec::Fixed(8));
        assert_eq!("2x".parse::<ThreadSpec>().unwrap(), ThreadSpec::PerCore(2));
        assert_eq!("auto".parse::<ThreadSpec>().unwrap(), ThreadSpec::Auto);
        assert!("0".parse::<ThreadSpec>().is_err());
        assert!("many".parse::<ThreadSpec>().is_err());
        assert!(ThreadSpec::Auto.resolve() >= 1);
    }

    #[test]
    fn test_with_updates_only_accepts_reconfigurable() {
        let config = ActivityConfig::from_params(&ParamMap::parse("threads=4").unwrap()).unwrap();

        let updated = config
            .with_updates(&ParamMap::parse("threads=8;targetrate=50").unwrap())
            .unwrap();
        assert_eq!(updated.thread_count(), 8);
        assert_eq!(updated.cyclerate.unwrap().ops_per_sec, 50.0);

        let err = config
            .with_updates(&ParamMap::parse("stride=10;driver=stdout").unwrap())
            .unwrap_err();
        assert_eq!(err.violations.len(), 2);
    }

    #[test]
    fn test_retry_backoff() {
        let retry = RetryConfig {
            max_tries: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
            backoff_multiplier: 2.0,
        };
        assert_eq!(retry.backoff_for_attempt(0), Duration::from_millis(10));
        assert_eq!(retry.backoff_for_attempt(1), Duration::from_millis(20));
        assert_eq!(retry.backoff_for_attempt(3), Duration::from_millis(50));
        assert_eq!(RetryConfig::default().backoff_for_attempt(4), Duration::ZERO);
    }

    #[test]
    fn test_load_from_file_with_param_override() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "threads = 3\ncycles = \"100\"\nalias = \"from-file\"").unwrap();

        let params = ParamMap::parse("alias=override").unwrap();
        let config = ActivityConfig::load(Some(file.path()), &params).unwrap();
        assert_eq!(config.thread_count(), 3);
        assert_eq!(config.cycles.count(), 100);
        assert_eq!(config.alias, "override");
    }

    #[test]
    fn test_load_reports_unknown_file_keys() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "treads = 3").unwrap();

        let err = ActivityConfig::load(Some(file.path()), &ParamMap::new()).unwrap_err();
        assert!(err.to_string().contains("treads"));
    }

    #[test]
    fn test_logging_config_validation() {
        assert!(LoggingConfig::default().validate().is_ok());
        let bad = LoggingConfig {
            level: "loud".to_string(),
            ..LoggingConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
