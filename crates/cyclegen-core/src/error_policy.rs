//! Error handler specification: which verbs apply to which error names.
//!
//! Grammar: `pattern:verb,verb;pattern:verb`. A list of verbs without a
//! pattern applies to every error (`*`). Patterns are an exact error name,
//! a prefix ending in `*`, or `*` alone. The first matching entry wins.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, CoreError};

/// Default handler: retry what can be retried, log and count the rest.
pub const DEFAULT_ERROR_SPEC: &str = "retry,warn,count";

/// Action taken for a failed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorVerb {
    /// Request activity stop, naming the error as the reason.
    Stop,
    /// Log the failure at warn level.
    Warn,
    /// Increment the error counters.
    Count,
    /// Re-execute retryable failures, up to `maxtries`.
    Retry,
    /// Record the cycle as handled without counting it as an error.
    Ignore,
}

impl ErrorVerb {
    fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_lowercase().as_str() {
            "stop" => Some(Self::Stop),
            "warn" => Some(Self::Warn),
            "count" => Some(Self::Count),
            "retry" => Some(Self::Retry),
            "ignore" => Some(Self::Ignore),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Warn => "warn",
            Self::Count => "count",
            Self::Retry => "retry",
            Self::Ignore => "ignore",
        }
    }
}

/// Verbs selected for one error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorActions {
    pub stop: bool,
    pub warn: bool,
    pub count: bool,
    pub retry: bool,
    pub ignore: bool,
}

impl ErrorActions {
    fn from_verbs(verbs: &[ErrorVerb]) -> Self {
        let mut actions = Self::default();
        for verb in verbs {
            match verb {
                ErrorVerb::Stop => actions.stop = true,
                ErrorVerb::Warn => actions.warn = true,
                ErrorVerb::Count => actions.count = true,
                ErrorVerb::Retry => actions.retry = true,
                ErrorVerb::Ignore => actions.ignore = true,
            }
        }
        actions
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    pattern: String,
    verbs: Vec<ErrorVerb>,
}

impl Rule {
    fn matches(&self, name: &str) -> bool {
        match self.pattern.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => self.pattern == name,
        }
    }
}

/// Parsed error handler specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPolicy {
    rules: Vec<Rule>,
}

impl ErrorPolicy {
    /// Parses the handler grammar, collecting every bad verb or entry.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let mut errors = ConfigError::default();
        let mut rules = Vec::new();

        for entry in spec.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (pattern, verbs) = match entry.split_once(':') {
                Some((pattern, verbs)) => (pattern.trim(), verbs),
                None => ("*", entry),
            };
            if pattern.is_empty() {
                errors.push(format!("error handler entry `{entry}` has an empty pattern"));
                continue;
            }
            let mut parsed = Vec::new();
            for verb in verbs.split(',').map(str::trim).filter(|v| !v.is_empty()) {
                match ErrorVerb::parse(verb) {
                    Some(v) => parsed.push(v),
                    None => errors.push(format!(
                        "unknown error handler verb `{verb}` (expected stop, warn, count, retry or ignore)"
                    )),
                }
            }
            if parsed.is_empty() {
                errors.push(format!("error handler entry `{entry}` names no verbs"));
                continue;
            }
            rules.push(Rule {
                pattern: pattern.to_string(),
                verbs: parsed,
            });
        }

        if rules.is_empty() && errors.is_empty() {
            errors.push("error handler spec is empty");
        }
        errors.into_result(Self { rules })
    }

    /// Verbs of the first entry matching `name`, if any.
    #[must_use]
    pub fn matching(&self, name: &str) -> Option<ErrorActions> {
        self.rules
            .iter()
            .find(|rule| rule.matches(name))
            .map(|rule| ErrorActions::from_verbs(&rule.verbs))
    }

    /// Verbs for an error name. Unmatched names are counted and logged.
    #[must_use]
    pub fn actions_for(&self, name: &str) -> ErrorActions {
        self.matching(name).unwrap_or(ErrorActions {
                warn: true,
                count: true,
                ..ErrorActions::default()
            })
    }
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            rules: vec![Rule {
                pattern: "*".to_string(),
                verbs: vec![ErrorVerb::Retry, ErrorVerb::Warn, ErrorVerb::Count],
            }],
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rule) in self.rules.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            let verbs: Vec<&str> = rule.verbs.iter().map(|v| v.as_str()).collect();
            write!(f, "{}:{}", rule.pattern, verbs.join(","))?;
        }
        Ok(())
    }
}

impl FromStr for ErrorPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s)?)
    }
}
