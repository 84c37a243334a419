use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every problem found while validating a configuration, reported together.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigError {
    /// Human-readable violations in the order they were found.
    pub violations: Vec<String>,
}

impl ConfigError {
    /// Creates an error holding a single violation.
    #[must_use]
    pub fn single(message: impl Into<String>) -> Self {
        Self {
            violations: vec![message.into()],
        }
    }

    /// Appends a violation.
    pub fn push(&mut self, message: impl Into<String>) {
        self.violations.push(message.into());
    }

    /// Moves every violation of `other` into `self`.
    pub fn extend(&mut self, other: ConfigError) {
        self.violations.extend(other.violations);
    }

    /// True when no violation has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// Returns `Ok(value)` when empty, otherwise `Err(self)`.
    pub fn into_result<T>(self, value: T) -> Result<T, ConfigError> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.violations.as_slice() {
            [] => write!(f, "invalid configuration"),
            [only] => write!(f, "{only}"),
            many => {
                write!(f, "{} configuration problems:", many.len())?;
                for (i, violation) in many.iter().enumerate() {
                    write!(f, "\n  {}. {violation}", i + 1)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        Self::single(err.to_string())
    }
}

/// Error class attached to non-successful completion records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// The dispenser could not build an op for the cycle.
    Dispense,
    /// The op ran and failed.
    Execution,
    /// Failure forced by `erroroncycle` / `throwoncycle`.
    Injected,
    /// The op was still in flight when the shutdown grace period ran out.
    Interrupted,
}

impl ErrorKind {
    /// Stable name, also used as a metrics label and error handler match key.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dispense => "dispense",
            Self::Execution => "execution",
            Self::Injected => "injected",
            Self::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical error type for the engine and its adapters.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid parameters, templates or adapter setup. Fatal at activity start.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A dispenser failed to build an op for one cycle.
    #[error("cannot dispense op `{template}` for cycle {cycle}: {message}")]
    Dispense {
        /// Cycle being dispensed.
        cycle: u64,
        /// Template name of the failing dispenser.
        template: String,
        /// Underlying failure.
        message: String,
    },

    /// An op ran and reported failure.
    #[error("op failed on cycle {cycle}: {message}")]
    Execution {
        /// Cycle of the failed op.
        cycle: u64,
        /// Underlying failure.
        message: String,
    },

    /// Deliberate failure produced by a diagnostic trigger.
    #[error("injected error on cycle {cycle}")]
    Injected {
        /// Cycle the trigger fired on.
        cycle: u64,
    },

    /// Internal invariant broken; the activity must stop.
    #[error("fatal engine error: {message}")]
    FatalEngine {
        /// Description of the broken invariant.
        message: String,
    },

    /// Text could not be parsed into the requested value.
    #[error("cannot parse {what} from `{input}`: {message}")]
    Parse {
        /// Kind of value being parsed (e.g. `"cycle range"`).
        what: &'static str,
        /// The offending input.
        input: String,
        /// Reason the input was rejected.
        message: String,
    },

    /// Operation not allowed in the current lifecycle state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Human-readable explanation of the invalid state.
        message: String,
    },

    /// I/O error occurred while reading workloads or writing output.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Unexpected internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable details for debugging purposes.
        message: String,
    },
}

impl CoreError {
    /// Creates a `Config` variant holding one violation.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(ConfigError::single(message))
    }

    /// Creates a `Dispense` variant.
    #[must_use]
    pub fn dispense(cycle: u64, template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dispense {
            cycle,
            template: template.into(),
            message: message.into(),
        }
    }

    /// Creates a `FatalEngine` variant.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::FatalEngine {
            message: message.into(),
        }
    }

    /// Creates a `Parse` variant.
    #[must_use]
    pub fn parse(what: &'static str, input: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            what,
            input: input.into(),
            message: message.into(),
        }
    }

    /// Creates an `InvalidState` variant.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Recoverable errors are recorded per cycle and never stop the activity by themselves.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Dispense { .. } | Self::Execution { .. } | Self::Injected { .. }
        )
    }

    /// Completion record class for recoverable errors.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Dispense { .. } => Some(ErrorKind::Dispense),
            Self::Execution { .. } => Some(ErrorKind::Execution),
            Self::Injected { .. } => Some(ErrorKind::Injected),
            _ => None,
        }
    }

    /// Flattens parse failures into a configuration violation message.
    #[must_use]
    pub fn into_config(self) -> ConfigError {
        match self {
            Self::Config(err) => err,
            other => ConfigError::single(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::config(format!("invalid JSON: {err}"))
    }
}

impl From<toml::de::Error> for CoreError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(format!("invalid TOML: {err}"))
    }
}

/// Convenient result alias for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;
