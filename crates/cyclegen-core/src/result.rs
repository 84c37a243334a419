//! Op results and per-cycle completion records.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Successful op execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpSuccess {
    /// Adapter-defined result code.
    pub code: i32,
    /// Size of the result payload, when the adapter knows it.
    pub payload_bytes: Option<u64>,
}

impl OpSuccess {
    /// Success with code 0 and no payload.
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    /// Success carrying a payload size.
    #[must_use]
    pub fn with_payload(bytes: u64) -> Self {
        Self {
            code: 0,
            payload_bytes: Some(bytes),
        }
    }
}

/// Failed op execution as reported by an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpFailure {
    /// Error name used for error handler matching, e.g. `"timeout"`.
    pub name: String,
    /// Human-readable detail.
    pub message: String,
    /// Whether trying the same op again may succeed.
    pub retryable: bool,
}

impl OpFailure {
    /// Failure that will not be retried.
    #[must_use]
    pub fn fatal(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Failure eligible for retry.
    #[must_use]
    pub fn retryable(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            retryable: true,
        }
    }
}

/// Outcome of a single op execution.
pub type OpResult = Result<OpSuccess, OpFailure>;

/// Final disposition of a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    /// The op succeeded.
    Success {
        /// Adapter result code.
        code: i32,
    },
    /// The cycle failed.
    Error {
        /// Error class.
        kind: ErrorKind,
        /// Error name as matched by the error handler.
        name: String,
        /// Failure detail.
        message: String,
    },
    /// The cycle failed but the error handler said to ignore it.
    Ignored {
        /// Error class.
        kind: ErrorKind,
    },
}

impl Outcome {
    /// Error outcome whose name is the kind itself.
    #[must_use]
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            name: kind.as_str().to_string(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Error class for non-successful outcomes.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success { .. } => None,
            Self::Error { kind, .. } | Self::Ignored { kind } => Some(*kind),
        }
    }

    /// Metrics label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Error { .. } => "error",
            Self::Ignored { .. } => "ignored",
        }
    }
}

/// What happened to one claimed cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// Position of the cycle in the run's claim order, across passes.
    pub ordinal: u64,
    /// Cycle as presented to the dispenser.
    pub cycle: u64,
    /// Pass index, starting at 0.
    pub recycle: u64,
    /// Nanoseconds from activity start to the first try.
    pub started_at_nanos: u64,
    /// Nanoseconds spent executing, retries included.
    pub service_nanos: u64,
    /// Number of executions; 0 when the op never ran.
    pub tries: u32,
    /// Final disposition.
    pub outcome: Outcome,
}
