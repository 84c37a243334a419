//! Per-cycle error routing: retry, warn, count, ignore or stop.

use std::time::Duration;

use cyclegen_core::metrics::CYCLE_ERRORS;
use cyclegen_core::{ActivityConfig, ErrorKind, ErrorPolicy, Outcome, RetryConfig};

/// A failed cycle as seen by the handler.
#[derive(Debug, Clone)]
pub struct CycleError<'a> {
    pub cycle: u64,
    pub kind: ErrorKind,
    /// Adapter error name, or the kind name for engine errors.
    pub name: &'a str,
    pub message: &'a str,
    pub retryable: bool,
    /// Executions so far, the failing one included.
    pub tries: u32,
}

/// What the worker does next.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Run the op again after the backoff.
    Retry(Duration),
    /// Record the outcome, and stop the activity if a reason is given.
    Finish {
        outcome: Outcome,
        stop: Option<String>,
    },
}

/// Applies the activity's error policy to failed cycles.
#[derive(Debug, Clone)]
pub struct ErrorHandler {
    alias: String,
    policy: ErrorPolicy,
    retry: RetryConfig,
}

impl ErrorHandler {
    #[must_use]
    pub fn new(alias: impl Into<String>, policy: ErrorPolicy, retry: RetryConfig) -> Self {
        Self {
            alias: alias.into(),
            policy,
            retry,
        }
    }

    /// Handler for the `errors` and retry settings of `config`.
    #[must_use]
    pub fn from_config(config: &ActivityConfig) -> Self {
        Self::new(config.alias.clone(), config.errors.clone(), config.retry.clone())
    }

    /// Decides what to do with one failure.
    ///
    /// The error name is matched first, then the kind name. Retries are only
    /// granted to retryable failures below the try ceiling; warning and
    /// counting happen once, on the final disposition.
    #[must_use]
    pub fn handle(&self, error: &CycleError<'_>) -> Decision {
        let actions = self
            .policy
            .matching(error.name)
            .unwrap_or_else(|| self.policy.actions_for(error.kind.as_str()));

        if actions.retry && error.retryable && error.tries < self.retry.max_tries {
            let backoff = self
                .retry
                .backoff_for_attempt(error.tries.saturating_sub(1));
            tracing::debug!(
                activity = %self.alias,
                cycle = error.cycle,
                error = error.name,
                tries = error.tries,
                backoff_ms = backoff.as_millis() as u64,
                "Retrying op"
            );
            return Decision::Retry(backoff);
        }

        if actions.warn {
            tracing::warn!(
                activity = %self.alias,
                cycle = error.cycle,
                kind = %error.kind,
                error = error.name,
                tries = error.tries,
                "Cycle failed: {}",
                error.message
            );
        }
        if actions.count {
            CYCLE_ERRORS
                .with_label_values(&[&self.alias, error.kind.as_str(), error.name])
                .inc();
        }

        let outcome = if actions.ignore {
            Outcome::Ignored { kind: error.kind }
        } else {
            Outcome::Error {
                kind: error.kind,
                name: error.name.to_string(),
                message: error.message.to_string(),
            }
        };
        let stop = actions.stop.then(|| {
            format!(
                "error `{}` on cycle {}: {}",
                error.name, error.cycle, error.message
            )
        });
        Decision::Finish { outcome, stop }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(spec: &str, max_tries: u32) -> ErrorHandler {
        ErrorHandler::new(
            "errors-test",
            ErrorPolicy::parse(spec).unwrap(),
            RetryConfig {
                max_tries,
                ..RetryConfig::default()
            },
        )
    }

    fn failure(name: &str, retryable: bool, tries: u32) -> CycleError<'_> {
        CycleError {
            cycle: 9,
            kind: ErrorKind::Execution,
            name,
            message: "boom",
            retryable,
            tries,
        }
    }

    #[test]
    fn test_retries_until_ceiling() {
        let handler = handler("retry,count", 3);
        assert!(matches!(handler.handle(&failure("timeout", true, 1)), Decision::Retry(_)));
        assert!(matches!(handler.handle(&failure("timeout", true, 2)), Decision::Retry(_)));
        match handler.handle(&failure("timeout", true, 3)) {
            Decision::Finish { outcome, stop } => {
                assert_eq!(outcome.error_kind(), Some(ErrorKind::Execution));
                assert!(stop.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_non_retryable_failure_is_final() {
        let handler = handler("retry", 10);
        assert!(matches!(
            handler.handle(&failure("syntax", false, 1)),
            Decision::Finish { .. }
        ));
    }

    #[test]
    fn test_name_match_beats_kind_match() {
        let handler = handler("timeout:ignore;execution:stop", 1);
        match handler.handle(&failure("timeout", false, 1)) {
            Decision::Finish { outcome, stop } => {
                assert_eq!(outcome, Outcome::Ignored { kind: ErrorKind::Execution });
                assert!(stop.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        match handler.handle(&failure("refused", false, 1)) {
            Decision::Finish { stop, .. } => {
                assert!(stop.unwrap().contains("`refused` on cycle 9"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_count_increments_error_metric() {
        let handler = handler("count", 1);
        let counter = CYCLE_ERRORS.with_label_values(&["errors-test", "execution", "counted"]);
        let before = counter.get();
        let _ = handler.handle(&failure("counted", false, 1));
        assert_eq!(counter.get(), before + 1);
    }

    #[test]
    fn test_backoff_grows_per_retry() {
        let handler = ErrorHandler::new(
            "t",
            ErrorPolicy::default(),
            RetryConfig {
                max_tries: 5,
                initial_backoff_ms: 10,
                max_backoff_ms: 25,
                backoff_multiplier: 2.0,
            },
        );
        let delays: Vec<_> = (1..5)
            .map(|tries| match handler.handle(&failure("x", true, tries)) {
                Decision::Retry(delay) => delay.as_millis(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(delays, vec![10, 20, 25, 25]);
    }
}
