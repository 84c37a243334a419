//! Reference driver adapters for cyclegen.
//!
//! - `diag`: simulated latency, result codes and failures for exercising the
//!   engine without a backend
//! - `stdout`: renders each cycle's op as a line of text
//!
//! [`adapter_for`] resolves the `driver` parameter to an adapter.

mod diag;
mod fields;
mod stdout;

use std::sync::Arc;

use cyclegen_core::{CoreError, CoreResult, DriverAdapter};

pub use diag::DiagAdapter;
pub use stdout::{OutputFormat, StdoutAdapter};

/// Driver names known to [`adapter_for`].
pub const DRIVERS: &[&str] = &["diag", "stdout"];

/// Builds the adapter registered under `driver`.
///
/// `stdout` writes to the process standard output.
pub fn adapter_for(driver: &str) -> CoreResult<Arc<dyn DriverAdapter>> {
    match driver {
        "diag" => Ok(Arc::new(DiagAdapter::new())),
        "stdout" => Ok(Arc::new(StdoutAdapter::stdout())),
        other => Err(CoreError::config(format!(
            "unknown driver `{other}` (available: {})",
            DRIVERS.join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_resolves_known_drivers() {
        for driver in DRIVERS {
            assert_eq!(adapter_for(driver).unwrap().name(), *driver);
        }
    }

    #[test]
    fn test_registry_rejects_unknown_driver() {
        let err = adapter_for("cql").err().unwrap();
        let message = err.to_string();
        assert!(message.contains("cql"));
        assert!(message.contains("diag, stdout"));
    }
}
