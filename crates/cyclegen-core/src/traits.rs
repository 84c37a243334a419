//! Seams between the engine and driver adapters.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CoreResult;
use crate::result::OpResult;
use crate::template::OpTemplate;

/// Mutable state owned by one worker and handed to every dispense call.
///
/// Never shared between workers, so dispensers can keep per-worker scratch
/// values here without synchronisation.
#[derive(Debug, Default)]
pub struct WorkerContext {
    slot: usize,
    ops_built: u64,
    vars: HashMap<String, Value>,
}

impl WorkerContext {
    /// Context for the worker in `slot`.
    #[must_use]
    pub fn new(slot: usize) -> Self {
        Self {
            slot,
            ..Self::default()
        }
    }

    /// Worker slot index.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Ops built by this worker so far.
    #[must_use]
    pub fn ops_built(&self) -> u64 {
        self.ops_built
    }

    /// Counts one built op.
    pub fn note_op_built(&mut self) {
        self.ops_built += 1;
    }

    /// Per-worker scratch value.
    #[must_use]
    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Stores a per-worker scratch value.
    pub fn set_var(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }
}

/// A ready-to-run operation for one cycle.
#[async_trait]
pub trait Op: Send {
    /// Runs the op once. Called again on retry.
    async fn execute(&mut self) -> OpResult;

    /// Short rendering for cycle logging and dry runs.
    fn describe(&self) -> String {
        String::new()
    }
}

/// Builds ops for cycles from one template.
///
/// `apply` must be deterministic: the same cycle yields an equivalent op
/// regardless of which worker calls it or when.
pub trait OpDispenser: Send + Sync {
    /// Template name this dispenser was built from.
    fn name(&self) -> &str;

    /// Builds the op for `cycle`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Dispense` when the op cannot be built for this
    /// cycle; the engine records it and moves on.
    fn apply(&self, cycle: u64, ctx: &mut WorkerContext) -> CoreResult<Box<dyn Op>>;
}

/// A driver adapter turns templates into dispensers.
pub trait DriverAdapter: Send + Sync {
    /// Adapter name as used by the `driver` parameter.
    fn name(&self) -> &str;

    /// Builds the dispenser for a template.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` listing every problem with the template.
    fn dispenser(&self, template: &OpTemplate) -> CoreResult<Arc<dyn OpDispenser>>;

    /// Releases adapter resources once the activity has stopped.
    fn shutdown(&self) {}
}
