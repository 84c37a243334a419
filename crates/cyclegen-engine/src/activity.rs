//! Activity assembly: one dispenser per template, the op plan and the input.

use std::sync::Arc;

use cyclegen_core::{
    ActivityConfig, ConfigError, CoreResult, DriverAdapter, OpDispenser, OpTemplate,
};

use crate::input::{CycleInput, Input};
use crate::sequence::OpSequence;
use crate::tracker::WindowConsumer;

/// A validated, not yet running activity.
pub struct Activity {
    pub(crate) config: ActivityConfig,
    pub(crate) adapter: Arc<dyn DriverAdapter>,
    pub(crate) sequence: OpSequence<Arc<dyn OpDispenser>>,
    pub(crate) input: Arc<dyn Input>,
    pub(crate) consumer: Option<Arc<dyn WindowConsumer>>,
}

impl std::fmt::Debug for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activity")
            .field("alias", &self.config.alias)
            .field("driver", &self.adapter.name())
            .field("ops", &self.op_names())
            .field("plan_len", &self.sequence.len())
            .finish_non_exhaustive()
    }
}

impl Activity {
    /// Resolves every template through `adapter` and builds the op plan.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` listing every unusable template, an adapter
    /// that does not match the configured driver, or an empty workload.
    pub fn new(
        config: ActivityConfig,
        adapter: Arc<dyn DriverAdapter>,
        templates: &[OpTemplate],
    ) -> CoreResult<Self> {
        let mut errors = ConfigError::default();
        if adapter.name() != config.driver {
            errors.push(format!(
                "activity `{}` wants driver `{}` but was given `{}`",
                config.alias,
                config.driver,
                adapter.name()
            ));
        }
        if templates.is_empty() {
            errors.push("workload defines no ops");
        }

        let mut weighted = Vec::with_capacity(templates.len());
        for template in templates {
            match adapter.dispenser(template) {
                Ok(dispenser) => weighted.push((dispenser, template.ratio())),
                Err(err) => errors.extend(err.into_config()),
            }
        }
        if !errors.is_empty() {
            return Err(errors.into());
        }

        let sequence = OpSequence::build(config.seq, weighted)?;
        let input: Arc<dyn Input> = Arc::new(CycleInput::new(
            config.cycles.clone(),
            config.recycles,
            config.fold_recycles,
        )?);

        tracing::info!(
            activity = %config.alias,
            driver = %config.driver,
            ops = templates.len(),
            plan_len = sequence.len(),
            cycles = %config.cycles,
            recycles = config.recycles,
            "Activity initialized"
        );
        Ok(Self {
            config,
            adapter,
            sequence,
            input,
            consumer: None,
        })
    }

    /// Replaces the cycle counter with an external cycle source.
    #[must_use]
    pub fn with_input(mut self, input: Arc<dyn Input>) -> Self {
        self.input = input;
        self
    }

    /// Registers the consumer of completed windows; requires `window`.
    #[must_use]
    pub fn with_window_consumer(mut self, consumer: Arc<dyn WindowConsumer>) -> Self {
        self.consumer = Some(consumer);
        self
    }

    #[must_use]
    pub fn config(&self) -> &ActivityConfig {
        &self.config
    }

    /// Dispenser names in template order.
    #[must_use]
    pub fn op_names(&self) -> Vec<String> {
        self.sequence
            .items()
            .iter()
            .map(|dispenser| dispenser.name().to_string())
            .collect()
    }

    /// Op name per plan slot.
    #[must_use]
    pub fn plan(&self) -> Vec<String> {
        let names = self.op_names();
        self.sequence
            .plan()
            .iter()
            .map(|index| names[*index].clone())
            .collect()
    }
}
