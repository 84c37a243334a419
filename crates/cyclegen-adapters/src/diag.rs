//! Diagnostic adapter: ops that simulate a backend.
//!
//! Op kinds, selected by the `op` field (or its synonym `type`):
//!
//! | kind    | behaviour                                                     |
//! |---------|---------------------------------------------------------------|
//! | `noop`  | succeeds at once                                              |
//! | `delay` | sleeps `delay` nanoseconds, then succeeds                     |
//! | `fail`  | fails with `error`; succeeds after `succeed_after` tries      |
//! | `bind`  | evaluates every named binding; payload is the rendered size   |
//!
//! Every kind reports `result` as its result code when it succeeds.
//! `dispense_fail_modulo = N` makes building the op fail on every cycle
//! divisible by `N`. `prepare = true` shares the compiled bindings of all
//! templates with the same reference key through the adapter's cache. The
//! cache entry is created by the first cycle that needs it; bindings are
//! still checked when the dispenser is built.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use cyclegen_binder::BoundValue;
use cyclegen_core::{
    ConfigError, CoreError, CoreResult, DriverAdapter, Op, OpDispenser, OpFailure, OpResult,
    OpSuccess, OpTemplate, ResourceCache, WorkerContext,
};

use crate::fields::{read_flag, NamedBindings, NumberField};

const FIELDS: &[&str] = &[
    "op",
    "type",
    "delay",
    "result",
    "error",
    "retryable",
    "succeed_after",
    "prepare",
    "dispense_fail_modulo",
];

const SYNONYMS: &[(&str, &str)] = &[("type", "op")];

/// Adapter for the `diag` driver.
#[derive(Debug, Default)]
pub struct DiagAdapter {
    prepared: Arc<ResourceCache<Arc<NamedBindings>>>,
}

impl DiagAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Templates prepared so far.
    #[must_use]
    pub fn prepared(&self) -> usize {
        self.prepared.len()
    }
}

#[derive(Debug, Clone)]
enum DiagKind {
    Noop,
    Delay(NumberField),
    Fail {
        name: String,
        retryable: bool,
        succeed_after: Option<u32>,
    },
    Bind,
}

struct DiagDispenser {
    name: String,
    kind: DiagKind,
    result: Option<NumberField>,
    fail_modulo: Option<u64>,
    bindings: Arc<NamedBindings>,
    prepared: Option<Prepared>,
}

/// Handle on the adapter's cache for a template with `prepare = true`.
struct Prepared {
    cache: Arc<ResourceCache<Arc<NamedBindings>>>,
    ref_key: u32,
}

impl Prepared {
    /// Bindings shared by every template with this reference key.
    fn resolve(
        &self,
        cycle: u64,
        name: &str,
        compiled: &Arc<NamedBindings>,
    ) -> CoreResult<Arc<NamedBindings>> {
        self.cache
            .get_or_try_init(self.ref_key, || {
                tracing::debug!(op = %name, ref_key = self.ref_key, cycle, "Prepared diag bindings");
                Ok(Arc::clone(compiled))
            })
            .map_err(|err| CoreError::dispense(cycle, name, err.to_string()))
    }
}

impl DriverAdapter for DiagAdapter {
    fn name(&self) -> &str {
        "diag"
    }

    fn dispenser(&self, template: &OpTemplate) -> CoreResult<Arc<dyn OpDispenser>> {
        let name = template.name();
        let mut errors = ConfigError::default();
        if let Err(violations) = template.check_fields(FIELDS, SYNONYMS) {
            errors.extend(violations);
        }

        let kind_name = template
            .static_str("op")
            .or_else(|| template.static_str("type"))
            .unwrap_or("noop");
        let kind = match kind_name {
            "noop" => Some(DiagKind::Noop),
            "delay" => match NumberField::read(template, "delay", &mut errors) {
                Some(delay) => Some(DiagKind::Delay(delay)),
                None => {
                    if !template.is_defined("delay") {
                        errors.push(format!("op `{name}`: `delay` op needs a `delay` field"));
                    }
                    None
                }
            },
            "fail" => {
                let succeed_after = NumberField::read(template, "succeed_after", &mut errors)
                    .and_then(|field| match field {
                        NumberField::Fixed(n) => match u32::try_from(n) {
                            Ok(n) => Some(n),
                            Err(_) => {
                                errors.push(format!("op `{name}`: `succeed_after` is too large"));
                                None
                            }
                        },
                        NumberField::Bound(_) => {
                            errors.push(format!("op `{name}`: `succeed_after` must be static"));
                            None
                        }
                    });
                Some(DiagKind::Fail {
                    name: template.static_str("error").unwrap_or("diag_error").to_string(),
                    retryable: read_flag(template, "retryable", &mut errors).unwrap_or(true),
                    succeed_after,
                })
            }
            "bind" => Some(DiagKind::Bind),
            other => {
                errors.push(format!(
                    "op `{name}`: unknown diag op `{other}` (expected noop, delay, fail or bind)"
                ));
                None
            }
        };

        let result = NumberField::read(template, "result", &mut errors);
        let fail_modulo = match NumberField::read(template, "dispense_fail_modulo", &mut errors) {
            Some(NumberField::Fixed(0)) => {
                errors.push(format!("op `{name}`: `dispense_fail_modulo` must be > 0"));
                None
            }
            Some(NumberField::Fixed(n)) => Some(n),
            Some(NumberField::Bound(_)) => {
                errors.push(format!("op `{name}`: `dispense_fail_modulo` must be static"));
                None
            }
            None => None,
        };
        let prepared = read_flag(template, "prepare", &mut errors)
            .unwrap_or(false)
            .then(|| Prepared {
                cache: Arc::clone(&self.prepared),
                ref_key: template.ref_key(),
            });
        let bindings = Arc::new(NamedBindings::compile(template, &mut errors));

        if !errors.is_empty() {
            return Err(errors.into());
        }
        match kind {
            Some(kind) => Ok(Arc::new(DiagDispenser {
                name: name.to_string(),
                kind,
                result,
                fail_modulo,
                bindings,
                prepared,
            })),
            None => Err(CoreError::internal(format!(
                "op `{name}` rejected without a reported violation"
            ))),
        }
    }
}

impl OpDispenser for DiagDispenser {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, cycle: u64, _ctx: &mut WorkerContext) -> CoreResult<Box<dyn Op>> {
        if let Some(modulo) = self.fail_modulo {
            if cycle % modulo == 0 {
                return Err(CoreError::dispense(
                    cycle,
                    &self.name,
                    format!("cycle is divisible by dispense_fail_modulo={modulo}"),
                ));
            }
        }
        let bindings = match &self.prepared {
            Some(prepared) => prepared.resolve(cycle, &self.name, &self.bindings)?,
            None => Arc::clone(&self.bindings),
        };
        let code = self
            .result
            .as_ref()
            .map_or(0, |field| i32::try_from(field.value(cycle)).unwrap_or(i32::MAX));

        let action = match &self.kind {
            DiagKind::Noop => Action::Succeed,
            DiagKind::Delay(delay) => Action::Sleep(Duration::from_nanos(delay.value(cycle))),
            DiagKind::Fail {
                name,
                retryable,
                succeed_after,
            } => Action::Fail {
                name: name.clone(),
                retryable: *retryable,
                remaining: *succeed_after,
            },
            DiagKind::Bind => Action::Render(bindings.apply(cycle)),
        };
        Ok(Box::new(DiagOp {
            cycle,
            code,
            action,
            bindings,
        }))
    }
}

enum Action {
    Succeed,
    Sleep(Duration),
    Fail {
        name: String,
        retryable: bool,
        /// Failures left before the op succeeds; `None` fails forever.
        remaining: Option<u32>,
    },
    Render(Vec<BoundValue>),
}

struct DiagOp {
    cycle: u64,
    code: i32,
    action: Action,
    bindings: Arc<NamedBindings>,
}

#[async_trait]
impl Op for DiagOp {
    async fn execute(&mut self) -> OpResult {
        let success = OpSuccess {
            code: self.code,
            payload_bytes: None,
        };
        match &mut self.action {
            Action::Succeed => Ok(success),
            Action::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(success)
            }
            Action::Fail {
                name,
                retryable,
                remaining,
            } => match remaining {
                Some(0) => Ok(success),
                _ => {
                    if let Some(left) = remaining.as_mut() {
                        *left -= 1;
                    }
                    let message = format!("diag failure on cycle {}", self.cycle);
                    Err(if *retryable {
                        OpFailure::retryable(name.clone(), message)
                    } else {
                        OpFailure::fatal(name.clone(), message)
                    })
                }
            },
            Action::Render(values) => {
                let bytes = values.iter().map(BoundValue::rendered_len).sum::<usize>();
                Ok(OpSuccess {
                    payload_bytes: Some(bytes as u64),
                    ..success
                })
            }
        }
    }

    fn describe(&self) -> String {
        match &self.action {
            Action::Succeed => format!("noop cycle={}", self.cycle),
            Action::Sleep(duration) => format!("delay cycle={} for {duration:?}", self.cycle),
            Action::Fail { name, .. } => format!("fail cycle={} with {name}", self.cycle),
            Action::Render(values) => self
                .bindings
                .names()
                .zip(values)
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}
