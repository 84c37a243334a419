//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use cyclegen_binder::{hash_range, Binding, BoundValue};
use cyclegen_core::{
    ActivityConfig, CompletionRecord, CoreError, CoreResult, DriverAdapter, ErrorKind, Op,
    OpDispenser, OpFailure, OpResult, OpSuccess, OpTemplate, Outcome, ParamMap, WorkerContext,
};
use cyclegen_engine::{
    Activity, ActivityController, ActivitySummary, CompletedWindow, WindowConsumer,
};

/// Adapter whose op kind comes from the template's `op` field.
pub struct TestAdapter;

enum Kind {
    Noop,
    /// Sleeps a per-cycle pseudo-random number of ms in `[0, max_ms]`.
    Delay { max_ms: u64 },
    /// Fails `failures` times, then succeeds.
    Flaky { failures: u32, retryable: bool },
    /// Fails the dispense of every `modulo`-th cycle.
    DispenseFail { modulo: u64 },
    Hang,
    Explode,
    Bind { binding: Binding },
}

struct TestDispenser {
    name: String,
    kind: Kind,
}

impl DriverAdapter for TestAdapter {
    fn name(&self) -> &str {
        "test"
    }

    fn dispenser(&self, template: &OpTemplate) -> CoreResult<Arc<dyn OpDispenser>> {
        let number = |field: &str, default: u64| {
            template
                .static_value(field)
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(default)
        };
        let kind = match template.static_str("op").unwrap_or("noop") {
            "noop" => Kind::Noop,
            "delay" => Kind::Delay {
                max_ms: number("max_ms", 5),
            },
            "flaky" => Kind::Flaky {
                failures: number("failures", 2) as u32,
                retryable: template
                    .static_value("retryable")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(true),
            },
            "dispense_fail" => Kind::DispenseFail {
                modulo: number("modulo", 10),
            },
            "hang" => Kind::Hang,
            "explode" => Kind::Explode,
            "bind" => Kind::Bind {
                binding: Binding::parse(template.binding_spec("value").unwrap_or("Identity()"))?,
            },
            other => return Err(CoreError::config(format!("unknown test op `{other}`"))),
        };
        Ok(Arc::new(TestDispenser {
            name: template.name().to_string(),
            kind,
        }))
    }
}

impl OpDispenser for TestDispenser {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, cycle: u64, _ctx: &mut WorkerContext) -> CoreResult<Box<dyn Op>> {
        Ok(match &self.kind {
            Kind::Noop => Box::new(TestOp::Noop(cycle)),
            Kind::Delay { max_ms } => {
                Box::new(TestOp::Delay(Duration::from_millis(hash_range(cycle, 0, *max_ms))))
            }
            Kind::Flaky {
                failures,
                retryable,
            } => Box::new(TestOp::Flaky {
                left: *failures,
                retryable: *retryable,
            }),
            Kind::DispenseFail { modulo } => {
                if cycle % modulo == 0 {
                    return Err(CoreError::dispense(cycle, &self.name, "resource not ready"));
                }
                Box::new(TestOp::Noop(cycle))
            }
            Kind::Hang => Box::new(TestOp::Delay(Duration::from_secs(3600))),
            Kind::Explode => Box::new(TestOp::Explode),
            Kind::Bind { binding } => Box::new(TestOp::Bound(binding.apply(cycle))),
        })
    }
}

enum TestOp {
    Noop(u64),
    Delay(Duration),
    Flaky { left: u32, retryable: bool },
    Explode,
    Bound(BoundValue),
}

#[async_trait]
impl Op for TestOp {
    async fn execute(&mut self) -> OpResult {
        match self {
            Self::Noop(_) | Self::Bound(_) => Ok(OpSuccess::ok()),
            Self::Delay(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(OpSuccess::ok())
            }
            Self::Flaky { left, retryable } => {
                if *left == 0 {
                    return Ok(OpSuccess::with_payload(64));
                }
                *left -= 1;
                if *retryable {
                    Err(OpFailure::retryable("flaky", "try again"))
                } else {
                    Err(OpFailure::fatal("flaky", "gave up"))
                }
            }
            Self::Explode => panic!("op executed during a dry run"),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Noop(cycle) => format!("noop {cycle}"),
            Self::Delay(duration) => format!("delay {duration:?}"),
            Self::Flaky { left, .. } => format!("flaky ({left} failures left)"),
            Self::Explode => "explode".to_string(),
            Self::Bound(value) => value.to_string(),
        }
    }
}

/// Keeps every delivered window.
#[derive(Default)]
pub struct Collector {
    windows: Mutex<Vec<CompletedWindow>>,
}

impl WindowConsumer for Collector {
    fn on_window(&self, window: CompletedWindow) {
        self.windows.lock().push(window);
    }
}

impl Collector {
    pub fn window_starts(&self) -> Vec<u64> {
        self.windows.lock().iter().map(|w| w.start).collect()
    }

    pub fn windows(&self) -> Vec<CompletedWindow> {
        self.windows.lock().clone()
    }

    pub fn records(&self) -> Vec<CompletionRecord> {
        self.windows
            .lock()
            .iter()
            .flat_map(|w| w.records.iter().cloned())
            .collect()
    }
}

/// Test-driver parameters with reporting off and a window of 1000 unless given.
pub fn params(text: &str) -> ParamMap {
    let mut params = ParamMap::parse(text).unwrap().with("driver", "test");
    for (key, default) in [("interval", "0"), ("window", "1000")] {
        if !params.contains(key) {
            params.set(key, default);
        }
    }
    params
}

pub fn template(name: &str, op: &str) -> OpTemplate {
    OpTemplate::new(name, 0).with_static("op", op)
}

/// Controller over a single-template workload, delivering windows to a collector.
pub fn controller(params: ParamMap, template: OpTemplate) -> (ActivityController, Arc<Collector>) {
    let config = ActivityConfig::from_params(&params).unwrap();
    let activity = Activity::new(config, Arc::new(TestAdapter), &[template]).unwrap();
    with_collector(activity)
}

pub fn with_collector(activity: Activity) -> (ActivityController, Arc<Collector>) {
    let collector = Arc::new(Collector::default());
    let activity = activity.with_window_consumer(collector.clone());
    (ActivityController::new(activity).unwrap(), collector)
}

pub async fn run(params: ParamMap, template: OpTemplate) -> (ActivitySummary, Arc<Collector>) {
    let (controller, collector) = controller(params, template);
    let summary = controller.run().await.unwrap();
    (summary, collector)
}

/// Records of cycles that ended in an error of `kind`.
pub fn errors_of(records: &[CompletionRecord], kind: ErrorKind) -> Vec<u64> {
    records
        .iter()
        .filter(|r| r.outcome.error_kind() == Some(kind) && !matches!(r.outcome, Outcome::Ignored { .. }))
        .map(|r| r.cycle)
        .collect()
}
