//! Core types for the cyclegen load generation engine: configuration, op
//! templates, adapter traits, completion records and metrics.

pub mod config;
pub mod cycles;
pub mod error;
pub mod error_policy;
pub mod metrics;
pub mod params;
pub mod rate;
pub mod resource;
pub mod result;
pub mod template;
pub mod traits;
pub mod units;
pub mod workload;

pub use config::{ActivityConfig, DryRun, LoggingConfig, RetryConfig, SequencerKind, ThreadSpec};
pub use cycles::CycleRange;
pub use error::{ConfigError, CoreError, CoreResult, ErrorKind};
pub use error_policy::{ErrorActions, ErrorPolicy, ErrorVerb};
pub use params::{Param, ParamMap, ParamModel};
pub use rate::{RatePolicy, RateSpec, RateVerb};
pub use resource::ResourceCache;
pub use result::{CompletionRecord, OpFailure, OpResult, OpSuccess, Outcome};
pub use template::{FieldValue, OpTemplate};
pub use traits::{DriverAdapter, Op, OpDispenser, WorkerContext};
pub use workload::Workload;
