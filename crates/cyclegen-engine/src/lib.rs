//! Cycle-driven op execution: cycle inputs, the rate gate, op sequencing,
//! completion tracking, workers and the activity controller.

pub mod activity;
pub mod controller;
pub mod errors;
pub mod input;
pub mod interval;
pub mod ratelimit;
pub mod sequence;
mod sync;
pub mod tracker;
pub mod worker;

pub use activity::Activity;
pub use controller::{ActivityController, ActivityState, ActivitySummary, StopReason};
pub use errors::{CycleError, Decision, ErrorHandler};
pub use input::{CycleInput, CycleSegment, Input, SequenceInput};
pub use interval::IntervalReporter;
pub use ratelimit::RateLimiter;
pub use sequence::OpSequence;
pub use tracker::{CompletedWindow, CompletionTracker, TrackerSnapshot, WindowConsumer};
pub use worker::WorkerState;
