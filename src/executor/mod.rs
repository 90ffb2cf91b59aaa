//! Scheduler and run orchestration
//!
//! Partitions descriptors, dispatches them on a bounded worker pool and
//! aggregates the results for a result sink.

mod parallel;
mod partition;
mod runner;

pub use parallel::{ScheduleOutcome, Scheduler};
pub use partition::{partition, DispatchUnit, Partition, ScheduleState};
pub use runner::Engine;
