//! Invocation pipeline
//!
//! Everything that happens to one descriptor once the scheduler hands it to
//! a worker: expansion into cases, the per-case lifecycle, the timeout
//! boundary and outcome classification.

mod bounded;
mod classify;
mod expansion;
mod invoker;

pub use bounded::{run_bounded, BoundedOutcome, InFlight};
pub use classify::{classify, BodyCompletion, Classification};
pub use expansion::{expand, row_label, run_descriptor, ExpandedCase};
pub use invoker::{BoundTarget, CaseInvoker};
