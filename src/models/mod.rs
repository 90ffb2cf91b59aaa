//! Data models for the execution engine
//!
//! Descriptors flow in, results flow out; faults and contexts live in between.

mod context;
mod descriptor;
mod fault;
mod result;

pub use context::{CaseContext, ContextSeed};
pub use descriptor::{
    DataDeclaration, DataRow, DataSourceProvider, ExpectedFailure, FailureVerifier,
    MessageContains, TestUnitDescriptor,
};
pub use fault::{assert, FaultKind, SourceLocation, TestFault, ASSERT_FAILED, ASSERT_INCONCLUSIVE, PANIC};
pub use result::{
    CaseResult, FailureDetail, FailureOrigin, Outcome, OutcomeRecord, RunReport,
    TRACE_SECTION_HEADER,
};
