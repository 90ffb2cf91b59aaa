//! Body outcome classification
//!
//! Maps how a case body finished onto an outcome and failure detail,
//! applying the descriptor's expected-failure policy.

use std::time::Duration;

use crate::lifecycle::MethodResult;
use crate::models::{ExpectedFailure, FailureDetail, FailureOrigin, FaultKind, Outcome, TestFault};

/// How a case body finished
#[derive(Debug)]
pub enum BodyCompletion {
    Returned(MethodResult),
    TimedOut(Duration),
}

/// Classified outcome of a body
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub outcome: Outcome,
    pub failure: Option<FailureDetail>,
}

impl Classification {
    fn passed(outcome: Outcome) -> Self {
        Self {
            outcome,
            failure: None,
        }
    }

    fn failed(origin: FailureOrigin, message: impl Into<String>, fault: Option<&TestFault>) -> Self {
        let failure = match fault {
            Some(fault) => FailureDetail::from_fault(origin, message, fault),
            None => FailureDetail::new(origin, message),
        };
        Self {
            outcome: Outcome::Failed,
            failure: Some(failure),
        }
    }
}

/// Classify a body completion
///
/// `provisional` is the outcome the body reported through its context,
/// used only when the body returned normally without an expected failure.
pub fn classify(
    completion: &BodyCompletion,
    expected: Option<&ExpectedFailure>,
    provisional: Option<Outcome>,
) -> Classification {
    let result = match completion {
        BodyCompletion::TimedOut(limit) => {
            return Classification {
                outcome: Outcome::TimedOut,
                failure: Some(FailureDetail::new(
                    FailureOrigin::Timeout,
                    format!(
                        "Test exceeded execution timeout period ({}ms).",
                        limit.as_millis()
                    ),
                )),
            };
        }
        BodyCompletion::Returned(result) => result,
    };

    if let Err(fault) = result {
        if fault.kind == FaultKind::Inconclusive {
            return Classification {
                outcome: Outcome::Inconclusive,
                failure: Some(FailureDetail::from_fault(
                    FailureOrigin::Inconclusive,
                    format!("Assert.Inconclusive failed. {}", fault.message),
                    fault,
                )),
            };
        }
    }

    match (result, expected) {
        (Ok(()), None) => Classification::passed(provisional.unwrap_or(Outcome::Passed)),
        (Ok(()), Some(expected)) => Classification::failed(
            FailureOrigin::ExpectedFailureMissing,
            format!(
                "Test method did not throw expected exception {}.",
                expected.type_name
            ),
            None,
        ),
        (Err(fault), Some(expected)) if fault.is_type(&expected.type_name, expected.allow_derived) => {
            match expected.verifier.as_ref().map(|v| v.verify(fault)) {
                None | Some(Ok(())) => Classification::passed(Outcome::Passed),
                Some(Err(mismatch)) => Classification::failed(
                    FailureOrigin::ExpectedFailureMismatch,
                    mismatch,
                    Some(fault),
                ),
            }
        }
        // Assertion failures are never swallowed by an expected-failure declaration
        (Err(fault), _) if fault.kind == FaultKind::AssertionFailed => Classification::failed(
            FailureOrigin::Assertion,
            format!("Assert failed. {}", fault.message),
            Some(fault),
        ),
        (Err(fault), Some(expected)) => Classification::failed(
            FailureOrigin::ExpectedFailureMismatch,
            format!(
                "Test method threw exception {}, but exception {} was expected. Exception message: {}",
                fault.type_name, expected.type_name, fault.message
            ),
            Some(fault),
        ),
        (Err(fault), None) => Classification::failed(
            FailureOrigin::UnhandledError,
            format!("Test method threw exception {fault}"),
            Some(fault),
        ),
    }
}
