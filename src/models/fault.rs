//! Test faults
//!
//! A fault is what a test method reports instead of returning normally. It
//! carries a type name and the chain of types it derives from, which is what
//! expected-failure matching compares against.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::Location;

/// Type name used for assertion faults
pub const ASSERT_FAILED: &str = "AssertFailed";
/// Type name used for inconclusive faults
pub const ASSERT_INCONCLUSIVE: &str = "AssertInconclusive";
/// Type name used for panics caught inside user code
pub const PANIC: &str = "panic";

/// Broad classification of a fault's origin
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Raised by the engine's assertion helpers
    AssertionFailed,
    /// Raised by `assert::inconclusive`
    Inconclusive,
    /// Any other error returned by user code
    Error,
    /// A panic caught at a method boundary
    Panic,
}

/// Source position attached to a fault
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

impl SourceLocation {
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self {
            file: location.file().to_string(),
            line: location.line(),
        }
    }
}

/// Failure reported by a test, hook or constructor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestFault {
    pub kind: FaultKind,
    pub type_name: String,
    /// Types this fault derives from, nearest first
    pub ancestors: Vec<String>,
    pub message: String,
    pub stack: Option<String>,
    pub location: Option<SourceLocation>,
}

impl TestFault {
    pub fn new(kind: FaultKind, type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            type_name: type_name.into(),
            ancestors: Vec::new(),
            message: message.into(),
            stack: None,
            location: None,
        }
    }

    /// Assertion failure
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::new(FaultKind::AssertionFailed, ASSERT_FAILED, message)
    }

    /// Inconclusive signal; always reported as `Inconclusive`
    pub fn inconclusive(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Inconclusive, ASSERT_INCONCLUSIVE, message)
    }

    /// User-level error with an explicit type name
    pub fn error(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(FaultKind::Error, type_name, message)
    }

    /// Build from any error value, using its Rust type name
    pub fn from_error<E: std::error::Error + 'static>(err: &E) -> Self {
        let mut fault = Self::error(short_type_name::<E>(), err.to_string());
        if let Some(source) = err.source() {
            fault.stack = Some(format!("caused by: {source}"));
        }
        fault
    }

    /// Build from a caught panic payload
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Self::new(FaultKind::Panic, PANIC, message)
    }

    /// Declare a base type this fault derives from
    pub fn derived_from(mut self, base: impl Into<String>) -> Self {
        self.ancestors.push(base.into());
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Whether this fault is `type_name`, or derives from it when `allow_derived`
    pub fn is_type(&self, type_name: &str, allow_derived: bool) -> bool {
        self.type_name == type_name
            || (allow_derived && self.ancestors.iter().any(|a| a == type_name))
    }
}

impl fmt::Display for TestFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

impl std::error::Error for TestFault {}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Assertion helpers for test bodies
pub mod assert {
    use super::{SourceLocation, TestFault};
    use std::fmt::Debug;

    pub type AssertResult = Result<(), TestFault>;

    #[track_caller]
    pub fn fail(message: impl Into<String>) -> TestFault {
        TestFault::assertion(message).at(SourceLocation::caller())
    }

    #[track_caller]
    pub fn inconclusive(message: impl Into<String>) -> TestFault {
        TestFault::inconclusive(message).at(SourceLocation::caller())
    }

    #[track_caller]
    pub fn is_true(condition: bool, message: &str) -> AssertResult {
        if condition {
            Ok(())
        } else {
            Err(fail(format!("Assert.IsTrue failed. {message}")))
        }
    }

    #[track_caller]
    pub fn are_equal<T: PartialEq + Debug>(expected: T, actual: T) -> AssertResult {
        if expected == actual {
            Ok(())
        } else {
            Err(fail(format!(
                "Assert.AreEqual failed. Expected:<{expected:?}>. Actual:<{actual:?}>."
            )))
        }
    }
}
