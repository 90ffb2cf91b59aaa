//! Test unit descriptors
//!
//! Immutable records handed to the engine by the metadata resolver. The
//! engine reads them; it never mutates or re-inspects them.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::fault::TestFault;

/// One declared test method
#[derive(Clone, Debug)]
pub struct TestUnitDescriptor {
    pub module: String,
    pub class_name: String,
    pub method_name: String,
    pub is_async: bool,
    pub display_name: Option<String>,
    pub timeout: Option<Duration>,
    pub expected_failure: Option<ExpectedFailure>,
    pub parallelizable: bool,
    pub ignore_reason: Option<String>,
    /// Declarative per-case properties, in declaration order
    pub properties: Vec<(String, Value)>,
    pub data: DataDeclaration,
}

impl TestUnitDescriptor {
    pub fn new(
        module: impl Into<String>,
        class_name: impl Into<String>,
        method_name: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            class_name: class_name.into(),
            method_name: method_name.into(),
            is_async: false,
            display_name: None,
            timeout: None,
            expected_failure: None,
            parallelizable: true,
            ignore_reason: None,
            properties: Vec::new(),
            data: DataDeclaration::default(),
        }
    }

    /// `Class.Method`
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.class_name, self.method_name)
    }

    /// Display name before any data-row decoration
    pub fn base_display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.method_name)
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn expect_failure(mut self, expected: ExpectedFailure) -> Self {
        self.expected_failure = Some(expected);
        self
    }

    /// Exclude from the parallel partition
    pub fn non_parallel(mut self) -> Self {
        self.parallelizable = false;
        self
    }

    pub fn ignored(mut self, reason: impl Into<String>) -> Self {
        self.ignore_reason = Some(reason.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    pub fn with_row(mut self, row: DataRow) -> Self {
        self.data.rows.push(row);
        self
    }

    pub fn with_data_source(mut self, source: Arc<dyn DataSourceProvider>) -> Self {
        self.data.source = Some(source);
        self
    }
}

impl fmt::Display for TestUnitDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.module, self.full_name())
    }
}

/// Checks a matched fault beyond its type
pub trait FailureVerifier: Send + Sync + fmt::Debug {
    /// `Err` carries the mismatch description reported to the user
    fn verify(&self, fault: &TestFault) -> Result<(), String>;
}

/// Requires the fault message to contain a fragment
#[derive(Debug, Clone)]
pub struct MessageContains(pub String);

impl FailureVerifier for MessageContains {
    fn verify(&self, fault: &TestFault) -> Result<(), String> {
        if fault.message.contains(&self.0) {
            Ok(())
        } else {
            Err(format!(
                "Exception message '{}' does not contain expected text '{}'.",
                fault.message, self.0
            ))
        }
    }
}

/// Declared expected-failure condition
#[derive(Clone, Debug)]
pub struct ExpectedFailure {
    pub type_name: String,
    pub allow_derived: bool,
    pub verifier: Option<Arc<dyn FailureVerifier>>,
}

impl ExpectedFailure {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            allow_derived: false,
            verifier: None,
        }
    }

    pub fn allow_derived(mut self) -> Self {
        self.allow_derived = true;
        self
    }

    pub fn message_contains(self, fragment: impl Into<String>) -> Self {
        self.with_verifier(Arc::new(MessageContains(fragment.into())))
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn FailureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }
}

/// One inline data row
#[derive(Clone, Debug, PartialEq)]
pub struct DataRow {
    pub values: Vec<Value>,
    pub display_name: Option<String>,
}

impl DataRow {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            display_name: None,
        }
    }

    pub fn named(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

/// External tabular data collaborator
pub trait DataSourceProvider: Send + Sync + fmt::Debug {
    fn rows(&self, descriptor: &TestUnitDescriptor) -> Result<Vec<DataRow>, String>;
}

/// Data declared on a descriptor; inline rows win over the provider
#[derive(Clone, Debug, Default)]
pub struct DataDeclaration {
    pub rows: Vec<DataRow>,
    pub source: Option<Arc<dyn DataSourceProvider>>,
}

impl DataDeclaration {
    pub fn is_data_driven(&self) -> bool {
        !self.rows.is_empty() || self.source.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_builder() {
        let descriptor = TestUnitDescriptor::new("core", "Calc", "Adds")
            .with_timeout(Duration::from_millis(250))
            .non_parallel()
            .with_property("owner", "qa")
            .with_row(DataRow::new(vec![json!(1), json!(2)]));

        assert_eq!(descriptor.full_name(), "Calc.Adds");
        assert_eq!(descriptor.to_string(), "core::Calc.Adds");
        assert!(!descriptor.parallelizable);
        assert!(descriptor.data.is_data_driven());
        assert_eq!(descriptor.base_display_name(), "Adds");
    }

    #[test]
    fn test_message_contains_verifier() {
        let verifier = MessageContains("denied".into());
        assert!(verifier
            .verify(&TestFault::error("Io", "access denied"))
            .is_ok());
        let err = verifier
            .verify(&TestFault::error("Io", "not found"))
            .unwrap_err();
        assert!(err.contains("'denied'"));
    }
}
