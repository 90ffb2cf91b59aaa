//! Error types
//!
//! Failures that are not test outcomes: binding inspection and configuration.

use thiserror::Error;

use crate::models::Outcome;

/// Failure while resolving or inspecting lifecycle bindings
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    #[error("Module '{0}' is not known to the resolver")]
    UnknownModule(String),

    #[error("Class '{class}' was not found in module '{module}'")]
    UnknownClass { module: String, class: String },

    #[error("Method '{method}' was not found on class '{class}'")]
    UnknownMethod { class: String, method: String },

    #[error("Base class '{base}' of '{class}' was not found")]
    UnknownBase { class: String, base: String },

    #[error("Method '{method}' has an invalid signature: {reason}")]
    InvalidSignature { method: String, reason: String },

    #[error("Inheritance cycle detected at class '{0}'")]
    InheritanceCycle(String),

    #[error("Class '{0}' has no constructor and cannot be instantiated")]
    MissingConstructor(String),
}

impl BindingError {
    /// Outcome reported for every case that depends on this binding
    pub fn outcome(&self) -> Outcome {
        match self {
            BindingError::UnknownModule(_)
            | BindingError::UnknownClass { .. }
            | BindingError::UnknownMethod { .. } => Outcome::NotFound,
            _ => Outcome::NotRunnable,
        }
    }
}

/// Invalid run configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Worker count must be at least 1")]
    ZeroWorkers,

    #[error("Invalid worker count '{0}' (expected 'auto' or a positive integer)")]
    InvalidWorkers(String),

    #[error("Unknown parallel scope '{0}' (expected 'method' or 'class')")]
    UnknownScope(String),

    #[error("Unknown class cleanup behavior '{0}' (expected 'end_of_module' or 'end_of_class')")]
    UnknownCleanupBehavior(String),

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_error_outcomes() {
        assert_eq!(
            BindingError::UnknownClass {
                module: "m".into(),
                class: "C".into()
            }
            .outcome(),
            Outcome::NotFound
        );
        assert_eq!(
            BindingError::InheritanceCycle("C".into()).outcome(),
            Outcome::NotRunnable
        );
        assert_eq!(
            BindingError::MissingConstructor("C".into()).outcome(),
            Outcome::NotRunnable
        );
    }

    #[test]
    fn test_error_messages() {
        let err = BindingError::InvalidSignature {
            method: "Calc.Add".into(),
            reason: "declared async but bound synchronously".into(),
        };
        assert!(err.to_string().contains("Calc.Add"));
        assert_eq!(
            ConfigError::UnknownScope("file".into()).to_string(),
            "Unknown parallel scope 'file' (expected 'method' or 'class')"
        );
    }
}
