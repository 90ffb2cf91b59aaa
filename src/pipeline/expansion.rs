//! Data expansion
//!
//! Turns one descriptor into its concrete cases and runs them through the
//! invoker in declaration order. Inline rows win over a data-source
//! provider; a descriptor without data is a single case.

use serde_json::Value;
use tracing::{debug, warn};

use super::invoker::{BoundTarget, CaseInvoker};
use crate::config::ClassCleanupBehavior;
use crate::error::BindingError;
use crate::lifecycle::{ClassLifecycleState, ModuleLifecycleState};
use crate::models::{CaseResult, DataRow, FailureDetail, FailureOrigin, Outcome, TestUnitDescriptor};

/// One concrete case of a descriptor
#[derive(Clone, Debug, PartialEq)]
pub struct ExpandedCase {
    /// Zero-based; `None` for descriptors without data
    pub row_index: Option<usize>,
    pub display_name: String,
    pub args: Vec<Value>,
}

impl ExpandedCase {
    pub fn single(descriptor: &TestUnitDescriptor) -> Self {
        Self {
            row_index: None,
            display_name: descriptor.base_display_name().to_string(),
            args: Vec::new(),
        }
    }
}

/// `"<method> (<v1>,<v2>)"` unless the row names itself
pub fn row_label(descriptor: &TestUnitDescriptor, row: &DataRow) -> String {
    if let Some(name) = &row.display_name {
        return name.clone();
    }
    let values: Vec<String> = row
        .values
        .iter()
        .map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    format!("{} ({})", descriptor.base_display_name(), values.join(","))
}

/// Argument sets for a descriptor, in declaration order
///
/// Errors when the provider fails or the declaration yields no rows.
pub fn expand(descriptor: &TestUnitDescriptor) -> Result<Vec<ExpandedCase>, String> {
    if !descriptor.data.is_data_driven() {
        return Ok(vec![ExpandedCase::single(descriptor)]);
    }

    let rows = if !descriptor.data.rows.is_empty() {
        descriptor.data.rows.clone()
    } else {
        match &descriptor.data.source {
            Some(source) => source
                .rows(descriptor)
                .map_err(|err| format!("Data source for {} failed: {}", descriptor.full_name(), err))?,
            None => Vec::new(),
        }
    };

    if rows.is_empty() {
        return Err(format!(
            "Data-driven test {} declared no data rows.",
            descriptor.full_name()
        ));
    }

    Ok(rows
        .iter()
        .enumerate()
        .map(|(index, row)| ExpandedCase {
            row_index: Some(index),
            display_name: row_label(descriptor, row),
            args: row.values.clone(),
        })
        .collect())
}

fn single_result(descriptor: &TestUnitDescriptor, outcome: Outcome, detail: FailureDetail) -> Vec<CaseResult> {
    vec![CaseResult::new(descriptor, descriptor.base_display_name(), outcome).with_failure(detail)]
}

fn not_runnable(descriptor: &TestUnitDescriptor, err: BindingError) -> Vec<CaseResult> {
    single_result(
        descriptor,
        err.outcome(),
        FailureDetail::new(FailureOrigin::DescriptorNotRunnable, err.to_string()),
    )
}

/// Run every case of a descriptor; always yields at least one result
pub async fn run_descriptor(invoker: &CaseInvoker, descriptor: &TestUnitDescriptor) -> Vec<CaseResult> {
    if let Some(reason) = &descriptor.ignore_reason {
        debug!("Skipping ignored {}", descriptor);
        return vec![CaseResult::ignored(descriptor, reason.as_str())];
    }

    let (module, class) = invoker.registry().bind_lifecycle(descriptor);
    let mut results = run_bound(invoker, descriptor, &module, &class).await;

    if invoker.config().class_cleanup == ClassCleanupBehavior::EndOfClass && class.finish_one() {
        let warnings = invoker.run_class_cleanup(&class).await;
        if let Some(last) = results.last_mut() {
            invoker.attach_warnings(last, warnings);
        }
    }
    results
}

async fn run_bound(
    invoker: &CaseInvoker,
    descriptor: &TestUnitDescriptor,
    module: &ModuleLifecycleState,
    class: &ClassLifecycleState,
) -> Vec<CaseResult> {
    let chains = match class.chains() {
        Ok(chains) => chains,
        Err(cached) => return single_result(descriptor, cached.outcome, cached.detail.clone()),
    };

    let Some(method) = chains.method(&descriptor.method_name) else {
        let err = BindingError::UnknownMethod {
            class: descriptor.class_name.clone(),
            method: descriptor.method_name.clone(),
        };
        return single_result(
            descriptor,
            err.outcome(),
            FailureDetail::new(FailureOrigin::DescriptorNotFound, err.to_string()),
        );
    };

    if method.method.is_async() != descriptor.is_async {
        let reason = if descriptor.is_async {
            "declared async but bound to a synchronous body"
        } else {
            "declared synchronous but bound to an async body"
        };
        return not_runnable(
            descriptor,
            BindingError::InvalidSignature {
                method: descriptor.full_name(),
                reason: reason.to_string(),
            },
        );
    }

    if !method.parameters.is_empty() && !descriptor.data.is_data_driven() {
        return not_runnable(
            descriptor,
            BindingError::InvalidSignature {
                method: descriptor.full_name(),
                reason: format!(
                    "takes {} parameter(s) but declares no data",
                    method.parameters.len()
                ),
            },
        );
    }

    let cases = match expand(descriptor) {
        Ok(cases) => cases,
        Err(message) => {
            warn!("{}", message);
            return single_result(
                descriptor,
                Outcome::NotRunnable,
                FailureDetail::new(FailureOrigin::DescriptorNotRunnable, message),
            );
        }
    };

    let target = BoundTarget {
        descriptor,
        module,
        class,
        chains,
        method,
    };

    let mut results = Vec::with_capacity(cases.len());
    for case in &cases {
        if let Err(message) = method.check_arguments(&case.args) {
            results.push(
                CaseResult::new(descriptor, case.display_name.as_str(), Outcome::Failed)
                    .with_failure(FailureDetail::new(FailureOrigin::ArgumentMismatch, message))
                    .with_row(case.row_index),
            );
            continue;
        }
        results.push(invoker.invoke(&target, case).await);
    }
    results
}
