//! Case invoker
//!
//! Runs one concrete case end to end: module and class initialization
//! through the lifecycle gates, construction, context injection, the
//! instance initialize chain, the body under its timeout boundary,
//! classification, the cleanup chain and disposal. Every failure becomes
//! part of the returned [`CaseResult`]; nothing escapes as a panic.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::bounded::run_bounded;
use super::classify::classify;
use super::expansion::ExpandedCase;
use crate::config::RunConfig;
use crate::lifecycle::{
    CachedFailure, ClassChains, ClassLifecycleState, ContextSlot, LifecycleRegistry,
    ModuleLifecycleState, TestInstance, TestMethod,
};
use crate::models::{
    CaseContext, CaseResult, ContextSeed, FailureDetail, FailureOrigin, Outcome, TestFault,
    TestUnitDescriptor,
};
use crate::output::OutputMultiplexer;
use crate::utils::Timer;

/// Everything resolved for one descriptor before any case runs
pub struct BoundTarget<'a> {
    pub descriptor: &'a TestUnitDescriptor,
    pub module: &'a ModuleLifecycleState,
    pub class: &'a ClassLifecycleState,
    pub chains: &'a ClassChains,
    pub method: &'a TestMethod,
}

/// Invocation pipeline for a single run
pub struct CaseInvoker {
    registry: Arc<LifecycleRegistry>,
    output: Arc<OutputMultiplexer>,
    config: Arc<RunConfig>,
    cancellation: CancellationToken,
}

impl CaseInvoker {
    pub fn new(
        registry: Arc<LifecycleRegistry>,
        output: Arc<OutputMultiplexer>,
        config: Arc<RunConfig>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            registry,
            output,
            config,
            cancellation,
        }
    }

    pub fn registry(&self) -> &LifecycleRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run one expanded case
    pub async fn invoke(&self, target: &BoundTarget<'_>, case: &ExpandedCase) -> CaseResult {
        let timer = Timer::start(case.display_name.as_str());
        let ctx = self.context(target.descriptor, case);
        let mut result = CaseResult::new(target.descriptor, case.display_name.as_str(), Outcome::Passed)
            .with_row(case.row_index);

        debug!("Invoking {}", case.display_name);
        self.execute(target, &ctx, case, &mut result).await;
        self.finalize(ctx, timer, result)
    }

    fn context(&self, descriptor: &TestUnitDescriptor, case: &ExpandedCase) -> CaseContext {
        CaseContext::new(
            ContextSeed {
                module: &descriptor.module,
                class_name: &descriptor.class_name,
                method_name: &descriptor.method_name,
                display_name: case.display_name.clone(),
                row_index: case.row_index,
                run_parameters: &self.config.parameters,
                properties: &descriptor.properties,
                cancellation: self.cancellation.child_token(),
            },
            &self.output,
        )
    }

    async fn execute(
        &self,
        target: &BoundTarget<'_>,
        ctx: &CaseContext,
        case: &ExpandedCase,
        result: &mut CaseResult,
    ) {
        let counter = self.registry.init_counter();
        if let Err(cached) = target.module.ensure_initialized(ctx, counter).await {
            apply_cached(result, &cached);
            return;
        }
        if let Err(cached) = target.class.ensure_initialized(ctx, counter).await {
            apply_cached(result, &cached);
            return;
        }

        let class_name = &target.descriptor.class_name;
        let constructed = catch_unwind(AssertUnwindSafe(|| (target.chains.constructor)()))
            .unwrap_or_else(|panic| Err(TestFault::from_panic(panic)));
        let mut instance = match constructed {
            Ok(instance) => instance,
            Err(fault) => {
                fail(
                    result,
                    FailureOrigin::Construction,
                    format!("Unable to create instance of class {class_name}. Error: {fault}."),
                    &fault,
                );
                return;
            }
        };

        let ready = match bind_context(instance.as_mut(), ctx) {
            Ok(()) => run_test_initialize(target.chains, instance.as_mut(), ctx, result).await,
            Err(fault) => {
                fail(
                    result,
                    FailureOrigin::ContextBinding,
                    format!("Unable to set the test context for class {class_name}. Error: {fault}."),
                    &fault,
                );
                false
            }
        };

        if ready {
            // A declared zero disables the limit, including the default
            let timeout = target
                .descriptor
                .timeout
                .or_else(|| self.config.default_timeout())
                .filter(|limit| !limit.is_zero());
            let bounded = run_bounded(
                target.method.method.clone(),
                instance,
                ctx,
                case.args.clone(),
                timeout,
                self.config.abort_grace(),
            )
            .await;

            let classification = classify(
                &bounded.completion,
                target.descriptor.expected_failure.as_ref(),
                ctx.current_outcome(),
            );
            result.outcome = classification.outcome;
            result.failure = classification.failure;
            result.warnings.extend(bounded.warnings);

            match bounded.instance {
                Some(returned) => instance = returned,
                None => return,
            }
        }

        let warnings = run_test_cleanup(target.chains, instance.as_mut(), ctx).await;
        self.attach_warnings(result, warnings);
    }

    /// Attach cleanup warnings, flipping the outcome when configured to
    pub fn attach_warnings(&self, result: &mut CaseResult, warnings: Vec<String>) {
        if warnings.is_empty() {
            return;
        }
        if self.config.cleanup_warnings_as_failures
            && matches!(result.outcome, Outcome::Passed | Outcome::Inconclusive)
        {
            result.outcome = Outcome::Failed;
            result.failure = Some(FailureDetail::new(FailureOrigin::Cleanup, warnings.join(" ")));
        }
        result.warnings.extend(warnings);
    }

    /// Class cleanup outside any case, for end-of-class scheduling
    pub async fn run_class_cleanup(&self, class: &ClassLifecycleState) -> Vec<String> {
        let ctx = CaseContext::detached(class.module(), class.class_name(), &self.output);
        let warnings = class.run_cleanup(&ctx).await;
        self.output.close_scope(ctx.stdout_scope());
        self.output.close_scope(ctx.trace_scope());
        warnings
    }

    fn finalize(&self, ctx: CaseContext, timer: Timer, mut result: CaseResult) -> CaseResult {
        let (duration, started_at, ended_at) = timer.stop();
        result.duration = duration;
        result.started_at = started_at;
        result.ended_at = ended_at;
        result.stdout = self.output.close_scope(ctx.stdout_scope());
        let trace = self.output.close_scope(ctx.trace_scope());
        result.trace = self.config.capture_trace.then_some(trace);
        result.artifacts = ctx.result_files();

        debug!("{}", result);
        result
    }
}

fn apply_cached(result: &mut CaseResult, cached: &CachedFailure) {
    result.outcome = cached.outcome;
    result.failure = Some(cached.detail.clone());
}

fn fail(result: &mut CaseResult, origin: FailureOrigin, message: String, fault: &TestFault) {
    result.outcome = Outcome::Failed;
    result.failure = Some(FailureDetail::from_fault(origin, message, fault));
}

fn bind_context(instance: &mut dyn TestInstance, ctx: &CaseContext) -> Result<(), TestFault> {
    match instance.context_slot() {
        ContextSlot::Writable(setter) => {
            let ctx = ctx.clone();
            catch_unwind(AssertUnwindSafe(move || setter(ctx)))
                .unwrap_or_else(|panic| Err(TestFault::from_panic(panic)))
        }
        ContextSlot::ReadOnly | ContextSlot::Absent => Ok(()),
    }
}

/// Instance initialize chain, root first; false when one failed
async fn run_test_initialize(
    chains: &ClassChains,
    instance: &mut dyn TestInstance,
    ctx: &CaseContext,
    result: &mut CaseResult,
) -> bool {
    for hook in &chains.test_initialize {
        if let Err(fault) = hook.method.invoke(&mut *instance, ctx, &[]).await {
            fail(
                result,
                FailureOrigin::TestInitialize,
                format!("Initialization method {} threw exception. {fault}.", hook.name),
                &fault,
            );
            return false;
        }
    }
    true
}

/// Instance cleanup chain, derived first, then disposal; each step independent
async fn run_test_cleanup(
    chains: &ClassChains,
    instance: &mut dyn TestInstance,
    ctx: &CaseContext,
) -> Vec<String> {
    let mut warnings = Vec::new();
    for hook in &chains.test_cleanup {
        if let Err(fault) = hook.method.invoke(&mut *instance, ctx, &[]).await {
            warn!("Cleanup method {} failed: {}", hook.name, fault);
            warnings.push(format!(
                "TestCleanup method {} threw exception. {fault}.",
                hook.name
            ));
        }
    }

    if let Some(disposable) = instance.as_disposable() {
        let disposed = catch_unwind(AssertUnwindSafe(|| disposable.dispose()))
            .unwrap_or_else(|panic| Err(TestFault::from_panic(panic)));
        if let Err(fault) = disposed {
            warnings.push(format!("Dispose threw exception. {fault}."));
        }
    }
    warnings
}
