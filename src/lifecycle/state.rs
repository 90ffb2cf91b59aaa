//! Lifecycle state
//!
//! Per-module and per-class execution state. Inherited chains are flattened
//! once, when the state is created, into plain ordered lists; nothing here
//! walks a hierarchy at call time.
//!
//! Both scopes share [`OnceGate`]: the first caller runs the initialize
//! chain while holding the gate, concurrent callers wait on it, and every
//! later caller gets the cached result without re-running anything.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::binding::{ClassBinding, Constructor, InstanceHook, ModuleBinding, ScopeHook, TestMethod};
use crate::error::BindingError;
use crate::models::{
    CaseContext, FailureDetail, FailureOrigin, FaultKind, Outcome, TestFault,
};

/// Tri-state lifecycle flag
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleStatus {
    NotRun,
    Running,
    Done,
}

impl LifecycleStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LifecycleStatus::NotRun,
            1 => LifecycleStatus::Running,
            _ => LifecycleStatus::Done,
        }
    }
}

/// A failure recorded once and reapplied to every dependent case
#[derive(Clone, Debug, PartialEq)]
pub struct CachedFailure {
    pub outcome: Outcome,
    pub detail: FailureDetail,
}

impl CachedFailure {
    fn initialize(origin: FailureOrigin, scope: &str, hook: &str, fault: &TestFault) -> Self {
        let outcome = if fault.kind == FaultKind::Inconclusive {
            Outcome::Inconclusive
        } else {
            Outcome::Failed
        };
        let message = format!("{scope} Initialization method {hook} threw exception. {fault}.");
        Self {
            outcome,
            detail: FailureDetail::from_fault(origin, message, fault),
        }
    }

    pub fn inspection(err: &BindingError) -> Self {
        let outcome = err.outcome();
        let origin = if outcome == Outcome::NotFound {
            FailureOrigin::DescriptorNotFound
        } else {
            FailureOrigin::DescriptorNotRunnable
        };
        Self {
            outcome,
            detail: FailureDetail::new(origin, err.to_string()),
        }
    }
}

/// Result of running an initialize chain
#[derive(Debug)]
pub(crate) struct ChainOutcome {
    /// Levels whose initialize completed (or had none)
    pub completed: usize,
    pub failure: Option<CachedFailure>,
}

#[derive(Debug, Default)]
struct GateState {
    failure: Option<CachedFailure>,
    completed: usize,
    cleaned_up: bool,
}

/// Exactly-once guard around an initialize chain and its cleanup
#[derive(Debug, Default)]
pub(crate) struct OnceGate {
    status: AtomicU8,
    /// Order in which this gate finished initializing; 0 = never
    sequence: AtomicU64,
    state: Mutex<GateState>,
}

impl OnceGate {
    pub fn status(&self) -> LifecycleStatus {
        LifecycleStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    pub async fn enter<F, Fut>(&self, counter: &AtomicU64, run: F) -> Result<(), CachedFailure>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ChainOutcome>,
    {
        let mut state = self.state.lock().await;
        if self.status() == LifecycleStatus::Done {
            return state.failure.clone().map_or(Ok(()), Err);
        }

        self.status.store(1, Ordering::Release);
        let outcome = run().await;
        state.completed = outcome.completed;
        state.failure = outcome.failure;
        self.sequence
            .store(counter.fetch_add(1, Ordering::AcqRel) + 1, Ordering::Release);
        self.status.store(2, Ordering::Release);

        state.failure.clone().map_or(Ok(()), Err)
    }

    /// Run `cleanup` at most once, and only after initialization ran
    pub async fn leave<F, Fut>(&self, cleanup: F) -> Vec<String>
    where
        F: FnOnce(usize) -> Fut,
        Fut: Future<Output = Vec<String>>,
    {
        let mut state = self.state.lock().await;
        if self.status() != LifecycleStatus::Done || state.cleaned_up {
            return Vec::new();
        }
        state.cleaned_up = true;
        cleanup(state.completed).await
    }
}

fn cleanup_warning(scope: &str, hook: &ScopeHook, fault: &TestFault) -> String {
    format!(
        "{scope} Cleanup method {} failed. Error Message: {fault}.",
        hook.name
    )
}

/// Module-wide lifecycle state, one per loaded module per run
#[derive(Debug)]
pub struct ModuleLifecycleState {
    name: String,
    binding: Result<Arc<ModuleBinding>, CachedFailure>,
    gate: OnceGate,
}

impl ModuleLifecycleState {
    pub(crate) fn new(name: &str, binding: Result<Arc<ModuleBinding>, BindingError>) -> Self {
        Self {
            name: name.to_string(),
            binding: binding.map_err(|err| CachedFailure::inspection(&err)),
            gate: OnceGate::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> LifecycleStatus {
        self.gate.status()
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.gate.sequence()
    }

    pub(crate) async fn ensure_initialized(
        &self,
        ctx: &CaseContext,
        counter: &AtomicU64,
    ) -> Result<(), CachedFailure> {
        let binding = self.binding.as_ref().map_err(Clone::clone)?;
        self.gate
            .enter(counter, || async move {
                let Some(hook) = &binding.initialize else {
                    return ChainOutcome {
                        completed: 1,
                        failure: None,
                    };
                };
                debug!("Running module initialize {}", hook.name);
                match hook.invoke(ctx).await {
                    Ok(()) => ChainOutcome {
                        completed: 1,
                        failure: None,
                    },
                    Err(fault) => {
                        warn!("Module initialize {} failed: {}", hook.name, fault);
                        let mut failure = CachedFailure::initialize(
                            FailureOrigin::ModuleInitialize,
                            "Module",
                            &hook.name,
                            &fault,
                        );
                        failure.detail.message.push_str(" Aborting test execution.");
                        ChainOutcome {
                            completed: 0,
                            failure: Some(failure),
                        }
                    }
                }
            })
            .await
    }

    pub(crate) async fn run_cleanup(&self, ctx: &CaseContext) -> Vec<String> {
        let Ok(binding) = &self.binding else {
            return Vec::new();
        };
        self.gate
            .leave(|completed| async move {
                let mut warnings = Vec::new();
                if completed == 0 {
                    return warnings;
                }
                if let Some(hook) = &binding.cleanup {
                    debug!("Running module cleanup {}", hook.name);
                    if let Err(fault) = hook.invoke(ctx).await {
                        warnings.push(cleanup_warning("Module", hook, &fault));
                    }
                }
                warnings
            })
            .await
    }
}

/// One level of a class's ancestry
#[derive(Clone, Debug)]
pub struct ClassLevel {
    pub class_name: String,
    pub initialize: Option<ScopeHook>,
    pub cleanup: Option<ScopeHook>,
}

/// Flattened lifecycle chains of a concrete class
#[derive(Clone)]
pub struct ClassChains {
    /// Root first
    pub levels: Vec<ClassLevel>,
    /// Root first
    pub test_initialize: Vec<InstanceHook>,
    /// Derived first
    pub test_cleanup: Vec<InstanceHook>,
    pub constructor: Constructor,
    pub methods: HashMap<String, TestMethod>,
}

impl std::fmt::Debug for ClassChains {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("ClassChains")
            .field("levels", &self.levels)
            .field("test_initialize", &self.test_initialize)
            .field("test_cleanup", &self.test_cleanup)
            .field("methods", &methods)
            .finish()
    }
}

impl ClassChains {
    /// Flatten an ancestry given root first, concrete class last
    pub(crate) fn from_ancestry(ancestry: &[Arc<ClassBinding>]) -> Result<Self, BindingError> {
        let concrete = ancestry
            .last()
            .ok_or_else(|| BindingError::InheritanceCycle(String::new()))?;
        let constructor = concrete
            .constructor
            .clone()
            .ok_or_else(|| BindingError::MissingConstructor(concrete.name.clone()))?;

        let mut levels = Vec::with_capacity(ancestry.len());
        let mut test_initialize = Vec::new();
        let mut methods = HashMap::new();
        for binding in ancestry {
            levels.push(ClassLevel {
                class_name: binding.name.clone(),
                initialize: binding.class_initialize.clone(),
                cleanup: binding.class_cleanup.clone(),
            });
            test_initialize.extend(binding.test_initialize.clone());
            // Derived declarations shadow inherited ones
            for (name, method) in &binding.methods {
                methods.insert(name.clone(), method.clone());
            }
        }
        let test_cleanup = ancestry
            .iter()
            .rev()
            .filter_map(|binding| binding.test_cleanup.clone())
            .collect();

        Ok(Self {
            levels,
            test_initialize,
            test_cleanup,
            constructor,
            methods,
        })
    }

    /// Class initialize hooks, root first
    pub fn initialize_chain(&self) -> impl Iterator<Item = &ScopeHook> {
        self.levels.iter().filter_map(|level| level.initialize.as_ref())
    }

    /// Class cleanup hooks, derived first
    pub fn cleanup_chain(&self) -> impl Iterator<Item = &ScopeHook> {
        self.levels
            .iter()
            .rev()
            .filter_map(|level| level.cleanup.as_ref())
    }

    pub fn method(&self, name: &str) -> Option<&TestMethod> {
        self.methods.get(name)
    }
}

/// Per-class lifecycle state, created on first reference to the class
pub struct ClassLifecycleState {
    module: String,
    class_name: String,
    chains: Result<ClassChains, CachedFailure>,
    gate: OnceGate,
    /// Scheduled descriptors not yet finished
    pending: AtomicUsize,
}

impl ClassLifecycleState {
    pub(crate) fn new(module: &str, class_name: &str, chains: Result<ClassChains, BindingError>) -> Self {
        Self {
            module: module.to_string(),
            class_name: class_name.to_string(),
            chains: chains.map_err(|err| CachedFailure::inspection(&err)),
            gate: OnceGate::default(),
            pending: AtomicUsize::new(0),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn status(&self) -> LifecycleStatus {
        self.gate.status()
    }

    /// Resolved chains, or the cached inspection failure
    pub fn chains(&self) -> Result<&ClassChains, &CachedFailure> {
        self.chains.as_ref()
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.gate.sequence()
    }

    pub(crate) fn add_pending(&self, count: usize) {
        self.pending.fetch_add(count, Ordering::AcqRel);
    }

    /// Returns true when this was the last scheduled descriptor
    pub(crate) fn finish_one(&self) -> bool {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|previous| previous == 1)
            .unwrap_or(false)
    }

    pub(crate) async fn ensure_initialized(
        &self,
        ctx: &CaseContext,
        counter: &AtomicU64,
    ) -> Result<(), CachedFailure> {
        let chains = self.chains.as_ref().map_err(Clone::clone)?;
        let class_name = self.class_name.as_str();
        self.gate
            .enter(counter, || async move {
                for (completed, level) in chains.levels.iter().enumerate() {
                    let Some(hook) = &level.initialize else {
                        continue;
                    };
                    debug!("Running class initialize {} for {}", hook.name, class_name);
                    if let Err(fault) = hook.invoke(ctx).await {
                        warn!("Class initialize {} failed: {}", hook.name, fault);
                        return ChainOutcome {
                            completed,
                            failure: Some(CachedFailure::initialize(
                                FailureOrigin::ClassInitialize,
                                "Class",
                                &hook.name,
                                &fault,
                            )),
                        };
                    }
                }
                ChainOutcome {
                    completed: chains.levels.len(),
                    failure: None,
                }
            })
            .await
    }

    /// Cleanup of every level whose initialize completed, derived first
    pub(crate) async fn run_cleanup(&self, ctx: &CaseContext) -> Vec<String> {
        let Ok(chains) = &self.chains else {
            return Vec::new();
        };
        self.gate
            .leave(|completed| async move {
                let mut warnings = Vec::new();
                for level in chains.levels[..completed].iter().rev() {
                    let Some(hook) = &level.cleanup else {
                        continue;
                    };
                    debug!("Running class cleanup {}", hook.name);
                    if let Err(fault) = hook.invoke(ctx).await {
                        warn!("Class cleanup {} failed: {}", hook.name, fault);
                        warnings.push(cleanup_warning("Class", hook, &fault));
                    }
                }
                warnings
            })
            .await
    }
}

impl std::fmt::Debug for ClassLifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassLifecycleState")
            .field("module", &self.module)
            .field("class_name", &self.class_name)
            .field("status", &self.status())
            .field("inspection_failed", &self.chains.is_err())
            .finish()
    }
}
