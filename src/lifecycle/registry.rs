//! Lifecycle registry
//!
//! Maps each module and each (module, class) pair to exactly one lifecycle
//! state for the lifetime of a run. Lookups take a read lock; a miss takes
//! the write lock and checks again before inserting, so concurrent first
//! references to the same class observe a single resolution.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use super::binding::{BindingResolver, ClassBinding};
use super::state::{ClassChains, ClassLifecycleState, ModuleLifecycleState};
use crate::error::BindingError;
use crate::models::{CaseContext, TestUnitDescriptor};
use crate::output::OutputMultiplexer;

type ClassKey = (String, String);

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registry of module and class lifecycle states
pub struct LifecycleRegistry {
    resolver: Arc<dyn BindingResolver>,
    modules: RwLock<HashMap<String, Arc<ModuleLifecycleState>>>,
    classes: RwLock<HashMap<ClassKey, Arc<ClassLifecycleState>>>,
    /// Stamps the order in which lifecycle scopes finish initializing
    init_counter: AtomicU64,
}

impl LifecycleRegistry {
    pub fn new(resolver: Arc<dyn BindingResolver>) -> Self {
        Self {
            resolver,
            modules: RwLock::new(HashMap::new()),
            classes: RwLock::new(HashMap::new()),
            init_counter: AtomicU64::new(0),
        }
    }

    /// States for the descriptor's module and class; idempotent per pair
    pub fn bind_lifecycle(
        &self,
        descriptor: &TestUnitDescriptor,
    ) -> (Arc<ModuleLifecycleState>, Arc<ClassLifecycleState>) {
        (
            self.module_state(&descriptor.module),
            self.class_state(&descriptor.module, &descriptor.class_name),
        )
    }

    pub fn module_state(&self, module: &str) -> Arc<ModuleLifecycleState> {
        if let Some(state) = read(&self.modules).get(module) {
            return state.clone();
        }

        let mut modules = write(&self.modules);
        modules
            .entry(module.to_string())
            .or_insert_with(|| {
                debug!("Binding module {}", module);
                Arc::new(ModuleLifecycleState::new(
                    module,
                    self.resolver.resolve_module(module),
                ))
            })
            .clone()
    }

    pub fn class_state(&self, module: &str, class: &str) -> Arc<ClassLifecycleState> {
        let key = (module.to_string(), class.to_string());
        if let Some(state) = read(&self.classes).get(&key) {
            return state.clone();
        }

        let mut classes = write(&self.classes);
        classes
            .entry(key)
            .or_insert_with(|| {
                let chains = self
                    .resolve_ancestry(module, class)
                    .and_then(|ancestry| ClassChains::from_ancestry(&ancestry));
                match &chains {
                    Ok(chains) => debug!(
                        "Bound class {}::{} ({} level(s), {} method(s))",
                        module,
                        class,
                        chains.levels.len(),
                        chains.methods.len()
                    ),
                    Err(err) => debug!("Class {}::{} failed inspection: {}", module, class, err),
                }
                Arc::new(ClassLifecycleState::new(module, class, chains))
            })
            .clone()
    }

    pub(crate) fn init_counter(&self) -> &AtomicU64 {
        &self.init_counter
    }

    /// Walk the ancestry once, returning it root first
    fn resolve_ancestry(&self, module: &str, class: &str) -> Result<Vec<Arc<ClassBinding>>, BindingError> {
        let mut ancestry = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.resolver.resolve_class(module, class)?;

        loop {
            if !seen.insert(current.name.clone()) {
                return Err(BindingError::InheritanceCycle(current.name.clone()));
            }
            let base = current.base.clone();
            let derived = current.name.clone();
            ancestry.push(current);

            let Some(base) = base else {
                break;
            };
            current = self
                .resolver
                .resolve_class(module, &base)
                .map_err(|err| match err {
                    BindingError::UnknownClass { .. } => BindingError::UnknownBase {
                        class: derived,
                        base: base.clone(),
                    },
                    other => other,
                })?;
        }

        ancestry.reverse();
        Ok(ancestry)
    }

    /// Run every outstanding cleanup and forget all state
    ///
    /// Classes are cleaned up in reverse order of initialization, then
    /// modules likewise. Returns the collected cleanup warnings.
    pub async fn teardown(&self, output: &OutputMultiplexer) -> Vec<String> {
        let mut classes: Vec<_> = write(&self.classes).drain().map(|(_, state)| state).collect();
        let mut modules: Vec<_> = write(&self.modules).drain().map(|(_, state)| state).collect();
        classes.sort_by_key(|state| std::cmp::Reverse(state.sequence()));
        modules.sort_by_key(|state| std::cmp::Reverse(state.sequence()));

        let mut warnings = Vec::new();
        for state in classes.iter().filter(|state| state.sequence() > 0) {
            let ctx = CaseContext::detached(state.module(), state.class_name(), output);
            warnings.extend(state.run_cleanup(&ctx).await);
            close_detached(&ctx, output);
        }
        for state in modules.iter().filter(|state| state.sequence() > 0) {
            let ctx = CaseContext::detached(state.name(), "", output);
            warnings.extend(state.run_cleanup(&ctx).await);
            close_detached(&ctx, output);
        }

        info!(
            "Lifecycle teardown completed - {} class(es), {} module(s), {} warning(s)",
            classes.len(),
            modules.len(),
            warnings.len()
        );
        warnings
    }

    pub fn bound_classes(&self) -> usize {
        read(&self.classes).len()
    }
}

fn close_detached(ctx: &CaseContext, output: &OutputMultiplexer) {
    output.close_scope(ctx.stdout_scope());
    output.close_scope(ctx.trace_scope());
}

impl std::fmt::Debug for LifecycleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleRegistry")
            .field("modules", &read(&self.modules).len())
            .field("classes", &read(&self.classes).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::binding::{ModuleBinding, ScopeHook, TestInstance};
    use crate::lifecycle::catalog::BindingCatalog;
    use crate::lifecycle::state::LifecycleStatus;
    use crate::models::Outcome;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Fixture;

    impl TestInstance for Fixture {}

    type Log = Arc<Mutex<Vec<String>>>;

    fn hook(log: &Log, entry: &str) -> ScopeHook {
        let log = log.clone();
        let entry = entry.to_string();
        ScopeHook::sync(entry.clone(), move |_| {
            log.lock().unwrap().push(entry.clone());
            Ok(())
        })
    }

    fn class(log: &Log, name: &str, base: Option<&str>) -> ClassBinding {
        let mut builder = ClassBinding::builder::<Fixture>(name)
            .default_constructor()
            .class_initialize(hook(log, &format!("{name}.init")))
            .class_cleanup(hook(log, &format!("{name}.cleanup")))
            .test("Works", |_, _| Ok(()));
        if let Some(base) = base {
            builder = builder.inherits(base);
        }
        builder.build()
    }

    fn registry(catalog: BindingCatalog) -> LifecycleRegistry {
        LifecycleRegistry::new(Arc::new(catalog))
    }

    #[test]
    fn test_rebinding_returns_same_state() {
        let log = Log::default();
        let registry = registry(BindingCatalog::new().class("core", class(&log, "Calc", None)));
        let descriptor = TestUnitDescriptor::new("core", "Calc", "Works");

        let (m1, c1) = registry.bind_lifecycle(&descriptor);
        let (m2, c2) = registry.bind_lifecycle(&descriptor);
        assert!(Arc::ptr_eq(&m1, &m2));
        assert!(Arc::ptr_eq(&c1, &c2));
        assert_eq!(registry.bound_classes(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_binding_resolves_once() {
        struct CountingResolver {
            inner: BindingCatalog,
            lookups: AtomicUsize,
        }

        impl BindingResolver for CountingResolver {
            fn resolve_module(&self, module: &str) -> Result<Arc<ModuleBinding>, BindingError> {
                self.inner.resolve_module(module)
            }

            fn resolve_class(&self, module: &str, class: &str) -> Result<Arc<ClassBinding>, BindingError> {
                self.lookups.fetch_add(1, Ordering::SeqCst);
                self.inner.resolve_class(module, class)
            }
        }

        let log = Log::default();
        let resolver = Arc::new(CountingResolver {
            inner: BindingCatalog::new().class("core", class(&log, "Calc", None)),
            lookups: AtomicUsize::new(0),
        });
        let registry = Arc::new(LifecycleRegistry::new(resolver.clone()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.class_state("core", "Calc") })
            })
            .collect();
        let states: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert!(states.iter().all(|s| Arc::ptr_eq(s, &states[0])));
        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ancestry_resolution_failures() {
        let log = Log::default();
        let registry = registry(
            BindingCatalog::new()
                .class("core", class(&log, "Orphan", Some("Missing")))
                .class("core", class(&log, "Ping", Some("Pong")))
                .class("core", class(&log, "Pong", Some("Ping"))),
        );

        let orphan = registry.class_state("core", "Orphan");
        let err = orphan.chains().unwrap_err();
        assert_eq!(err.outcome, Outcome::NotRunnable);
        assert!(err.detail.message.contains("Base class 'Missing'"));

        let cycle = registry.class_state("core", "Ping");
        assert!(cycle.chains().unwrap_err().detail.message.contains("cycle"));

        let unknown = registry.class_state("core", "Ghost");
        assert_eq!(unknown.chains().unwrap_err().outcome, Outcome::NotFound);
    }

    #[tokio::test]
    async fn test_teardown_runs_reverse_initialization_order() {
        let log = Log::default();
        let catalog = BindingCatalog::new()
            .module(
                ModuleBinding::new("core")
                    .with_initialize(hook(&log, "core.init"))
                    .with_cleanup(hook(&log, "core.cleanup")),
            )
            .class("core", class(&log, "A", None))
            .class("core", class(&log, "B", Some("A")))
            .class("core", class(&log, "Other", None));
        let registry = registry(catalog);
        let mux = OutputMultiplexer::new();
        let ctx = CaseContext::detached("core", "B", &mux);

        let module = registry.module_state("core");
        module.ensure_initialized(&ctx, registry.init_counter()).await.unwrap();
        let b = registry.class_state("core", "B");
        b.ensure_initialized(&ctx, registry.init_counter()).await.unwrap();
        let other = registry.class_state("core", "Other");
        other.ensure_initialized(&ctx, registry.init_counter()).await.unwrap();
        // Bound but never initialized
        registry.class_state("core", "A");

        assert_eq!(b.status(), LifecycleStatus::Done);
        let warnings = registry.teardown(&mux).await;
        assert!(warnings.is_empty());
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "core.init",
                "A.init",
                "B.init",
                "Other.init",
                "Other.cleanup",
                "B.cleanup",
                "A.cleanup",
                "core.cleanup",
            ]
        );
        assert_eq!(registry.bound_classes(), 0);
    }

    #[tokio::test]
    async fn test_teardown_collects_cleanup_warnings() {
        let catalog = BindingCatalog::new().class(
            "core",
            ClassBinding::builder::<Fixture>("Leaky")
                .default_constructor()
                .class_initialize(ScopeHook::sync("Leaky.init", |_| Ok(())))
                .class_cleanup(ScopeHook::sync("Leaky.cleanup", |_| panic!("socket still open")))
                .build(),
        );
        let registry = registry(catalog);
        let mux = OutputMultiplexer::new();
        let ctx = CaseContext::detached("core", "Leaky", &mux);

        registry
            .class_state("core", "Leaky")
            .ensure_initialized(&ctx, registry.init_counter())
            .await
            .unwrap();
        let warnings = registry.teardown(&mux).await;
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Leaky.cleanup"));
        assert!(warnings[0].contains("socket still open"));
    }
}
