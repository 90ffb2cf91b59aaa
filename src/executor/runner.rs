//! Run orchestration
//!
//! An [`Engine`] owns what lives across runs (the resolver, the output
//! multiplexer, the module-wide run parameters) and builds everything
//! run-scoped from an explicit [`RunConfig`]: a fresh lifecycle registry,
//! the invocation pipeline and the scheduler.

use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::parallel::Scheduler;
use crate::config::RunConfig;
use crate::lifecycle::{BindingResolver, LifecycleRegistry};
use crate::models::{RunReport, TestUnitDescriptor};
use crate::output::{OutputMultiplexer, ResultSink};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Test execution engine
pub struct Engine {
    resolver: Arc<dyn BindingResolver>,
    output: Arc<OutputMultiplexer>,
    parameters: Mutex<BTreeMap<String, Value>>,
    cancellation: Mutex<CancellationToken>,
}

impl Engine {
    pub fn new(resolver: Arc<dyn BindingResolver>) -> Self {
        Self {
            resolver,
            output: Arc::new(OutputMultiplexer::new()),
            parameters: Mutex::new(BTreeMap::new()),
            cancellation: Mutex::new(CancellationToken::new()),
        }
    }

    /// Start a new run: the parameter table is replaced, never merged
    pub fn begin_run(&self, config: &RunConfig) {
        *lock(&self.parameters) = config.parameters.clone();

        let mut token = lock(&self.cancellation);
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }

    /// Module-wide parameters of the current run
    pub fn parameters(&self) -> BTreeMap<String, Value> {
        lock(&self.parameters).clone()
    }

    /// Token observed by the current run; cancelling it stops dispatch
    pub fn cancellation_token(&self) -> CancellationToken {
        lock(&self.cancellation).clone()
    }

    pub fn cancel(&self) {
        info!("Run cancellation requested");
        lock(&self.cancellation).cancel();
    }

    pub fn output(&self) -> &OutputMultiplexer {
        &self.output
    }

    /// Run every descriptor and deliver the results to `sink`
    pub async fn run(
        &self,
        config: RunConfig,
        descriptors: Vec<TestUnitDescriptor>,
        sink: &mut dyn ResultSink,
    ) -> RunReport {
        let started_at = Utc::now();
        self.begin_run(&config);

        let mut config = config;
        config.parameters = self.parameters();
        let config = Arc::new(config);
        let cancellation = self.cancellation_token();

        info!(
            "Starting run of {} descriptors ({} workers, scope {}, parallel {})",
            descriptors.len(),
            config.worker_count(),
            config.parallel.scope,
            config.parallel.enabled
        );

        let registry = Arc::new(LifecycleRegistry::new(self.resolver.clone()));
        let invoker = Arc::new(crate::pipeline::CaseInvoker::new(
            registry.clone(),
            self.output.clone(),
            config.clone(),
            cancellation.clone(),
        ));

        let mut scheduler = Scheduler::new(invoker, cancellation);
        let outcome = scheduler.run(descriptors).await;
        let warnings = registry.teardown(&self.output).await;

        for result in &outcome.results {
            sink.on_result(result);
        }

        let mut report = RunReport::new(&outcome.results, started_at);
        report.cancelled = outcome.cancelled;
        report.not_dispatched = outcome.not_dispatched;
        report.warnings = warnings;
        sink.on_run_complete(&report);

        info!(
            "Run completed in {}ms - Pass: {}/{} ({:.1}%)",
            report.total_duration_ms,
            report.passed,
            report.total,
            report.pass_rate()
        );

        report
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("parameters", &lock(&self.parameters).len())
            .field("cancelled", &lock(&self.cancellation).is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassCleanupBehavior;
    use crate::lifecycle::{BindingCatalog, ClassBinding, ModuleBinding, ScopeHook, TestInstance};
    use crate::models::{Outcome, TestFault};
    use crate::output::CollectingSink;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::OnceLock;
    use std::time::{Duration, Instant};

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

    fn level(log: &Log, name: &str, base: Option<&str>) -> ClassBinding {
        let body_log = log.clone();
        let mut builder = ClassBinding::builder::<Fixture>(name)
            .default_constructor()
            .class_initialize(hook(log, &format!("{name}.init")))
            .class_cleanup(hook(log, &format!("{name}.cleanup")))
            .test("Works", move |_, ctx| {
                body_log
                    .lock()
                    .unwrap()
                    .push(format!("{}.body", ctx.class_name()));
                Ok(())
            });
        if let Some(base) = base {
            builder = builder.inherits(base);
        }
        builder.build()
    }

    #[tokio::test]
    async fn test_inherited_lifecycle_order_end_to_end() {
        let log = Log::default();
        let catalog = BindingCatalog::new()
            .class("core", level(&log, "A", None))
            .class("core", level(&log, "B", Some("A")))
            .class("core", level(&log, "C", Some("B")))
            .module(
                ModuleBinding::new("core")
                    .with_initialize(hook(&log, "core.init"))
                    .with_cleanup(hook(&log, "core.cleanup")),
            );
        let engine = Engine::new(Arc::new(catalog));
        let mut sink = CollectingSink::new();

        let report = engine
            .run(
                RunConfig::serial(),
                vec![TestUnitDescriptor::new("core", "C", "Works")],
                &mut sink,
            )
            .await;

        assert_eq!(report.passed, 1);
        assert!(report.warnings.is_empty());
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "core.init",
                "A.init",
                "B.init",
                "C.init",
                "C.body",
                "C.cleanup",
                "B.cleanup",
                "A.cleanup",
                "core.cleanup",
            ]
        );
        assert_eq!(sink.records.len(), 1);
        assert!(sink.report.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_class_initialize_once_under_parallel_scheduling() {
        let inits = Arc::new(AtomicUsize::new(0));
        let counter = inits.clone();
        let class = ClassBinding::builder::<Fixture>("Shared")
            .default_constructor()
            .class_initialize(ScopeHook::asynchronous("Shared.init", move |_| {
                let counter = counter.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), TestFault>(())
                }
            }))
            .test("Works", |_, _| Ok(()))
            .build();
        let engine = Engine::new(Arc::new(BindingCatalog::new().class("core", class)));

        let descriptors = (0..8)
            .map(|i| TestUnitDescriptor::new("core", "Shared", "Works").with_display_name(format!("Works{i}")))
            .collect();
        let report = engine
            .run(RunConfig::default().with_workers(4), descriptors, &mut CollectingSink::new())
            .await;

        assert_eq!(report.passed, 8);
        assert_eq!(inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hung_body_does_not_block_the_run() {
        let class = ClassBinding::builder::<Fixture>("Slow")
            .default_constructor()
            .async_test("Hangs", |_, _| {
                Box::pin(async move {
                    futures::future::pending::<()>().await;
                    Ok::<(), TestFault>(())
                })
            })
            .test("Quick", |_, _| Ok(()))
            .build();
        let engine = Engine::new(Arc::new(BindingCatalog::new().class("core", class)));
        let config = RunConfig {
            abort_grace_ms: 10,
            ..RunConfig::serial()
        }
        .with_default_timeout(Duration::from_millis(20));

        let start = Instant::now();
        let mut sink = CollectingSink::new();
        let report = engine
            .run(
                config,
                vec![
                    TestUnitDescriptor::new("core", "Slow", "Hangs").asynchronous(),
                    TestUnitDescriptor::new("core", "Slow", "Quick"),
                ],
                &mut sink,
            )
            .await;

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.passed, 1);
        assert_eq!(sink.record("Hangs").unwrap().outcome, Outcome::TimedOut);
    }

    #[test]
    fn test_hung_sync_body_does_not_hold_the_runtime() {
        let release = Arc::new(AtomicBool::new(false));
        let spinning = release.clone();
        let cleanups = Arc::new(AtomicUsize::new(0));
        let cleaned = cleanups.clone();
        let class = ClassBinding::builder::<Fixture>("Stuck")
            .default_constructor()
            .test_cleanup("Stuck.Teardown", move |_, _| {
                cleaned.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .test("Spins", move |_, _| {
                while !spinning.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            })
            .test("Quick", |_, _| Ok(()))
            .build();
        let engine = Engine::new(Arc::new(BindingCatalog::new().class("core", class)));
        let config = RunConfig {
            abort_grace_ms: 10,
            ..RunConfig::serial()
        }
        .with_default_timeout(Duration::from_millis(20));

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let start = Instant::now();
        let mut sink = CollectingSink::new();
        let report = runtime.block_on(engine.run(
            config,
            vec![
                TestUnitDescriptor::new("core", "Stuck", "Spins"),
                TestUnitDescriptor::new("core", "Stuck", "Quick"),
            ],
            &mut sink,
        ));

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.passed, 1);
        let spins = sink.record("Spins").unwrap();
        assert_eq!(spins.outcome, Outcome::TimedOut);
        assert!(spins.warnings.iter().any(|w| w.contains("abandoned")));
        // Only the quick case got its instance back
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);

        let (dropped_tx, dropped_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            drop(runtime);
            let _ = dropped_tx.send(());
        });
        assert!(dropped_rx.recv_timeout(Duration::from_secs(2)).is_ok());
        release.store(true, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn test_cancellation_stops_dispatch_and_is_reported() {
        let slot: Arc<OnceLock<CancellationToken>> = Arc::default();
        let stop = slot.clone();
        let class = ClassBinding::builder::<Fixture>("Stopper")
            .default_constructor()
            .test("Stop", move |_, _| {
                if let Some(token) = stop.get() {
                    token.cancel();
                }
                Ok(())
            })
            .build();
        let engine = Engine::new(Arc::new(BindingCatalog::new().class("core", class)));
        slot.set(engine.cancellation_token()).unwrap();

        let descriptors = (0..3)
            .map(|_| TestUnitDescriptor::new("core", "Stopper", "Stop"))
            .collect();
        let mut sink = CollectingSink::new();
        let report = engine.run(RunConfig::serial(), descriptors, &mut sink).await;

        assert!(report.cancelled);
        assert_eq!(report.total, 1);
        assert_eq!(report.not_dispatched, 2);
        assert_eq!(sink.records.len(), 1);

        // The next run starts with a fresh token
        engine.begin_run(&RunConfig::serial());
        assert!(!engine.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_run_parameters_replace_previous_run() {
        let class = ClassBinding::builder::<Fixture>("Params")
            .default_constructor()
            .test("Reads", |_, ctx| {
                if ctx.property("stale").is_some() {
                    return Err(TestFault::assertion("stale parameter leaked into run"));
                }
                match ctx.property("env") {
                    Some(value) if value == json!("prod") => Ok(()),
                    other => Err(TestFault::assertion(format!("unexpected env {other:?}"))),
                }
            })
            .build();
        let engine = Engine::new(Arc::new(BindingCatalog::new().class("core", class)));

        engine.begin_run(
            &RunConfig::serial()
                .with_parameter("stale", 1)
                .with_parameter("env", "dev"),
        );
        assert_eq!(engine.parameters().len(), 2);

        let config = RunConfig::serial().with_parameter("env", "prod");
        let report = engine
            .run(
                config,
                vec![TestUnitDescriptor::new("core", "Params", "Reads")],
                &mut CollectingSink::new(),
            )
            .await;

        assert_eq!(report.passed, 1);
        assert_eq!(engine.parameters().keys().collect::<Vec<_>>(), vec!["env"]);
    }

    #[tokio::test]
    async fn test_teardown_warnings_reach_the_report() {
        let class = ClassBinding::builder::<Fixture>("Leaky")
            .default_constructor()
            .class_initialize(ScopeHook::sync("Leaky.init", |_| Ok(())))
            .class_cleanup(ScopeHook::sync("Leaky.cleanup", |_| {
                Err(TestFault::error("IoError", "socket still open"))
            }))
            .test("Works", |_, _| Ok(()))
            .build();
        let engine = Engine::new(Arc::new(BindingCatalog::new().class("core", class)));

        let report = engine
            .run(
                RunConfig::serial(),
                vec![TestUnitDescriptor::new("core", "Leaky", "Works")],
                &mut CollectingSink::new(),
            )
            .await;
        assert_eq!(report.passed, 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("Leaky.cleanup"));

        let config = RunConfig {
            class_cleanup: ClassCleanupBehavior::EndOfClass,
            ..RunConfig::serial()
        };
        let mut sink = CollectingSink::new();
        let report = engine
            .run(
                config,
                vec![TestUnitDescriptor::new("core", "Leaky", "Works")],
                &mut sink,
            )
            .await;
        assert!(report.warnings.is_empty());
        assert_eq!(sink.records[0].warnings.len(), 1);
    }
}
