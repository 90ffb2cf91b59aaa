//! Parallel dispatch
//!
//! Runs the partitioned work on a bounded pool of workers. Workers pull the
//! next unit from a shared queue until the parallel partition is exhausted;
//! the serial partition then runs on a single worker.

use futures::future::join_all;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::partition::{partition, DispatchUnit, ScheduleState};
use crate::config::ClassCleanupBehavior;
use crate::models::{CaseResult, TestUnitDescriptor};
use crate::pipeline::{run_descriptor, CaseInvoker};
use crate::utils::Stopwatch;

type UnitQueue = Arc<Mutex<VecDeque<DispatchUnit>>>;
type UnitResults = (usize, Vec<CaseResult>);

/// Aggregated output of one scheduled run
#[derive(Debug, Default)]
pub struct ScheduleOutcome {
    /// Parallel partition results in unit order, then serial results
    pub results: Vec<CaseResult>,
    pub dispatched: usize,
    /// Units never started because the run was cancelled
    pub not_dispatched: usize,
    pub cancelled: bool,
}

/// Scheduler over one run's descriptor set
pub struct Scheduler {
    invoker: Arc<CaseInvoker>,
    workers: usize,
    cancellation: CancellationToken,
    state: ScheduleState,
}

impl Scheduler {
    pub fn new(invoker: Arc<CaseInvoker>, cancellation: CancellationToken) -> Self {
        let workers = invoker.config().worker_count().max(1);
        Self {
            invoker,
            workers,
            cancellation,
            state: ScheduleState::Unscheduled,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn state(&self) -> ScheduleState {
        self.state
    }

    /// Partition, dispatch and aggregate
    pub async fn run(&mut self, descriptors: Vec<TestUnitDescriptor>) -> ScheduleOutcome {
        let mut stopwatch = Stopwatch::new();
        self.register_pending(&descriptors);

        let partitioned = partition(descriptors, &self.invoker.config().parallel);
        self.state = ScheduleState::Partitioned;
        stopwatch.lap("partition");
        info!(
            "Scheduling {} descriptors: {} parallel units on {} workers, {} serial units",
            partitioned.descriptor_count(),
            partitioned.parallel.len(),
            self.workers,
            partitioned.serial.len()
        );

        let total_units = partitioned.unit_count();
        let (parallel, skipped_parallel) = self.dispatch(partitioned.parallel, self.workers).await;
        stopwatch.lap("parallel");
        let (serial, skipped_serial) = self.dispatch(partitioned.serial, 1).await;
        stopwatch.lap("serial");
        self.state = ScheduleState::Dispatched;

        let not_dispatched = skipped_parallel + skipped_serial;
        let mut results = aggregate(parallel);
        results.extend(aggregate(serial));
        self.state = ScheduleState::Aggregated;

        debug!("Scheduler phases: {}", stopwatch.format());
        ScheduleOutcome {
            results,
            dispatched: total_units - not_dispatched,
            not_dispatched,
            cancelled: self.cancellation.is_cancelled(),
        }
    }

    /// Count scheduled descriptors per class so end-of-class cleanup knows
    /// which descriptor is the last one
    fn register_pending(&self, descriptors: &[TestUnitDescriptor]) {
        if self.invoker.config().class_cleanup != ClassCleanupBehavior::EndOfClass {
            return;
        }
        for descriptor in descriptors.iter().filter(|d| d.ignore_reason.is_none()) {
            let (_, class) = self.invoker.registry().bind_lifecycle(descriptor);
            class.add_pending(1);
        }
    }

    async fn dispatch(&self, units: Vec<DispatchUnit>, workers: usize) -> (Vec<UnitResults>, usize) {
        if units.is_empty() {
            return (Vec::new(), 0);
        }

        let queue: UnitQueue = Arc::new(Mutex::new(VecDeque::from(units)));
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    queue.clone(),
                    self.invoker.clone(),
                    self.cancellation.clone(),
                ))
            })
            .collect();

        let mut completed = Vec::new();
        for joined in join_all(handles).await {
            match joined {
                Ok(units) => completed.extend(units),
                Err(err) => error!("Worker terminated abnormally: {}", err),
            }
        }

        let remaining = queue.lock().await.len();
        (completed, remaining)
    }
}

async fn worker_loop(
    worker: usize,
    queue: UnitQueue,
    invoker: Arc<CaseInvoker>,
    cancellation: CancellationToken,
) -> Vec<UnitResults> {
    let mut completed = Vec::new();
    loop {
        let next = {
            let mut queue = queue.lock().await;
            if cancellation.is_cancelled() {
                debug!("Worker {} stopping: run cancelled", worker);
                break;
            }
            queue.pop_front()
        };
        let Some(unit) = next else {
            break;
        };

        debug!(
            "Worker {} took unit {} ({} descriptors)",
            worker,
            unit.index,
            unit.len()
        );
        let mut results = Vec::new();
        for descriptor in &unit.descriptors {
            results.extend(run_descriptor(&invoker, descriptor).await);
        }
        completed.push((unit.index, results));
    }
    completed
}

fn aggregate(mut units: Vec<UnitResults>) -> Vec<CaseResult> {
    units.sort_by_key(|(index, _)| *index);
    units.into_iter().flat_map(|(_, results)| results).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ParallelScope, RunConfig};
    use crate::lifecycle::{BindingCatalog, ClassBinding, LifecycleRegistry, TestInstance};
    use crate::models::{Outcome, TestFault};
    use crate::output::OutputMultiplexer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// Records when each body ran and how many overlapped
    #[derive(Clone, Default)]
    struct Probe {
        spans: Arc<std::sync::Mutex<Vec<(String, Instant, Instant)>>>,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Probe {
        fn enter(&self) -> Instant {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            Instant::now()
        }

        fn exit(&self, name: &str, started: Instant) {
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.spans
                .lock()
                .unwrap()
                .push((name.to_string(), started, Instant::now()));
        }

        fn span(&self, name: &str) -> (Instant, Instant) {
            let spans = self.spans.lock().unwrap();
            let (_, start, end) = spans.iter().find(|(n, _, _)| n == name).unwrap();
            (*start, *end)
        }
    }

    struct Sleeper {
        probe: Probe,
    }

    impl TestInstance for Sleeper {}

    fn sleeper_class(name: &str, probe: &Probe) -> ClassBinding {
        let probe = probe.clone();
        ClassBinding::builder::<Sleeper>(name)
            .constructor(move || Ok(Sleeper { probe: probe.clone() }))
            .async_test("Nap", |s, ctx| {
                Box::pin(async move {
                    let started = s.probe.enter();
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    s.probe.exit(ctx.display_name(), started);
                    Ok::<(), TestFault>(())
                })
            })
            .build()
    }

    fn nap(class: &str) -> TestUnitDescriptor {
        TestUnitDescriptor::new("core", class, "Nap").asynchronous()
    }

    fn scheduler(catalog: BindingCatalog, config: RunConfig) -> Scheduler {
        let token = CancellationToken::new();
        let invoker = CaseInvoker::new(
            Arc::new(LifecycleRegistry::new(Arc::new(catalog))),
            Arc::new(OutputMultiplexer::new()),
            Arc::new(config),
            token.clone(),
        );
        Scheduler::new(Arc::new(invoker), token)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_is_bounded_and_results_keep_unit_order() {
        let probe = Probe::default();
        let mut catalog = BindingCatalog::new();
        let mut descriptors = Vec::new();
        for i in 0..6 {
            let class = format!("C{i}");
            catalog = catalog.class("core", sleeper_class(&class, &probe));
            descriptors.push(nap(&class));
        }

        let mut scheduler = scheduler(catalog, RunConfig::default().with_workers(2));
        assert_eq!(scheduler.state(), ScheduleState::Unscheduled);
        let outcome = scheduler.run(descriptors).await;

        assert_eq!(scheduler.state(), ScheduleState::Aggregated);
        assert_eq!(probe.peak.load(Ordering::SeqCst), 2);
        let order: Vec<_> = outcome.results.iter().map(|r| r.full_name.as_str()).collect();
        assert_eq!(order, vec!["C0.Nap", "C1.Nap", "C2.Nap", "C3.Nap", "C4.Nap", "C5.Nap"]);
        assert!(outcome.results.iter().all(|r| r.outcome == Outcome::Passed));
        assert_eq!(outcome.dispatched, 6);
        assert_eq!(outcome.not_dispatched, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_non_parallel_cases_start_after_parallel_partition() {
        let probe = Probe::default();
        let catalog = ["P1", "S1", "P2", "S2"]
            .iter()
            .fold(BindingCatalog::new(), |catalog, name| {
                catalog.class("core", sleeper_class(name, &probe))
            });
        let descriptors = vec![
            nap("P1").with_display_name("P1"),
            nap("S1").with_display_name("S1").non_parallel(),
            nap("P2").with_display_name("P2"),
            nap("S2").with_display_name("S2").non_parallel(),
        ];

        let mut scheduler = scheduler(catalog, RunConfig::default().with_workers(2));
        let outcome = scheduler.run(descriptors).await;

        let parallel_end = probe.span("P1").1.max(probe.span("P2").1);
        assert!(probe.span("S1").0 >= parallel_end);
        assert!(probe.span("S2").0 >= parallel_end);
        let order: Vec<_> = outcome.results.iter().map(|r| r.display_name.as_str()).collect();
        assert_eq!(order, vec!["P1", "P2", "S1", "S2"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_class_scope_runs_a_class_in_sequence() {
        let probe = Probe::default();
        let catalog = BindingCatalog::new()
            .class("core", sleeper_class("A", &probe))
            .class("core", sleeper_class("B", &probe));
        let descriptors = vec![
            nap("A").with_display_name("A1"),
            nap("B").with_display_name("B1"),
            nap("A").with_display_name("A2"),
            nap("B").with_display_name("B2"),
        ];

        let config = RunConfig::default()
            .with_workers(2)
            .with_scope(ParallelScope::Class);
        let mut scheduler = scheduler(catalog, config);
        let outcome = scheduler.run(descriptors).await;

        let (_, a1_end) = probe.span("A1");
        let (a2_start, _) = probe.span("A2");
        assert!(a2_start >= a1_end);
        let (_, b1_end) = probe.span("B1");
        let (b2_start, _) = probe.span("B2");
        assert!(b2_start >= b1_end);

        let order: Vec<_> = outcome.results.iter().map(|r| r.display_name.as_str()).collect();
        assert_eq!(order, vec!["A1", "A2", "B1", "B2"]);
    }

    #[tokio::test]
    async fn test_cancellation_stops_dispatch() {
        let token = CancellationToken::new();
        let stop = token.clone();
        let class = ClassBinding::builder::<Sleeper>("Stopper")
            .constructor(|| Ok(Sleeper { probe: Probe::default() }))
            .test("Stop", move |_, _| {
                stop.cancel();
                Ok(())
            })
            .build();
        let invoker = CaseInvoker::new(
            Arc::new(LifecycleRegistry::new(Arc::new(BindingCatalog::new().class("core", class)))),
            Arc::new(OutputMultiplexer::new()),
            Arc::new(RunConfig::serial()),
            token.clone(),
        );
        let mut scheduler = Scheduler::new(Arc::new(invoker), token);

        let descriptors = (0..3)
            .map(|_| TestUnitDescriptor::new("core", "Stopper", "Stop"))
            .collect();
        let outcome = scheduler.run(descriptors).await;

        assert!(outcome.cancelled);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.dispatched, 1);
        assert_eq!(outcome.not_dispatched, 2);
    }
}
