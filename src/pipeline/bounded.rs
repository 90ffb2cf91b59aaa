//! Timeout boundary for case bodies
//!
//! A body runs on its own execution unit: a tokio task for async bodies, a
//! detached OS thread for sync ones. The instance moves into the unit and
//! comes back with the result. When the deadline passes, cancellation is
//! requested through the case context first; forced abort is a best-effort
//! fallback behind [`InFlight`]. An abandoned thread is never joined, so it
//! cannot keep the hosting runtime alive.

use serde_json::Value;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

use super::classify::BodyCompletion;
use crate::lifecycle::{Method, MethodResult, TestInstance};
use crate::models::{CaseContext, TestFault};

type Returned = (Box<dyn TestInstance>, MethodResult);

/// A body running on a separate execution unit
pub trait InFlight: Send {
    /// Attempt forced termination; false when the unit cannot be aborted
    fn try_abort(&mut self) -> bool;

    fn describe(&self) -> &'static str;
}

/// Async body on a tokio task
struct TaskFlight(AbortHandle);

impl InFlight for TaskFlight {
    fn try_abort(&mut self) -> bool {
        self.0.abort();
        true
    }

    fn describe(&self) -> &'static str {
        "async task"
    }
}

/// Sync body on a detached thread; a running thread cannot be stopped
struct ThreadFlight;

impl InFlight for ThreadFlight {
    fn try_abort(&mut self) -> bool {
        false
    }

    fn describe(&self) -> &'static str {
        "body thread"
    }
}

/// Where the instance comes back from
enum Unit {
    Task(JoinHandle<Returned>),
    Thread(oneshot::Receiver<Returned>),
    /// The unit could not be started
    Failed(Option<TestFault>),
}

impl Unit {
    async fn join(&mut self) -> Result<Returned, TestFault> {
        match self {
            Unit::Task(handle) => handle.await.map_err(|err| {
                if err.is_panic() {
                    TestFault::from_panic(err.into_panic())
                } else {
                    TestFault::error("Cancelled", "test body was cancelled before completing")
                }
            }),
            Unit::Thread(receiver) => receiver.await.map_err(|_| {
                TestFault::error("Abandoned", "test thread exited without returning its instance")
            }),
            Unit::Failed(fault) => Err(fault
                .take()
                .unwrap_or_else(|| TestFault::error("SpawnError", "test body was not started"))),
        }
    }
}

/// What came back from the boundary
pub struct BoundedOutcome {
    pub completion: BodyCompletion,
    /// `None` when the instance stayed with an aborted or abandoned unit
    pub instance: Option<Box<dyn TestInstance>>,
    pub warnings: Vec<String>,
}

impl BoundedOutcome {
    fn joined(joined: Result<Returned, TestFault>) -> Self {
        match joined {
            Ok((instance, result)) => Self {
                completion: BodyCompletion::Returned(result),
                instance: Some(instance),
                warnings: Vec::new(),
            },
            Err(fault) => Self {
                completion: BodyCompletion::Returned(Err(fault)),
                instance: None,
                warnings: vec!["Test instance lost with its execution unit; cleanup skipped.".into()],
            },
        }
    }
}

/// Body of a thread unit; an async method never passes here
fn run_sync_body(
    method: &Method,
    instance: &mut dyn TestInstance,
    ctx: &CaseContext,
    args: &[Value],
) -> MethodResult {
    method.invoke_blocking(instance, ctx, args).unwrap_or_else(|| {
        Err(TestFault::error(
            "InvalidSignature",
            "asynchronous method dispatched to a body thread",
        ))
    })
}

fn spawn(
    method: Method,
    mut instance: Box<dyn TestInstance>,
    ctx: CaseContext,
    args: Vec<Value>,
) -> (Unit, Box<dyn InFlight>) {
    if method.is_async() {
        let handle = tokio::spawn(async move {
            let result = method.invoke(instance.as_mut(), &ctx, &args).await;
            (instance, result)
        });
        let flight = TaskFlight(handle.abort_handle());
        return (Unit::Task(handle), Box::new(flight));
    }

    let (sender, receiver) = oneshot::channel();
    let body = move || {
        let result = run_sync_body(&method, instance.as_mut(), &ctx, &args);
        // The receiver is gone once the body was abandoned
        let _ = sender.send((instance, result));
    };
    let spawned = std::thread::Builder::new()
        .name("unit-engine-body".to_string())
        .spawn(body);
    let flight: Box<dyn InFlight> = Box::new(ThreadFlight);
    match spawned {
        Ok(_) => (Unit::Thread(receiver), flight),
        Err(err) => (
            Unit::Failed(Some(TestFault::error(
                "SpawnError",
                format!("unable to start test thread: {err}"),
            ))),
            flight,
        ),
    }
}

/// Run a body under an optional deadline
pub async fn run_bounded(
    method: Method,
    instance: Box<dyn TestInstance>,
    ctx: &CaseContext,
    args: Vec<Value>,
    timeout: Option<Duration>,
    abort_grace: Duration,
) -> BoundedOutcome {
    let (mut unit, mut flight) = spawn(method, instance, ctx.clone(), args);

    let Some(limit) = timeout else {
        return BoundedOutcome::joined(unit.join().await);
    };

    let first = tokio::time::timeout(limit, unit.join()).await;
    match first {
        Ok(joined) => BoundedOutcome::joined(joined),
        Err(_) => {
            warn!(
                "{} exceeded {}ms; requesting cancellation",
                ctx.display_name(),
                limit.as_millis()
            );
            ctx.request_cancellation();

            let mut outcome = BoundedOutcome {
                completion: BodyCompletion::TimedOut(limit),
                instance: None,
                warnings: Vec::new(),
            };

            let graceful = tokio::time::timeout(abort_grace, unit.join()).await;
            if let Ok(joined) = graceful {
                debug!("{} observed cancellation", ctx.display_name());
                outcome.instance = joined.ok().map(|(instance, _)| instance);
                return outcome;
            }

            if flight.try_abort() {
                debug!("Aborted {} for {}", flight.describe(), ctx.display_name());
                // Completes immediately unless the unit already finished
                if let Ok(Ok((instance, _))) = tokio::time::timeout(abort_grace, unit.join()).await {
                    outcome.instance = Some(instance);
                    return outcome;
                }
            } else {
                warn!(
                    "Forced abort unavailable for {}; abandoning {}",
                    flight.describe(),
                    ctx.display_name()
                );
            }
            outcome
                .warnings
                .push("Test instance abandoned after timeout; cleanup skipped.".into());
            outcome
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputMultiplexer;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[derive(Default)]
    struct Counter {
        calls: u32,
    }

    impl TestInstance for Counter {}

    fn ctx(mux: &OutputMultiplexer) -> CaseContext {
        CaseContext::detached("core", "Counter", mux)
    }

    #[tokio::test]
    async fn test_sync_body_returns_instance() {
        let mux = OutputMultiplexer::new();
        let method = Method::sync::<Counter, _>(|c, _, _| {
            c.calls += 1;
            Ok(())
        });
        let outcome = run_bounded(
            method,
            Box::new(Counter::default()),
            &ctx(&mux),
            Vec::new(),
            Some(Duration::from_secs(5)),
            Duration::from_millis(10),
        )
        .await;

        assert!(matches!(outcome.completion, BodyCompletion::Returned(Ok(()))));
        let mut instance = outcome.instance.unwrap();
        let counter = crate::lifecycle::downcast_instance::<Counter>(instance.as_mut()).unwrap();
        assert_eq!(counter.calls, 1);
    }

    #[tokio::test]
    async fn test_cooperative_body_returns_instance_after_timeout() {
        let mux = OutputMultiplexer::new();
        let method = Method::asynchronous::<Counter, _>(|_, ctx, _| {
            Box::pin(async move {
                ctx.cancellation_token().cancelled().await;
                Ok::<(), TestFault>(())
            })
        });
        let ctx = ctx(&mux);
        let outcome = run_bounded(
            method,
            Box::new(Counter::default()),
            &ctx,
            Vec::new(),
            Some(Duration::from_millis(20)),
            Duration::from_secs(5),
        )
        .await;

        assert!(matches!(outcome.completion, BodyCompletion::TimedOut(_)));
        assert!(outcome.instance.is_some());
        assert!(outcome.warnings.is_empty());
        assert!(ctx.is_cancellation_requested());
    }

    #[tokio::test]
    async fn test_uncooperative_async_body_is_aborted() {
        let mux = OutputMultiplexer::new();
        let method = Method::asynchronous::<Counter, _>(|_, _, _| {
            Box::pin(async move {
                futures::future::pending::<()>().await;
                Ok::<(), TestFault>(())
            })
        });
        let start = Instant::now();
        let outcome = run_bounded(
            method,
            Box::new(Counter::default()),
            &ctx(&mux),
            Vec::new(),
            Some(Duration::from_millis(10)),
            Duration::from_millis(10),
        )
        .await;

        assert!(matches!(outcome.completion, BodyCompletion::TimedOut(_)));
        assert!(outcome.instance.is_none());
        assert_eq!(outcome.warnings.len(), 1);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_uncooperative_sync_body_is_abandoned() {
        let mux = OutputMultiplexer::new();
        let release = Arc::new(AtomicBool::new(false));
        let spinning = release.clone();
        let method = Method::sync::<Counter, _>(move |_, _, _| {
            while !spinning.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        });
        let ctx = ctx(&mux);
        let start = Instant::now();
        let outcome = run_bounded(
            method,
            Box::new(Counter::default()),
            &ctx,
            Vec::new(),
            Some(Duration::from_millis(10)),
            Duration::from_millis(10),
        )
        .await;

        assert!(matches!(outcome.completion, BodyCompletion::TimedOut(_)));
        assert!(outcome.instance.is_none());
        assert_eq!(
            outcome.warnings,
            vec!["Test instance abandoned after timeout; cleanup skipped."]
        );
        assert!(ctx.is_cancellation_requested());
        assert!(start.elapsed() < Duration::from_secs(5));
        release.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_async_method_on_body_thread_is_not_a_pass() {
        let mux = OutputMultiplexer::new();
        let method = Method::asynchronous::<Counter, _>(|_, _, _| {
            Box::pin(async move { Ok::<(), TestFault>(()) })
        });
        let mut counter = Counter::default();
        let fault = run_sync_body(&method, &mut counter, &ctx(&mux), &[]).unwrap_err();
        assert_eq!(fault.type_name, "InvalidSignature");
    }

    #[tokio::test]
    async fn test_no_timeout_waits_for_completion() {
        let mux = OutputMultiplexer::new();
        let method = Method::asynchronous::<Counter, _>(|c, _, _| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                c.calls += 1;
                Err(TestFault::error("Boom", "late failure"))
            })
        });
        let outcome = run_bounded(
            method,
            Box::new(Counter::default()),
            &ctx(&mux),
            Vec::new(),
            None,
            Duration::ZERO,
        )
        .await;

        match outcome.completion {
            BodyCompletion::Returned(Err(fault)) => assert_eq!(fault.type_name, "Boom"),
            other => panic!("unexpected completion: {other:?}"),
        }
        assert!(outcome.instance.is_some());
    }
}
