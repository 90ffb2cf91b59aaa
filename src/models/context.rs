//! Per-case execution context
//!
//! The mutable state a running case can see: its property bag, its
//! cancellation token, a provisional outcome slot, produced artifacts and
//! its output writers. Each case gets its own context; nothing in it is
//! shared by reference with another case.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use super::result::Outcome;
use crate::output::{OutputMultiplexer, ScopeHandle};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct ContextInner {
    module: String,
    class_name: String,
    method_name: String,
    display_name: String,
    row_index: Option<usize>,
    properties: Mutex<BTreeMap<String, Value>>,
    cancellation: CancellationToken,
    outcome: Mutex<Option<Outcome>>,
    artifacts: Mutex<Vec<PathBuf>>,
    stdout: ScopeHandle,
    trace: ScopeHandle,
}

/// Handle to a case's execution context; clones share state
#[derive(Clone, Debug)]
pub struct CaseContext {
    inner: Arc<ContextInner>,
}

/// Everything needed to build a [`CaseContext`]
#[derive(Debug)]
pub struct ContextSeed<'a> {
    pub module: &'a str,
    pub class_name: &'a str,
    pub method_name: &'a str,
    pub display_name: String,
    pub row_index: Option<usize>,
    /// Seeded first
    pub run_parameters: &'a BTreeMap<String, Value>,
    /// Seeded second; a key already present is left untouched
    pub properties: &'a [(String, Value)],
    pub cancellation: CancellationToken,
}

impl CaseContext {
    pub fn new(seed: ContextSeed<'_>, output: &OutputMultiplexer) -> Self {
        let mut properties = BTreeMap::new();
        for (key, value) in seed.run_parameters {
            properties.entry(key.clone()).or_insert_with(|| value.clone());
        }
        for (key, value) in seed.properties {
            properties.entry(key.clone()).or_insert_with(|| value.clone());
        }

        Self {
            inner: Arc::new(ContextInner {
                module: seed.module.to_string(),
                class_name: seed.class_name.to_string(),
                method_name: seed.method_name.to_string(),
                display_name: seed.display_name,
                row_index: seed.row_index,
                properties: Mutex::new(properties),
                cancellation: seed.cancellation,
                outcome: Mutex::new(None),
                artifacts: Mutex::new(Vec::new()),
                stdout: output.open_scope(),
                trace: output.open_scope(),
            }),
        }
    }

    /// Context for lifecycle hooks that run outside any case (teardown)
    pub fn detached(module: &str, class_name: &str, output: &OutputMultiplexer) -> Self {
        Self::new(
            ContextSeed {
                module,
                class_name,
                method_name: "",
                display_name: class_name.to_string(),
                row_index: None,
                run_parameters: &BTreeMap::new(),
                properties: &[],
                cancellation: CancellationToken::new(),
            },
            output,
        )
    }

    pub fn module(&self) -> &str {
        &self.inner.module
    }

    pub fn class_name(&self) -> &str {
        &self.inner.class_name
    }

    pub fn method_name(&self) -> &str {
        &self.inner.method_name
    }

    pub fn display_name(&self) -> &str {
        &self.inner.display_name
    }

    pub fn row_index(&self) -> Option<usize> {
        self.inner.row_index
    }

    pub fn property(&self, key: &str) -> Option<Value> {
        lock(&self.inner.properties).get(key).cloned()
    }

    pub fn properties(&self) -> BTreeMap<String, Value> {
        lock(&self.inner.properties).clone()
    }

    /// Runtime write; overwrites unlike seeding
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<Value>) {
        lock(&self.inner.properties).insert(key.into(), value.into());
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancellation
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }

    pub(crate) fn request_cancellation(&self) {
        self.inner.cancellation.cancel();
    }

    /// Report a provisional outcome; a normally completing body uses it
    /// instead of `Passed`
    pub fn set_outcome(&self, outcome: Outcome) {
        *lock(&self.inner.outcome) = Some(outcome);
    }

    pub fn current_outcome(&self) -> Option<Outcome> {
        *lock(&self.inner.outcome)
    }

    pub fn add_result_file(&self, path: impl Into<PathBuf>) {
        lock(&self.inner.artifacts).push(path.into());
    }

    pub fn result_files(&self) -> Vec<PathBuf> {
        lock(&self.inner.artifacts).clone()
    }

    pub fn write(&self, text: &str) {
        self.inner.stdout.write(text);
    }

    pub fn write_line(&self, line: &str) {
        self.inner.stdout.write_line(line);
    }

    pub fn trace_line(&self, line: &str) {
        self.inner.trace.write_line(line);
    }

    /// Independent stdout writer, for threads or tasks the case spawns
    pub fn stdout_writer(&self) -> ScopeHandle {
        self.inner.stdout.writer()
    }

    pub(crate) fn stdout_scope(&self) -> &ScopeHandle {
        &self.inner.stdout
    }

    pub(crate) fn trace_scope(&self) -> &ScopeHandle {
        &self.inner.trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(
        mux: &OutputMultiplexer,
        params: &BTreeMap<String, Value>,
        props: &[(String, Value)],
    ) -> CaseContext {
        CaseContext::new(
            ContextSeed {
                module: "core",
                class_name: "Calc",
                method_name: "Adds",
                display_name: "Adds".into(),
                row_index: None,
                run_parameters: params,
                properties: props,
                cancellation: CancellationToken::new(),
            },
            mux,
        )
    }

    #[test]
    fn test_first_writer_wins_on_seed() {
        let mux = OutputMultiplexer::new();
        let mut params = BTreeMap::new();
        params.insert("env".to_string(), json!("staging"));
        let props = vec![
            ("env".to_string(), json!("local")),
            ("owner".to_string(), json!("qa")),
            ("owner".to_string(), json!("dev")),
        ];

        let ctx = context(&mux, &params, &props);
        assert_eq!(ctx.property("env"), Some(json!("staging")));
        assert_eq!(ctx.property("owner"), Some(json!("qa")));

        ctx.set_property("owner", "ops");
        assert_eq!(ctx.property("owner"), Some(json!("ops")));
    }

    #[test]
    fn test_contexts_are_copied_not_shared() {
        let mux = OutputMultiplexer::new();
        let params = BTreeMap::new();
        let first = context(&mux, &params, &[]);
        let second = context(&mux, &params, &[]);

        first.set_property("k", 1);
        assert_eq!(second.property("k"), None);
    }

    #[test]
    fn test_outcome_slot_and_artifacts() {
        let mux = OutputMultiplexer::new();
        let ctx = context(&mux, &BTreeMap::new(), &[]);
        assert_eq!(ctx.current_outcome(), None);
        ctx.set_outcome(Outcome::Inconclusive);
        assert_eq!(ctx.current_outcome(), Some(Outcome::Inconclusive));

        ctx.add_result_file("/tmp/a.log");
        assert_eq!(ctx.result_files(), vec![PathBuf::from("/tmp/a.log")]);

        ctx.write_line("hello");
        assert_eq!(ctx.stdout_scope().snapshot(), "hello\n");
    }
}
