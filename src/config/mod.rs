//! Configuration module
//!
//! Run-scoped configuration, built once per run and passed explicitly to
//! the scheduler and the pipeline. Layers: defaults, then a config file,
//! then `UNIT_ENGINE_*` environment variables, then command-line flags.

mod env;
mod file;

pub use env::{print_env_help, EnvBuilder, EnvConfig, EnvGuard};
pub use file::ConfigFile;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Worker pool size
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WorkerSpec", into = "WorkerSpec")]
pub enum WorkerCount {
    /// One worker per available execution unit
    Auto,
    Fixed(usize),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WorkerSpec {
    Count(usize),
    Keyword(String),
}

impl TryFrom<WorkerSpec> for WorkerCount {
    type Error = ConfigError;

    fn try_from(spec: WorkerSpec) -> Result<Self, Self::Error> {
        match spec {
            WorkerSpec::Count(0) => Err(ConfigError::ZeroWorkers),
            WorkerSpec::Count(n) => Ok(WorkerCount::Fixed(n)),
            WorkerSpec::Keyword(s) => s.parse(),
        }
    }
}

impl From<WorkerCount> for WorkerSpec {
    fn from(count: WorkerCount) -> Self {
        match count {
            WorkerCount::Auto => WorkerSpec::Keyword("auto".to_string()),
            WorkerCount::Fixed(n) => WorkerSpec::Count(n),
        }
    }
}

impl WorkerCount {
    pub fn resolve(&self) -> usize {
        match self {
            WorkerCount::Auto => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            WorkerCount::Fixed(n) => (*n).max(1),
        }
    }
}

impl FromStr for WorkerCount {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(WorkerCount::Auto);
        }
        match s.parse::<usize>() {
            Ok(0) => Err(ConfigError::ZeroWorkers),
            Ok(n) => Ok(WorkerCount::Fixed(n)),
            Err(_) => Err(ConfigError::InvalidWorkers(s.to_string())),
        }
    }
}

impl fmt::Display for WorkerCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerCount::Auto => f.write_str("auto"),
            WorkerCount::Fixed(n) => write!(f, "{n}"),
        }
    }
}

/// Granularity of a dispatch unit
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParallelScope {
    /// Each case is its own unit
    #[default]
    Method,
    /// All cases of a class run in sequence on one worker
    Class,
}

impl FromStr for ParallelScope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "method" => Ok(ParallelScope::Method),
            "class" => Ok(ParallelScope::Class),
            other => Err(ConfigError::UnknownScope(other.to_string())),
        }
    }
}

impl fmt::Display for ParallelScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParallelScope::Method => f.write_str("method"),
            ParallelScope::Class => f.write_str("class"),
        }
    }
}

/// When class cleanup chains run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassCleanupBehavior {
    /// At engine teardown, after every case has run
    #[default]
    EndOfModule,
    /// As soon as the class's last scheduled case finishes
    EndOfClass,
}

impl FromStr for ClassCleanupBehavior {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "end_of_module" => Ok(ClassCleanupBehavior::EndOfModule),
            "end_of_class" => Ok(ClassCleanupBehavior::EndOfClass),
            other => Err(ConfigError::UnknownCleanupBehavior(other.to_string())),
        }
    }
}

/// Parallel execution settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// When false everything runs serially and `scope` is ignored
    pub enabled: bool,
    pub workers: WorkerCount,
    pub scope: ParallelScope,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: WorkerCount::Auto,
            scope: ParallelScope::Method,
        }
    }
}

/// Configuration for one run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub parallel: ParallelConfig,

    /// Timeout for bodies that declare none
    pub default_timeout_ms: Option<u64>,

    /// How long a timed-out body may take to observe cancellation
    pub abort_grace_ms: u64,

    /// Cleanup warnings flip Passed/Inconclusive cases to Failed
    pub cleanup_warnings_as_failures: bool,

    /// Keep the diagnostic trace section in outcome records
    pub capture_trace: bool,

    pub class_cleanup: ClassCleanupBehavior,

    /// Module-wide run parameters seeded into every case context
    pub parameters: BTreeMap<String, Value>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            parallel: ParallelConfig::default(),
            default_timeout_ms: None,
            abort_grace_ms: 100,
            cleanup_warnings_as_failures: false,
            capture_trace: false,
            class_cleanup: ClassCleanupBehavior::EndOfModule,
            parameters: BTreeMap::new(),
        }
    }
}

impl RunConfig {
    /// Fully serial configuration
    pub fn serial() -> Self {
        Self {
            parallel: ParallelConfig {
                enabled: false,
                ..ParallelConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.parallel.enabled = true;
        self.parallel.workers = WorkerCount::Fixed(workers);
        self
    }

    pub fn with_scope(mut self, scope: ParallelScope) -> Self {
        self.parallel.scope = scope;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// `None` when unset or zero; zero means no limit
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn abort_grace(&self) -> Duration {
        Duration::from_millis(self.abort_grace_ms)
    }

    /// Effective pool size; 1 when parallelism is disabled
    pub fn worker_count(&self) -> usize {
        if self.parallel.enabled {
            self.parallel.workers.resolve()
        } else {
            1
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallel.workers == WorkerCount::Fixed(0) {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }
}
