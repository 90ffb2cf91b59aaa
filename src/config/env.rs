//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use anyhow::{Context, Result};
use std::env;

use super::{ParallelScope, RunConfig, WorkerCount};

/// Environment variable prefix
const ENV_PREFIX: &str = "UNIT_ENGINE";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Worker count from UNIT_ENGINE_WORKERS ("auto" or a number)
    pub workers: Option<String>,
    /// Parallel scope from UNIT_ENGINE_SCOPE
    pub scope: Option<String>,
    /// Parallel switch from UNIT_ENGINE_PARALLEL
    pub parallel: Option<bool>,
    /// Default timeout from UNIT_ENGINE_TIMEOUT_MS
    pub timeout_ms: Option<u64>,
    /// Trace capture from UNIT_ENGINE_CAPTURE_TRACE
    pub capture_trace: Option<bool>,
    /// From UNIT_ENGINE_CLEANUP_AS_FAILURE
    pub cleanup_as_failure: Option<bool>,
    /// Config file from UNIT_ENGINE_CONFIG
    pub config_file: Option<String>,
    /// Log level from UNIT_ENGINE_LOG
    pub log_level: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            workers: get_env("WORKERS"),
            scope: get_env("SCOPE"),
            parallel: get_env_bool("PARALLEL"),
            timeout_ms: get_env_parse("TIMEOUT_MS"),
            capture_trace: get_env_bool("CAPTURE_TRACE"),
            cleanup_as_failure: get_env_bool("CLEANUP_AS_FAILURE"),
            config_file: get_env("CONFIG"),
            log_level: get_env("LOG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.workers.is_some()
            || self.scope.is_some()
            || self.parallel.is_some()
            || self.timeout_ms.is_some()
            || self.capture_trace.is_some()
            || self.cleanup_as_failure.is_some()
            || self.config_file.is_some()
            || self.log_level.is_some()
    }

    /// Overlay the variables that are set onto `config`
    pub fn apply(&self, config: &mut RunConfig) -> Result<()> {
        if let Some(workers) = &self.workers {
            config.parallel.workers = workers
                .parse::<WorkerCount>()
                .with_context(|| format!("Invalid {ENV_PREFIX}_WORKERS"))?;
        }
        if let Some(scope) = &self.scope {
            config.parallel.scope = scope
                .parse::<ParallelScope>()
                .with_context(|| format!("Invalid {ENV_PREFIX}_SCOPE"))?;
        }
        if let Some(parallel) = self.parallel {
            config.parallel.enabled = parallel;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.default_timeout_ms = Some(timeout_ms);
        }
        if let Some(capture) = self.capture_trace {
            config.capture_trace = capture;
        }
        if let Some(as_failure) = self.cleanup_as_failure {
            config.cleanup_warnings_as_failures = as_failure;
        }
        Ok(())
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_WORKERS:            {:?}", ENV_PREFIX, self.workers);
        println!("  {}_SCOPE:              {:?}", ENV_PREFIX, self.scope);
        println!("  {}_PARALLEL:           {:?}", ENV_PREFIX, self.parallel);
        println!("  {}_TIMEOUT_MS:         {:?}", ENV_PREFIX, self.timeout_ms);
        println!("  {}_CAPTURE_TRACE:      {:?}", ENV_PREFIX, self.capture_trace);
        println!("  {}_CLEANUP_AS_FAILURE: {:?}", ENV_PREFIX, self.cleanup_as_failure);
        println!("  {}_CONFIG:             {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_LOG:                {:?}", ENV_PREFIX, self.log_level);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables (useful for testing)
#[derive(Default)]
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn var(mut self, name: &str, value: impl ToString) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_{name}"), value.to_string()));
        self
    }

    pub fn workers(self, workers: impl ToString) -> Self {
        self.var("WORKERS", workers)
    }

    pub fn scope(self, scope: &str) -> Self {
        self.var("SCOPE", scope)
    }

    pub fn parallel(self, parallel: bool) -> Self {
        self.var("PARALLEL", parallel)
    }

    pub fn timeout_ms(self, timeout_ms: u64) -> Self {
        self.var("TIMEOUT_MS", timeout_ms)
    }

    pub fn capture_trace(self, capture: bool) -> Self {
        self.var("CAPTURE_TRACE", capture)
    }

    /// Apply environment variables
    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

/// Guard that restores environment variables on drop
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all UNIT_ENGINE environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_WORKERS             Worker count (auto or a positive integer)");
    println!("  {ENV_PREFIX}_SCOPE               Parallel scope (method, class)");
    println!("  {ENV_PREFIX}_PARALLEL            Enable parallel execution (true/false)");
    println!("  {ENV_PREFIX}_TIMEOUT_MS          Default case timeout in milliseconds (0 = no limit)");
    println!("  {ENV_PREFIX}_CAPTURE_TRACE       Append the debug trace to outputs (true/false)");
    println!("  {ENV_PREFIX}_CLEANUP_AS_FAILURE  Treat cleanup warnings as failures (true/false)");
    println!("  {ENV_PREFIX}_CONFIG              Path to configuration file");
    println!("  {ENV_PREFIX}_LOG                 Log level (error, warn, info, debug, trace)");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_WORKERS=4");
    println!("  export {ENV_PREFIX}_SCOPE=class");
    println!("  unit-engine demo");
}
