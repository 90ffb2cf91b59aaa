//! Case result models
//!
//! Defines outcomes, failure details, per-case results and the canonical
//! outcome record handed to result sinks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::descriptor::TestUnitDescriptor;
use super::fault::{SourceLocation, TestFault};

/// Header separating standard output from the diagnostic trace
pub const TRACE_SECTION_HEADER: &str = "\n\nDebug Trace:\n";

/// Case outcome
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
    Inconclusive,
    Ignored,
    NotFound,
    NotRunnable,
    TimedOut,
}

impl Outcome {
    pub fn symbol(&self) -> &'static str {
        match self {
            Outcome::Passed => "✓",
            Outcome::Failed => "✗",
            Outcome::Inconclusive => "?",
            Outcome::Ignored => "○",
            Outcome::NotFound | Outcome::NotRunnable => "!",
            Outcome::TimedOut => "⧗",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Passed)
    }

    /// Outcomes that count against the run
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Outcome::Failed | Outcome::NotFound | Outcome::NotRunnable | Outcome::TimedOut
        )
    }

    pub fn all() -> [Outcome; 7] {
        [
            Outcome::Passed,
            Outcome::Failed,
            Outcome::Inconclusive,
            Outcome::Ignored,
            Outcome::NotFound,
            Outcome::NotRunnable,
            Outcome::TimedOut,
        ]
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Outcome::Passed => "PASS",
            Outcome::Failed => "FAIL",
            Outcome::Inconclusive => "INCONCLUSIVE",
            Outcome::Ignored => "SKIP",
            Outcome::NotFound => "NOT FOUND",
            Outcome::NotRunnable => "NOT RUNNABLE",
            Outcome::TimedOut => "TIMEOUT",
        };
        f.write_str(label)
    }
}

/// Where a failure originated
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureOrigin {
    Construction,
    ContextBinding,
    ModuleInitialize,
    ClassInitialize,
    TestInitialize,
    Assertion,
    Inconclusive,
    UnhandledError,
    Timeout,
    ExpectedFailureMismatch,
    ExpectedFailureMissing,
    Cleanup,
    DescriptorNotFound,
    DescriptorNotRunnable,
    ArgumentMismatch,
    Ignored,
}

/// Failure attached to a result
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub origin: FailureOrigin,
    pub message: String,
    pub stack: Option<String>,
    pub location: Option<SourceLocation>,
}

impl FailureDetail {
    pub fn new(origin: FailureOrigin, message: impl Into<String>) -> Self {
        Self {
            origin,
            message: message.into(),
            stack: None,
            location: None,
        }
    }

    /// Carry the fault's stack and location under a new message
    pub fn from_fault(origin: FailureOrigin, message: impl Into<String>, fault: &TestFault) -> Self {
        Self {
            origin,
            message: message.into(),
            stack: fault.stack.clone(),
            location: fault.location.clone(),
        }
    }
}

/// Result of one expanded case
#[derive(Clone, Debug)]
pub struct CaseResult {
    pub full_name: String,
    pub display_name: String,
    pub outcome: Outcome,
    pub failure: Option<FailureDetail>,
    /// Secondary diagnostics, e.g. cleanup failures
    pub warnings: Vec<String>,
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub stdout: String,
    /// `None` when trace capture is disabled for the run
    pub trace: Option<String>,
    pub artifacts: Vec<PathBuf>,
    pub row_index: Option<usize>,
}

impl CaseResult {
    pub fn new(descriptor: &TestUnitDescriptor, display_name: impl Into<String>, outcome: Outcome) -> Self {
        let now = Utc::now();
        Self {
            full_name: descriptor.full_name(),
            display_name: display_name.into(),
            outcome,
            failure: None,
            warnings: Vec::new(),
            duration: Duration::ZERO,
            started_at: now,
            ended_at: now,
            stdout: String::new(),
            trace: None,
            artifacts: Vec::new(),
            row_index: None,
        }
    }

    pub fn ignored(descriptor: &TestUnitDescriptor, reason: impl Into<String>) -> Self {
        Self::new(descriptor, descriptor.base_display_name(), Outcome::Ignored)
            .with_failure(FailureDetail::new(FailureOrigin::Ignored, reason))
    }

    pub fn with_failure(mut self, failure: FailureDetail) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn with_row(mut self, row_index: Option<usize>) -> Self {
        self.row_index = row_index;
        self
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    /// Captured stdout with the delimited trace section when capture was on
    pub fn output_text(&self) -> String {
        match &self.trace {
            Some(trace) if !trace.is_empty() => {
                format!("{}{}{}", self.stdout, TRACE_SECTION_HEADER, trace)
            }
            _ => self.stdout.clone(),
        }
    }

    /// Canonical record for result sinks
    pub fn to_record(&self) -> OutcomeRecord {
        let failure = self.failure.as_ref();
        let location = failure.and_then(|f| f.location.as_ref());
        OutcomeRecord {
            full_name: self.full_name.clone(),
            display_name: self.display_name.clone(),
            outcome: self.outcome,
            duration_ms: self.duration_ms(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            error_message: failure.map(|f| f.message.clone()),
            error_stack: failure.and_then(|f| f.stack.clone()),
            error_file: location.map(|l| l.file.clone()),
            error_line: location.map(|l| l.line),
            output: self.output_text(),
            warnings: self.warnings.clone(),
            artifacts: self.artifacts.clone(),
            row_index: self.row_index,
        }
    }
}

impl fmt::Display for CaseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.outcome.symbol(),
            self.display_name,
            self.duration_ms()
        )?;
        if let Some(failure) = &self.failure {
            write!(f, " - {}", failure.message)?;
        }
        Ok(())
    }
}

/// Serializable outcome record delivered to result sinks
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub full_name: String,
    pub display_name: String,
    pub outcome: Outcome,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub error_stack: Option<String>,
    pub error_file: Option<String>,
    pub error_line: Option<u32>,
    pub output: String,
    pub warnings: Vec<String>,
    pub artifacts: Vec<PathBuf>,
    pub row_index: Option<usize>,
}

/// Summary of a whole run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub inconclusive: usize,
    pub ignored: usize,
    pub not_found: usize,
    pub not_runnable: usize,
    pub timed_out: usize,
    pub total_duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub cancelled: bool,
    /// Dispatch units never started because the run was cancelled
    pub not_dispatched: usize,
    /// Teardown-time cleanup failures
    pub warnings: Vec<String>,
    pub records: Vec<OutcomeRecord>,
}

impl RunReport {
    pub fn new(results: &[CaseResult], started_at: DateTime<Utc>) -> Self {
        let count = |outcome: Outcome| results.iter().filter(|r| r.outcome == outcome).count();
        let ended_at = Utc::now();

        Self {
            total: results.len(),
            passed: count(Outcome::Passed),
            failed: count(Outcome::Failed),
            inconclusive: count(Outcome::Inconclusive),
            ignored: count(Outcome::Ignored),
            not_found: count(Outcome::NotFound),
            not_runnable: count(Outcome::NotRunnable),
            timed_out: count(Outcome::TimedOut),
            total_duration_ms: (ended_at - started_at).num_milliseconds().max(0) as u64,
            started_at,
            ended_at,
            cancelled: false,
            not_dispatched: 0,
            warnings: Vec::new(),
            records: results.iter().map(CaseResult::to_record).collect(),
        }
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }

    pub fn is_all_passed(&self) -> bool {
        self.passed + self.ignored == self.total
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Timeout: {} | Inconclusive: {} | Skip: {}",
            self.total, self.passed, self.failed, self.timed_out, self.inconclusive, self.ignored
        )?;
        if self.not_found + self.not_runnable > 0 {
            writeln!(
                f,
                "Not found: {} | Not runnable: {}",
                self.not_found, self.not_runnable
            )?;
        }
        if self.cancelled {
            writeln!(f, "Run cancelled ({} units not dispatched)", self.not_dispatched)?;
        }
        write!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.total_duration_ms
        )
    }
}
