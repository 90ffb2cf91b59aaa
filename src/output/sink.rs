//! Result sinks
//!
//! The engine hands every aggregated case result to a sink, then the run
//! report once the run is over.

use std::io::Write;

use super::formatter::{OutputFormat, ResultFormatter};
use crate::models::{CaseResult, OutcomeRecord, RunReport};

/// Receives outcome records from the engine
pub trait ResultSink: Send {
    fn on_result(&mut self, result: &CaseResult);

    fn on_run_complete(&mut self, _report: &RunReport) {}
}

/// Keeps every record in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub records: Vec<OutcomeRecord>,
    pub report: Option<RunReport>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, display_name: &str) -> Option<&OutcomeRecord> {
        self.records.iter().find(|r| r.display_name == display_name)
    }
}

impl ResultSink for CollectingSink {
    fn on_result(&mut self, result: &CaseResult) {
        self.records.push(result.to_record());
    }

    fn on_run_complete(&mut self, report: &RunReport) {
        self.report = Some(report.clone());
    }
}

/// Renders results through a [`ResultFormatter`] onto a writer
///
/// Line formats (table, summary) stream one line per result; document
/// formats (JSON, CSV) are written once the run completes.
pub struct FormatterSink<W: Write + Send> {
    formatter: ResultFormatter,
    writer: W,
}

impl<W: Write + Send> FormatterSink<W> {
    pub fn new(formatter: ResultFormatter, writer: W) -> Self {
        Self { formatter, writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn emit(&mut self, text: &str) {
        if let Err(err) = writeln!(self.writer, "{text}") {
            tracing::warn!("Failed to write result output: {}", err);
        }
    }
}

impl FormatterSink<std::io::Stdout> {
    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(ResultFormatter::new(format), std::io::stdout())
    }
}

impl<W: Write + Send> ResultSink for FormatterSink<W> {
    fn on_result(&mut self, result: &CaseResult) {
        if self.formatter.format().is_streaming() {
            let line = self.formatter.format_result(result);
            self.emit(&line);
        }
    }

    fn on_run_complete(&mut self, report: &RunReport) {
        let text = self.formatter.format_report(report);
        self.emit(&text);
        if let Err(err) = self.writer.flush() {
            tracing::warn!("Failed to flush result output: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Outcome, TestUnitDescriptor};
    use chrono::Utc;

    fn results() -> Vec<CaseResult> {
        let d = TestUnitDescriptor::new("core", "Calc", "Adds");
        vec![
            CaseResult::new(&d, "Adds (1,2)", Outcome::Passed),
            CaseResult::new(&d, "Adds (2,2)", Outcome::Failed),
        ]
    }

    #[test]
    fn test_collecting_sink() {
        let mut sink = CollectingSink::new();
        let results = results();
        for result in &results {
            sink.on_result(result);
        }
        sink.on_run_complete(&RunReport::new(&results, Utc::now()));

        assert_eq!(sink.records.len(), 2);
        assert_eq!(sink.record("Adds (2,2)").unwrap().outcome, Outcome::Failed);
        assert_eq!(sink.report.unwrap().failed, 1);
    }

    #[test]
    fn test_formatter_sink_streams_lines() {
        let formatter = ResultFormatter::new(OutputFormat::Summary).no_color();
        let mut sink = FormatterSink::new(formatter, Vec::new());
        let results = results();
        for result in &results {
            sink.on_result(result);
        }
        sink.on_run_complete(&RunReport::new(&results, Utc::now()));

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert!(lines[0].contains("Adds (1,2)"));
        assert!(lines[1].contains("Adds (2,2)"));
        assert!(text.contains("1/2 passed"));
    }

    #[test]
    fn test_formatter_sink_defers_documents() {
        let formatter = ResultFormatter::new(OutputFormat::Json);
        let mut sink = FormatterSink::new(formatter, Vec::new());
        let results = results();
        sink.on_result(&results[0]);
        sink.on_run_complete(&RunReport::new(&results[..1], Utc::now()));

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(parsed["total"], 1);
        assert_eq!(parsed["records"][0]["outcome"], "passed");
    }
}
