//! Output formatters for case results
//!
//! Provides table, JSON, CSV and summary renderings of results and run
//! reports.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use crate::models::{CaseResult, Outcome, OutcomeRecord, RunReport};

/// Output format options
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    /// Formats that print each result as it arrives
    pub fn is_streaming(&self) -> bool {
        matches!(self, OutputFormat::Summary)
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Ok(OutputFormat::JsonPretty),
            "csv" => Ok(OutputFormat::Csv),
            "summary" => Ok(OutputFormat::Summary),
            other => Err(format!(
                "unknown output format '{other}' (expected table, json, json-pretty, csv or summary)"
            )),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
            OutputFormat::JsonPretty => "json-pretty",
            OutputFormat::Csv => "csv",
            OutputFormat::Summary => "summary",
        };
        f.write_str(name)
    }
}

const CSV_HEADER: [&str; 10] = [
    "full_name",
    "display_name",
    "row_index",
    "outcome",
    "duration_ms",
    "started_at",
    "error_message",
    "error_file",
    "error_line",
    "warnings",
];

/// Result formatter
#[derive(Clone, Debug)]
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Format a single case result
    pub fn format_result(&self, result: &CaseResult) -> String {
        match self.format {
            OutputFormat::Table => self.format_result_table(result),
            OutputFormat::Json => serde_json::to_string(&result.to_record()).unwrap_or_default(),
            OutputFormat::JsonPretty => {
                serde_json::to_string_pretty(&result.to_record()).unwrap_or_default()
            }
            OutputFormat::Csv => Self::csv(std::slice::from_ref(&result.to_record())),
            OutputFormat::Summary => self.format_result_summary(result),
        }
    }

    fn outcome_label(&self, outcome: Outcome) -> String {
        let label = format!("{} {}", outcome.symbol(), outcome);
        if !self.colorize {
            return label;
        }
        let color = match outcome {
            Outcome::Passed => "32",
            Outcome::Inconclusive | Outcome::Ignored => "33",
            _ => "31",
        };
        format!("\x1b[{color}m{label}\x1b[0m")
    }

    fn format_result_table(&self, result: &CaseResult) -> String {
        format!(
            "{:40} {} [{:>6}ms]",
            result.display_name,
            self.outcome_label(result.outcome),
            result.duration_ms()
        )
    }

    fn format_record_table(&self, record: &OutcomeRecord) -> String {
        format!(
            "{:40} {} [{:>6}ms]",
            record.display_name,
            self.outcome_label(record.outcome),
            record.duration_ms
        )
    }

    fn format_result_summary(&self, result: &CaseResult) -> String {
        let mut line = format!(
            "{} {} ({}ms)",
            result.outcome.symbol(),
            result.display_name,
            result.duration_ms()
        );
        if let Some(failure) = &result.failure {
            line.push_str(&format!(" - {}", failure.message));
        }
        line
    }

    /// Format a run report
    pub fn format_report(&self, report: &RunReport) -> String {
        match self.format {
            OutputFormat::Table => self.format_report_table(report),
            OutputFormat::Json => serde_json::to_string(report).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Csv => Self::csv(&report.records),
            OutputFormat::Summary => Self::format_report_brief(report),
        }
    }

    fn format_report_table(&self, report: &RunReport) -> String {
        let mut output = String::new();

        output.push_str("\n╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!("║  {:58}  ║\n", format!("Run {}", report.started_at.format("%Y-%m-%d %H:%M:%S"))));
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        for record in &report.records {
            output.push_str(&format!("║  {}\n", self.format_record_table(record)));
            if let Some(message) = &record.error_message {
                output.push_str(&format!("║      {message}\n"));
            }
            for warning in &record.warnings {
                output.push_str(&format!("║      warning: {warning}\n"));
            }
        }

        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");
        let pass_str = if self.colorize {
            format!("\x1b[32m{}\x1b[0m", report.passed)
        } else {
            report.passed.to_string()
        };
        let failing = report.failed + report.timed_out + report.not_found + report.not_runnable;
        let fail_str = if self.colorize && failing > 0 {
            format!("\x1b[31m{failing}\x1b[0m")
        } else {
            failing.to_string()
        };
        output.push_str(&format!(
            "║  Total: {:3} | Pass: {} | Fail: {} | Inconclusive: {:2} | Skip: {:2}\n",
            report.total, pass_str, fail_str, report.inconclusive, report.ignored
        ));
        output.push_str(&format!(
            "║  Pass Rate: {:5.1}% | Duration: {:6}ms\n",
            report.pass_rate(),
            report.total_duration_ms
        ));
        if report.cancelled {
            output.push_str(&format!(
                "║  Cancelled: {} units not dispatched\n",
                report.not_dispatched
            ));
        }
        for warning in &report.warnings {
            output.push_str(&format!("║  warning: {warning}\n"));
        }
        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");

        output
    }

    fn format_report_brief(report: &RunReport) -> String {
        let mut line = format!(
            "{}/{} passed ({:.1}%) in {}ms",
            report.passed,
            report.total,
            report.pass_rate(),
            report.total_duration_ms
        );
        if !report.warnings.is_empty() {
            line.push_str(&format!(", {} teardown warnings", report.warnings.len()));
        }
        if report.cancelled {
            line.push_str(&format!(", cancelled ({} not dispatched)", report.not_dispatched));
        }
        line
    }

    fn csv(records: &[OutcomeRecord]) -> String {
        match Self::try_csv(records) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!("Failed to render CSV: {}", err);
                String::new()
            }
        }
    }

    fn try_csv(records: &[OutcomeRecord]) -> anyhow::Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(CSV_HEADER)?;
        for record in records {
            writer.write_record([
                record.full_name.clone(),
                record.display_name.clone(),
                record.row_index.map(|i| i.to_string()).unwrap_or_default(),
                record.outcome.to_string(),
                record.duration_ms.to_string(),
                record.started_at.to_rfc3339(),
                record.error_message.clone().unwrap_or_default(),
                record.error_file.clone().unwrap_or_default(),
                record.error_line.map(|l| l.to_string()).unwrap_or_default(),
                record.warnings.join("; "),
            ])?;
        }
        let bytes = writer.into_inner()?;
        Ok(String::from_utf8(bytes)?)
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

/// Write a run report to a file
pub fn write_report_to_file(path: &str, report: &RunReport, format: OutputFormat) -> anyhow::Result<()> {
    let formatter = ResultFormatter::new(format).no_color();
    let content = formatter.format_report(report);

    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FailureDetail, FailureOrigin, TestUnitDescriptor};
    use chrono::Utc;

    fn report() -> RunReport {
        let d = TestUnitDescriptor::new("core", "Calc", "Adds");
        let mut failed = CaseResult::new(&d, "Adds (2,2)", Outcome::Failed)
            .with_failure(FailureDetail::new(FailureOrigin::Assertion, "Assert failed. 4 != 5, really"))
            .with_row(Some(1));
        failed.warnings.push("TestCleanup method Calc.Teardown threw exception.".into());
        let results = vec![
            CaseResult::new(&d, "Adds (1,2)", Outcome::Passed).with_row(Some(0)),
            failed,
        ];
        RunReport::new(&results, Utc::now())
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("TABLE".parse::<OutputFormat>(), Ok(OutputFormat::Table));
        assert!("unknown".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::JsonPretty.to_string(), "json-pretty");
    }

    #[test]
    fn test_formatter_creation() {
        let formatter = ResultFormatter::new(OutputFormat::Json).no_color();
        assert_eq!(formatter.format, OutputFormat::Json);
        assert!(!formatter.colorize);
    }

    #[test]
    fn test_table_report() {
        let output = ResultFormatter::new(OutputFormat::Table)
            .no_color()
            .format_report(&report());
        assert!(output.contains("Adds (1,2)"));
        assert!(output.contains("✗ FAIL"));
        assert!(output.contains("warning: TestCleanup"));
        assert!(output.contains("Pass Rate:  50.0%"));
    }

    #[test]
    fn test_csv_report_quotes_fields() {
        let output = ResultFormatter::new(OutputFormat::Csv).format_report(&report());
        let mut reader = csv::Reader::from_reader(output.as_bytes());
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), CSV_HEADER.len());

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[1][2], "1");
        assert_eq!(&rows[1][3], "FAIL");
        assert_eq!(&rows[1][6], "Assert failed. 4 != 5, really");
    }

    #[test]
    fn test_summary_line() {
        let d = TestUnitDescriptor::new("core", "Calc", "Adds");
        let result = CaseResult::new(&d, "Adds", Outcome::Failed)
            .with_failure(FailureDetail::new(FailureOrigin::Timeout, "too slow"));
        let output = ResultFormatter::new(OutputFormat::Summary).format_result(&result);
        assert!(output.starts_with("✗ Adds"));
        assert!(output.ends_with("- too slow"));
    }
}
