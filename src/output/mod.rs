//! Output module
//!
//! Per-case capture of diagnostic output, result sinks and formatters.

mod formatter;
mod multiplexer;
mod sink;

pub use formatter::{write_report_to_file, OutputFormat, ResultFormatter};
pub use multiplexer::{OutputMultiplexer, ScopeHandle};
pub use sink::{CollectingSink, FormatterSink, ResultSink};
