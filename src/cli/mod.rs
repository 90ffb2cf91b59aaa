//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Args as ClapArgs, Parser, Subcommand};

use unit_engine::config::{ClassCleanupBehavior, ParallelScope, WorkerCount};
use unit_engine::output::OutputFormat;

/// Unit-test execution engine
#[derive(Parser, Debug)]
#[command(name = "unit-engine")]
#[command(author = "hephaex@gmail.com")]
#[command(version = "0.1.0")]
#[command(about = "Run unit tests with multi-scope lifecycles and bounded parallel scheduling")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (overrides the standard search locations)
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the built-in sample suite
    Demo(DemoArgs),

    /// Manage configuration
    Config(ConfigArgs),

    /// List recognized environment variables
    Env,
}

/// Arguments for the demo command
#[derive(ClapArgs, Debug)]
pub struct DemoArgs {
    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,

    /// Worker count ("auto" or a number)
    #[arg(short, long)]
    pub workers: Option<WorkerCount>,

    /// Parallel scope (method, class)
    #[arg(short, long)]
    pub scope: Option<ParallelScope>,

    /// Disable parallel execution
    #[arg(long)]
    pub serial: bool,

    /// Default per-case timeout in milliseconds (0 disables it)
    #[arg(short, long)]
    pub timeout_ms: Option<u64>,

    /// Append the diagnostic trace to captured output
    #[arg(long)]
    pub trace: bool,

    /// Treat cleanup warnings as failures
    #[arg(long)]
    pub strict_cleanup: bool,

    /// When class cleanup runs (end_of_module, end_of_class)
    #[arg(long)]
    pub class_cleanup: Option<ClassCleanupBehavior>,

    /// Run parameter as key=value (repeatable)
    #[arg(short, long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Also write the report to a file
    #[arg(short, long)]
    pub output: Option<String>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

/// Arguments for the config command
#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,

        /// Only show environment overrides
        #[arg(long)]
        env: bool,
    },

    /// Write an example configuration file
    Init {
        /// Output file path
        #[arg(default_value = "./unit-engine.yaml")]
        output: String,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        file: Option<String>,
    },
}
