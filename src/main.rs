//! unit-engine - Unit-Test Execution Engine
//!
//! Command-line front end for the `unit_engine` library.
//!
//! ## Usage
//!
//! ```bash
//! # Run the sample suite on four workers, one class per worker
//! unit-engine demo --workers 4 --scope class
//!
//! # Serial run with a default timeout and JSON output
//! unit-engine demo --serial --timeout-ms 500 --format json-pretty
//!
//! # Inspect or create configuration
//! unit-engine config show
//! unit-engine config init ./unit-engine.yaml
//! unit-engine env
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

mod cli;

use cli::{Args, Command, ConfigAction, DemoArgs};
use unit_engine::config::{print_env_help, ConfigFile, EnvConfig, RunConfig};
use unit_engine::demo::{sample_catalog, sample_descriptors};
use unit_engine::executor::Engine;
use unit_engine::output::{write_report_to_file, FormatterSink, ResultFormatter};
use unit_engine::utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env = EnvConfig::load();

    init_logger(LogLevel::resolve(args.verbose, env.log_level.as_deref()));

    match args.command {
        Command::Demo(demo_args) => {
            let config = effective_config(args.config.as_deref(), &env)?;
            run_demo(config, demo_args).await?;
        }
        Command::Config(config_args) => {
            manage_config(config_args.action, args.config.as_deref(), &env)?;
        }
        Command::Env => {
            print_env_help();
        }
    }

    Ok(())
}

/// Defaults, then the config file, then environment overrides
fn effective_config(explicit: Option<&str>, env: &EnvConfig) -> Result<RunConfig> {
    let file = ConfigFile::load_default(explicit.or(env.config_file.as_deref()))?;
    let mut config = file.run;
    env.apply(&mut config)?;
    Ok(config)
}

/// Command-line flags override everything else
fn apply_flags(config: &mut RunConfig, args: &DemoArgs) -> Result<()> {
    if let Some(workers) = args.workers {
        config.parallel.workers = workers;
    }
    if let Some(scope) = args.scope {
        config.parallel.scope = scope;
    }
    if args.serial {
        config.parallel.enabled = false;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.default_timeout_ms = Some(timeout_ms);
    }
    if args.trace {
        config.capture_trace = true;
    }
    if args.strict_cleanup {
        config.cleanup_warnings_as_failures = true;
    }
    if let Some(behavior) = args.class_cleanup {
        config.class_cleanup = behavior;
    }
    for param in &args.params {
        let (key, value) = parse_param(param)?;
        config.parameters.insert(key, value);
    }
    config.validate().context("Invalid run configuration")?;
    Ok(())
}

/// `key=value`; the value is read as JSON when it parses, else as a string
fn parse_param(param: &str) -> Result<(String, Value)> {
    let (key, raw) = param
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Invalid parameter '{param}': expected KEY=VALUE"))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Invalid parameter '{param}': empty key");
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

async fn run_demo(mut config: RunConfig, args: DemoArgs) -> Result<()> {
    apply_flags(&mut config, &args)?;
    debug!("Effective configuration: {:?}", config);

    let engine = Engine::new(Arc::new(sample_catalog()));
    let token = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling run");
            token.cancel();
        }
    });

    let mut formatter = ResultFormatter::new(args.format);
    if args.no_color {
        formatter = formatter.no_color();
    }
    let mut sink = FormatterSink::new(formatter, std::io::stdout());
    let report = engine.run(config, sample_descriptors(), &mut sink).await;

    if let Some(path) = &args.output {
        write_report_to_file(path, &report, args.format)
            .with_context(|| format!("Failed to write report to {path}"))?;
        info!("Report written to {}", path);
    }

    debug!("{}", report);
    Ok(())
}

fn manage_config(action: ConfigAction, explicit: Option<&str>, env: &EnvConfig) -> Result<()> {
    match action {
        ConfigAction::Init { output, force } => {
            let path = Path::new(&output);
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {output}. Use --force to overwrite."
                );
            }

            ConfigFile::example().save(path)?;
            println!("✓ Configuration file created: {output}");
            println!("\nEdit the file to customize your settings.");
        }

        ConfigAction::Show { format, env: env_only } => {
            if env_only {
                env.print_summary();
            } else {
                let config = ConfigFile {
                    run: effective_config(explicit, env)?,
                    ..ConfigFile::default()
                };
                let output = if format == "json" {
                    serde_json::to_string_pretty(&config)?
                } else {
                    serde_yaml::to_string(&config)?
                };
                println!("{output}");
            }
        }

        ConfigAction::Validate { file } => {
            let path = file
                .or_else(|| explicit.map(str::to_string))
                .or_else(|| ConfigFile::find().map(|p| p.to_string_lossy().to_string()))
                .unwrap_or_else(|| "./unit-engine.yaml".to_string());

            match ConfigFile::load(&path) {
                Ok(_) => {
                    println!("✓ Configuration file is valid: {path}");
                }
                Err(e) => {
                    println!("✗ Configuration file is invalid: {path}");
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use unit_engine::config::ParallelScope;

    fn demo_args(argv: &[&str]) -> DemoArgs {
        let mut full = vec!["unit-engine", "demo"];
        full.extend_from_slice(argv);
        match Args::parse_from(full).command {
            Command::Demo(args) => args,
            _ => panic!("Expected Demo command"),
        }
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("retries=2").unwrap(), ("retries".into(), Value::from(2)));
        assert_eq!(parse_param("env=prod").unwrap(), ("env".into(), Value::from("prod")));
        assert_eq!(parse_param("empty=").unwrap().1, Value::from(""));
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = RunConfig::default().with_parameter("env", "dev");
        let args = demo_args(&["--serial", "--scope", "class", "-t", "250", "-p", "env=prod"]);
        apply_flags(&mut config, &args).unwrap();

        assert!(!config.parallel.enabled);
        assert_eq!(config.parallel.scope, ParallelScope::Class);
        assert_eq!(config.default_timeout_ms, Some(250));
        assert_eq!(config.parameters["env"], Value::from("prod"));
    }
}
