//! Command-line driver running the conformance suite against a transport.
//!
//! A transport crate wires its factory in with a two-line binary:
//!
//! ```ignore
//! fn main() -> std::process::ExitCode {
//!     faultline_harness::driver::main_with(MyTransport::new())
//! }
//! ```

use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use faultline_core::config::HarnessConfig;
use faultline_core::tracing_setup::{CliLogLevel, init_tracing};
use faultline_core::transport::TransportFactory;

use crate::orchestrator::WorkerSettings;
use crate::suite::Suite;

/// Command-line options of a suite run.
#[derive(Debug, Parser)]
#[command(name = "faultline")]
#[command(about = "Runs the fault injection suite against a transport implementation")]
pub struct Cli {
    /// Console log level; the full trace is always written to logs/
    #[arg(short, long, value_enum, default_value_t = CliLogLevel::Warn)]
    pub log_level: CliLogLevel,

    /// Tolerate transport operations that are not implemented yet
    #[arg(short, long)]
    pub suppress_not_implemented: bool,

    /// List the selected scenarios without running them
    #[arg(long)]
    pub list: bool,

    /// Run only scenarios whose name contains one of these
    pub filters: Vec<String>,
}

impl Cli {
    /// Returns the settings every worker of the run receives.
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            log_level: self.log_level,
            suppress_not_implemented: self.suppress_not_implemented,
        }
    }
}

/// Parses the process arguments and runs the suite against `factory`.
pub fn main_with<F: TransportFactory + 'static>(factory: F) -> ExitCode {
    run(Cli::parse(), factory)
}

/// Runs the scenarios selected by `cli` one after another.
///
/// Returns failure if any selected scenario failed.
pub fn run<F: TransportFactory + 'static>(cli: Cli, factory: F) -> ExitCode {
    if cli.log_level == CliLogLevel::default() {
        eprintln!(
            "Logging at {} by default. Use -l info or -l debug to see what the roles are doing.",
            cli.log_level
        );
    }
    if let Err(e) = init_tracing(cli.log_level.as_tracing_level(), None) {
        eprintln!("Failed to initialize tracing: {e}");
    }

    let suite = Suite::new(factory, HarnessConfig::from_env());
    let selected = suite.select(&cli.filters);
    if selected.is_empty() {
        eprintln!("No scenario matches {}", cli.filters.join(", "));
        return ExitCode::FAILURE;
    }

    if cli.list {
        for scenario in &selected {
            println!(
                "{} (difficulty {}, {:.0}s)",
                scenario.name,
                scenario.difficulty,
                suite.timeout(scenario).as_secs_f64()
            );
        }
        return ExitCode::SUCCESS;
    }

    let settings = cli.worker_settings();
    let started = Instant::now();
    let mut failed = Vec::new();
    for scenario in &selected {
        match suite.run(scenario, &settings) {
            Ok(report) => {
                println!(
                    "scenario {} ... ok ({:.2}s)",
                    scenario.name,
                    report.elapsed.as_secs_f64()
                );
            }
            Err(e) => {
                tracing::error!(scenario = scenario.name, "scenario failed: {e}");
                println!("scenario {} ... FAILED", scenario.name);
                println!("{}", e.user_message());
                for worker in e.workers() {
                    println!("    {worker}");
                }
                failed.push(scenario.name);
            }
        }
    }

    println!(
        "\nresult: {}. {} passed; {} failed; finished in {:.2}s",
        if failed.is_empty() { "ok" } else { "FAILED" },
        selected.len() - failed.len(),
        failed.len(),
        started.elapsed().as_secs_f64()
    );
    if failed.is_empty() {
        ExitCode::SUCCESS
    } else {
        println!("failed scenarios:");
        for name in &failed {
            println!("    {name}");
        }
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["faultline"]).unwrap();
        assert_eq!(cli.log_level, CliLogLevel::Warn);
        assert!(!cli.suppress_not_implemented);
        assert!(!cli.list);
        assert!(cli.filters.is_empty());
    }

    #[test]
    fn test_flags_and_filters() {
        let cli = Cli::try_parse_from(["faultline", "-l", "debug", "-s", "window", "10_"]).unwrap();
        assert_eq!(cli.log_level, CliLogLevel::Debug);
        assert_eq!(cli.filters, vec!["window".to_string(), "10_".to_string()]);

        let settings = cli.worker_settings();
        assert_eq!(settings.log_level, CliLogLevel::Debug);
        assert!(settings.suppress_not_implemented);
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        assert!(Cli::try_parse_from(["faultline", "--log-level", "loud"]).is_err());
    }
}
