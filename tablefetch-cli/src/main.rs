//! tablefetch CLI - Command-line interface
//!
//! Thin wrapper over the tablefetch library: argument parsing, settings
//! resolution, Ctrl+C handling and report output.

mod commands;
mod error;
mod progress;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use console::style;
use tablefetch::logging;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use commands::fetch::FetchArgs;
use commands::plan::PlanArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "tablefetch")]
#[command(version = tablefetch::VERSION)]
#[command(about = "Re-runnable batch downloader for files listed in a tabular manifest", long_about = None)]
struct Cli {
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download every missing or incomplete file listed in a manifest
    Fetch(FetchArgs),

    /// Show what fetch would do without downloading anything
    Plan(PlanArgs),
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Fetch(_) => "fetch",
            Commands::Plan(_) => "plan",
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match logging::init(cli.verbose, cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{} failed to initialize logging: {}", style("Error:").red().bold(), e);
            return ExitCode::from(74);
        }
    };

    info!(version = tablefetch::VERSION, command = cli.command.name(), "tablefetch starting");

    match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            debug!(error = ?e, "Command failed");
            eprintln!("{} {}", style("Error:").red().bold(), e);
            e.exit_code()
        }
    }
}

fn run(command: Commands) -> Result<ExitCode, CliError> {
    match command {
        Commands::Plan(args) => commands::plan::run(args),
        Commands::Fetch(args) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|e| CliError::Startup(format!("failed to start runtime: {}", e)))?;

            // Ctrl+C stops dispatch; in-flight transfers clean up and the
            // report still gets printed.
            let cancel = CancellationToken::new();
            let handler_token = cancel.clone();
            ctrlc::set_handler(move || {
                eprintln!();
                warn!("Received interrupt, stopping after in-flight transfers");
                handler_token.cancel();
            })
            .map_err(|e| CliError::Startup(format!("failed to set signal handler: {}", e)))?;

            runtime.block_on(commands::fetch::run(args, cancel))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_fetch() {
        let cli = Cli::try_parse_from([
            "tablefetch",
            "fetch",
            "-i",
            "manifest.tsv",
            "-o",
            "out",
            "-j",
            "8",
            "--retries",
            "5",
            "--skip-rows",
            "1",
            "--base-url",
            "https://www.encodeproject.org",
            "--report",
            "report.json",
            "-v",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Fetch(args) => {
                assert_eq!(args.manifest.input, PathBuf::from("manifest.tsv"));
                assert_eq!(args.manifest.output_dir, PathBuf::from("out"));
                assert_eq!(args.transfer.concurrency, Some(8));
                assert_eq!(args.transfer.retries, Some(5));
                assert_eq!(args.manifest.skip_rows, Some(1));
                assert_eq!(args.report, Some(PathBuf::from("report.json")));
                assert!(!args.no_progress);
            }
            other => panic!("expected fetch, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_plan() {
        let cli = Cli::try_parse_from([
            "tablefetch",
            "plan",
            "--input",
            "m.csv",
            "--output-dir",
            "out",
            "--delimiter",
            "comma",
            "--preset",
            "encode",
            "--all",
        ])
        .unwrap();

        match cli.command {
            Commands::Plan(args) => {
                assert!(args.all);
                assert_eq!(args.manifest.delimiter.as_deref(), Some("comma"));
                assert_eq!(args.manifest.preset.as_deref(), Some("encode"));
            }
            other => panic!("expected plan, got {:?}", other),
        }
    }

    #[test]
    fn test_command_names() {
        let fetch = Cli::try_parse_from(["tablefetch", "fetch", "-i", "m.tsv", "-o", "out"]).unwrap();
        let plan = Cli::try_parse_from(["tablefetch", "plan", "-i", "m.tsv", "-o", "out"]).unwrap();
        assert_eq!(fetch.command.name(), "fetch");
        assert_eq!(plan.command.name(), "plan");
    }

    #[test]
    fn test_fetch_requires_input() {
        assert!(Cli::try_parse_from(["tablefetch", "fetch", "-o", "out"]).is_err());
    }
}
