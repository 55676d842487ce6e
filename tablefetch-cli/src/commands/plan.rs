//! Plan command - show what a fetch would do, without network access.

use std::process::ExitCode;

use clap::Args;
use console::style;
use tablefetch::fetch::{Decision, FetchReason};
use tablefetch::BatchRunner;

use super::common::{format_bytes, load_config, resolve_manifest_options, ManifestArgs};
use crate::error::CliError;

/// Arguments for the plan command.
#[derive(Debug, Clone, Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub manifest: ManifestArgs,

    /// Also list files that are already up to date
    #[arg(long)]
    pub all: bool,
}

/// Run the plan command. Fails when the manifest has rejected rows.
pub fn run(args: PlanArgs) -> Result<ExitCode, CliError> {
    let config = load_config(args.manifest.config.as_deref())?;
    let options = resolve_manifest_options(&args.manifest, &config)?;

    let runner = BatchRunner::new(&args.manifest.input, &args.manifest.output_dir)
        .with_manifest_options(options);
    let manifest = runner.read_manifest()?;
    let plan = runner.plan(&manifest);

    for entry in &plan.entries {
        let path = &entry.record.relative_path;
        match entry.decision {
            Decision::Skip if args.all => println!("  skip   {}", path),
            Decision::Skip => {}
            Decision::Fetch(FetchReason::Missing) => println!(
                "  {}  {} ({})",
                style("fetch").cyan(),
                path,
                format_bytes(entry.record.expected_size)
            ),
            Decision::Fetch(FetchReason::SizeMismatch { actual }) => println!(
                "  {}  {} (have {}, expected {})",
                style("fetch").yellow(),
                path,
                actual,
                entry.record.expected_size
            ),
        }
    }

    for err in &manifest.row_errors {
        println!("  {} {}", style("reject").red(), err);
    }

    println!();
    println!(
        "{} to fetch ({}), {} up to date, {} rejected",
        plan.fetch_count(),
        format_bytes(plan.bytes_to_fetch()),
        plan.skip_count(),
        manifest.row_errors.len()
    );

    Ok(if manifest.has_row_errors() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
