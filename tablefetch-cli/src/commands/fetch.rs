//! Fetch command - download every missing or incomplete manifest entry.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Args;
use console::style;
use tablefetch::{BatchReport, BatchRunner};
use tokio_util::sync::CancellationToken;

use super::common::{
    format_bytes, load_config, resolve_fetch_config, resolve_manifest_options, ManifestArgs,
    TransferArgs,
};
use crate::error::CliError;
use crate::progress::BatchProgress;

/// Arguments for the fetch command.
#[derive(Debug, Clone, Args)]
pub struct FetchArgs {
    #[command(flatten)]
    pub manifest: ManifestArgs,

    #[command(flatten)]
    pub transfer: TransferArgs,

    /// Write the batch report as JSON to this file
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// Run the fetch command.
///
/// Returns a failure exit code when any record failed, any manifest row was
/// rejected or the run was interrupted.
pub async fn run(args: FetchArgs, cancel: CancellationToken) -> Result<ExitCode, CliError> {
    let config = load_config(args.manifest.config.as_deref())?;
    let options = resolve_manifest_options(&args.manifest, &config)?;
    let fetch_config = resolve_fetch_config(&args.transfer, &config);

    let runner = BatchRunner::new(&args.manifest.input, &args.manifest.output_dir)
        .with_manifest_options(options)
        .with_config(fetch_config);
    let manifest = runner.read_manifest()?;

    println!("tablefetch v{}", tablefetch::VERSION);
    println!("Manifest:    {}", args.manifest.input.display());
    println!("Output:      {}", args.manifest.output_dir.display());
    println!("Records:     {}", manifest.records.len());
    println!("Concurrency: {}", runner.config().parallel_downloads);
    println!();

    let progress = BatchProgress::new(manifest.records.len(), !args.no_progress);
    let runner = runner.with_callback(progress.callback());
    let result = runner.run_manifest(manifest, cancel).await;
    progress.finish();
    let report = result?;

    print_report(&report);

    if let Some(path) = &args.report {
        write_report(path, &report)?;
        println!("Report written to {}", path.display());
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_report(report: &BatchReport) {
    println!("Summary");
    println!("-------");
    println!("  Completed:     {}", report.completed);
    println!("  Skipped:       {}", report.skipped);
    println!("  Failed:        {}", report.failure_count());
    if !report.not_attempted.is_empty() {
        println!("  Not attempted: {}", report.not_attempted.len());
    }
    if !report.row_errors.is_empty() {
        println!("  Rejected rows: {}", report.row_errors.len());
    }
    println!("  Downloaded:    {}", format_bytes(report.bytes_written));
    println!("  Elapsed:       {:.1}s", report.elapsed_secs);

    if report.has_failures() {
        println!();
        println!("{}", style("Failed downloads:").red().bold());
        for failed in &report.failed {
            println!(
                "  row {} {} [{}] {}",
                failed.record.row,
                failed.record.relative_path,
                failed.reason.kind(),
                failed.reason
            );
        }
    }

    if !report.row_errors.is_empty() {
        println!();
        println!("{}", style("Rejected manifest rows:").yellow().bold());
        for err in &report.row_errors {
            println!("  {}", err);
        }
    }

    println!();
    if report.cancelled {
        println!("{}", style("Interrupted; re-run to resume.").yellow());
    } else if report.is_success() {
        println!("{}", style("All files up to date.").green());
    } else {
        println!("{}", style("Finished with errors; re-run to retry.").red());
    }
}

fn write_report(path: &Path, report: &BatchReport) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| CliError::Io(format!("failed to encode report: {}", e)))?;
    std::fs::write(path, json)
        .map_err(|e| CliError::Io(format!("failed to write {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablefetch::fetch::{DownloadOutcome, FetchFailure};
    use tablefetch::ManifestRecord;
    use tempfile::TempDir;

    #[test]
    fn test_write_report_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        let mut report = BatchReport::new(1);
        report.record(DownloadOutcome::failed(
            ManifestRecord::new("a", "https://example.com/a", "a.bin", 3).at_row(1),
            FetchFailure::HttpStatus { code: 503 },
        ));

        write_report(&path, &report).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["total"], 1);
        assert_eq!(json["failed"][0]["reason"]["code"], 503);
    }
}
