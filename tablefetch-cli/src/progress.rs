//! Progress bar for batch runs.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tablefetch::fetch::{DownloadOutcome, FetchStatus, OutcomeCallback};

use crate::commands::common::format_bytes;

const TEMPLATE: &str =
    "  {spinner:.cyan} [{bar:30.cyan/dim}] {pos}/{len} files {msg} ({elapsed_precise})";

/// One tick per terminal outcome.
#[derive(Clone)]
pub struct BatchProgress {
    bar: ProgressBar,
}

impl BatchProgress {
    /// A visible bar for `total` records, or a hidden one.
    pub fn new(total: usize, enabled: bool) -> Self {
        if !enabled {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }

        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    pub fn observe(&self, outcome: &DownloadOutcome) {
        match &outcome.status {
            FetchStatus::Failed(reason) => {
                self.bar.println(format!(
                    "  {} {}: {}",
                    console::style("✗").red(),
                    outcome.record.relative_path,
                    reason
                ));
            }
            FetchStatus::Completed => {
                self.bar.set_message(format!(
                    "{} ({})",
                    outcome.record.relative_path,
                    format_bytes(outcome.bytes_written)
                ));
            }
            FetchStatus::Skipped => {}
        }
        self.bar.inc(1);
    }

    /// Callback handed to the scheduler.
    pub fn callback(&self) -> OutcomeCallback {
        let progress = self.clone();
        Arc::new(move |outcome: &DownloadOutcome| progress.observe(outcome))
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
