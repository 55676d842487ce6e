//! Bounded-concurrency batch scheduler.
//!
//! Records are visited in manifest order. Each one is checked against the
//! local filesystem; up-to-date files are recorded as skipped on the spot,
//! the rest wait for a permit and are fetched on a worker task.
//!
//! ```text
//! records ──► observe + decide ──► Skip ──────────────────────┐
//!                    │                                        ▼
//!                    └──► Fetch ──► permit ──► JoinSet ──► BatchReport
//! ```
//!
//! Failures, including panics, stay confined to their record. Cancelling
//! the token stops dispatch; in-flight fetches observe the same token and
//! clean up after themselves.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::decision::{decide, Decision, LocalFileState};
use super::outcome::{BatchReport, DownloadOutcome, FetchFailure};
use super::traits::Fetcher;
use crate::manifest::ManifestRecord;

/// Observer invoked once per terminal outcome, in completion order.
pub type OutcomeCallback = Arc<dyn Fn(&DownloadOutcome) + Send + Sync>;

/// Runs a batch of records with at most `concurrency` fetches in flight.
pub struct Scheduler<F: Fetcher> {
    fetcher: Arc<F>,
    output_dir: PathBuf,
    concurrency: usize,
    on_outcome: Option<OutcomeCallback>,
}

impl<F: Fetcher> Scheduler<F> {
    /// Create a scheduler writing below `output_dir`.
    ///
    /// A concurrency of zero is treated as one.
    pub fn new(fetcher: Arc<F>, output_dir: impl Into<PathBuf>, concurrency: usize) -> Self {
        Self {
            fetcher,
            output_dir: output_dir.into(),
            concurrency: concurrency.max(1),
            on_outcome: None,
        }
    }

    /// Register an observer for terminal outcomes.
    pub fn with_callback<C>(mut self, callback: C) -> Self
    where
        C: Fn(&DownloadOutcome) + Send + Sync + 'static,
    {
        self.on_outcome = Some(Arc::new(callback));
        self
    }

    /// Register a shared observer.
    pub fn with_shared_callback(mut self, callback: OutcomeCallback) -> Self {
        self.on_outcome = Some(callback);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Final path of a record.
    pub fn destination(&self, record: &ManifestRecord) -> PathBuf {
        self.output_dir.join(&record.relative_path)
    }

    /// Process every record and return the aggregate report.
    ///
    /// Never fails as a whole: per-record problems end up in the report.
    pub async fn run(&self, records: Vec<ManifestRecord>, cancel: CancellationToken) -> BatchReport {
        let start = Instant::now();
        let mut report = BatchReport::new(records.len());
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<DownloadOutcome> = JoinSet::new();
        // Records owned by running tasks, so a task that dies still yields an outcome.
        let mut in_flight: HashMap<Id, ManifestRecord> = HashMap::new();
        let mut pending = records.into_iter();

        info!(
            total = report.total,
            concurrency = self.concurrency,
            output_dir = %self.output_dir.display(),
            "Starting batch"
        );

        while let Some(record) = pending.next() {
            if cancel.is_cancelled() {
                report.record_not_attempted(record);
                break;
            }

            let dest = self.destination(&record);
            match decide(&record, &LocalFileState::observe(&dest)) {
                Decision::Skip => {
                    debug!(row = record.row, path = %record.relative_path, "Up to date, skipping");
                    self.emit(&mut report, DownloadOutcome::skipped(record));
                    continue;
                }
                Decision::Fetch(reason) => {
                    debug!(row = record.row, path = %record.relative_path, ?reason, "Queued for fetch");
                }
            }

            // Keep collecting finished workers while waiting for a free slot.
            let permit = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break None,
                    Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                        self.collect(&mut report, &mut in_flight, joined);
                    }
                    permit = Arc::clone(&semaphore).acquire_owned() => break permit.ok(),
                }
            };

            let Some(permit) = permit else {
                report.record_not_attempted(record);
                break;
            };

            let fetcher = Arc::clone(&self.fetcher);
            let cancel = cancel.clone();
            let tracked = record.clone();
            let handle = tasks.spawn(async move {
                let _permit = permit;
                fetch_record(fetcher, record, dest, cancel).await
            });
            in_flight.insert(handle.id(), tracked);
        }

        for record in pending {
            report.record_not_attempted(record);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            self.collect(&mut report, &mut in_flight, joined);
        }

        report.cancelled = cancel.is_cancelled();
        report.finish(start.elapsed());

        info!(
            completed = report.completed,
            skipped = report.skipped,
            failed = report.failure_count(),
            not_attempted = report.not_attempted.len(),
            bytes = report.bytes_written,
            elapsed_secs = report.elapsed_secs,
            "Batch finished"
        );

        report
    }

    fn collect(
        &self,
        report: &mut BatchReport,
        in_flight: &mut HashMap<Id, ManifestRecord>,
        joined: Result<(Id, DownloadOutcome), JoinError>,
    ) {
        match joined {
            Ok((id, outcome)) => {
                in_flight.remove(&id);
                self.emit(report, outcome);
            }
            Err(e) => match in_flight.remove(&e.id()) {
                Some(record) => {
                    error!(row = record.row, url = %record.remote_url, error = %e, "Fetch task did not complete");
                    let reason = FetchFailure::WorkerPanicked {
                        message: e.to_string(),
                    };
                    self.emit(report, DownloadOutcome::failed(record, reason));
                }
                None => error!(error = %e, "Fetch task did not complete"),
            },
        }
    }

    fn emit(&self, report: &mut BatchReport, outcome: DownloadOutcome) {
        if let Some(callback) = &self.on_outcome {
            callback(&outcome);
        }
        report.record(outcome);
    }
}

async fn fetch_record<F: Fetcher>(
    fetcher: Arc<F>,
    record: ManifestRecord,
    dest: PathBuf,
    cancel: CancellationToken,
) -> DownloadOutcome {
    let result = AssertUnwindSafe(fetcher.fetch(&record.remote_url, &dest, &cancel))
        .catch_unwind()
        .await;

    match result {
        Ok(Ok(bytes)) => {
            info!(row = record.row, path = %record.relative_path, bytes, "Downloaded");
            DownloadOutcome::completed(record, bytes)
        }
        Ok(Err(reason)) => {
            warn!(
                row = record.row,
                url = %record.remote_url,
                kind = reason.kind(),
                error = %reason,
                "Fetch failed"
            );
            DownloadOutcome::failed(record, reason)
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(row = record.row, url = %record.remote_url, %message, "Fetch worker panicked");
            DownloadOutcome::failed(record, FetchFailure::WorkerPanicked { message })
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
