//! Per-record outcomes and the batch report.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::manifest::{ManifestRecord, RowError};

/// Why a single fetch failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchFailure {
    /// Connection, DNS, TLS or timeout failure before a response arrived.
    #[error("network error: {message}")]
    Network { message: String },

    /// The server answered with a non-success status.
    #[error("HTTP status {code}")]
    HttpStatus { code: u16 },

    /// The body ended before the full content arrived.
    #[error("transfer truncated after {received} bytes{}", expected_suffix(.expected))]
    Truncated {
        received: u64,
        expected: Option<u64>,
    },

    /// Creating, writing or renaming a local file failed.
    #[error("local I/O error on {}: {message}", .path.display())]
    LocalIo { path: PathBuf, message: String },

    /// The run was cancelled while this fetch was in flight.
    #[error("cancelled")]
    Cancelled,

    /// The fetch task panicked.
    #[error("worker panicked: {message}")]
    WorkerPanicked { message: String },
}

fn expected_suffix(expected: &Option<u64>) -> String {
    expected
        .map(|n| format!(" of {}", n))
        .unwrap_or_default()
}

impl FetchFailure {
    pub(crate) fn local_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::LocalIo {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Short tag for summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "NetworkError",
            Self::HttpStatus { .. } => "HttpStatusError",
            Self::Truncated { .. } => "TruncatedTransfer",
            Self::LocalIo { .. } => "LocalIoError",
            Self::Cancelled => "Cancelled",
            Self::WorkerPanicked { .. } => "WorkerPanicked",
        }
    }

    /// Transient network-layer failures are retried; everything else is
    /// left to the next run.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Truncated { .. })
    }
}

/// Terminal status of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    Skipped,
    Completed,
    Failed(FetchFailure),
}

/// Outcome of one record in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub record: ManifestRecord,
    pub status: FetchStatus,
    pub bytes_written: u64,
}

impl DownloadOutcome {
    pub fn skipped(record: ManifestRecord) -> Self {
        Self {
            record,
            status: FetchStatus::Skipped,
            bytes_written: 0,
        }
    }

    pub fn completed(record: ManifestRecord, bytes_written: u64) -> Self {
        Self {
            record,
            status: FetchStatus::Completed,
            bytes_written,
        }
    }

    pub fn failed(record: ManifestRecord, reason: FetchFailure) -> Self {
        Self {
            record,
            status: FetchStatus::Failed(reason),
            bytes_written: 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, FetchStatus::Failed(_))
    }
}

/// A failed record and its reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRecord {
    pub record: ManifestRecord,
    pub reason: FetchFailure,
}

/// Aggregate of one run.
///
/// Accumulation is order-independent; [`BatchReport::finish`] sorts the
/// failure list by manifest row so reports diff cleanly between runs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// Records handed to the scheduler.
    pub total: usize,
    pub skipped: usize,
    pub completed: usize,
    /// Bytes written by completed fetches.
    pub bytes_written: u64,
    pub failed: Vec<FailedRecord>,
    /// Records never dispatched because the run was cancelled.
    pub not_attempted: Vec<ManifestRecord>,
    /// Manifest rows rejected by the reader.
    pub row_errors: Vec<RowError>,
    pub cancelled: bool,
    pub elapsed_secs: f64,
}

impl BatchReport {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Fold one outcome into the report.
    pub fn record(&mut self, outcome: DownloadOutcome) {
        match outcome.status {
            FetchStatus::Skipped => self.skipped += 1,
            FetchStatus::Completed => {
                self.completed += 1;
                self.bytes_written += outcome.bytes_written;
            }
            FetchStatus::Failed(reason) => self.failed.push(FailedRecord {
                record: outcome.record,
                reason,
            }),
        }
    }

    pub fn record_not_attempted(&mut self, record: ManifestRecord) {
        self.not_attempted.push(record);
    }

    pub fn with_row_errors(mut self, row_errors: Vec<RowError>) -> Self {
        self.row_errors = row_errors;
        self
    }

    /// Sort failures by manifest row and stamp the elapsed time.
    pub fn finish(&mut self, elapsed: Duration) {
        self.failed.sort_by_key(|f| f.record.row);
        self.not_attempted.sort_by_key(|r| r.row);
        self.elapsed_secs = elapsed.as_secs_f64();
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Number of records with a terminal outcome.
    pub fn processed(&self) -> usize {
        self.skipped + self.completed + self.failed.len()
    }

    /// True when every record ended skipped or completed and every manifest
    /// row was valid.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
            && self.row_errors.is_empty()
            && self.not_attempted.is_empty()
            && !self.cancelled
    }
}
