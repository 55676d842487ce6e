//! Fetch engine.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Scheduler                            │
//! │  manifest order ──► decide() ──► Semaphore ──► JoinSet       │
//! │                                                   │          │
//! │                                                   ▼          │
//! │                                        Fetcher (HttpFetcher) │
//! │                       .tablefetch-*.part ──► persist(dest) │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                         BatchReport
//! ```
//!
//! - [`decide`] is the idempotence rule: matching size on disk means skip.
//! - [`HttpFetcher`] owns one transfer, including retries of transient
//!   failures and cleanup of its own in-progress file.
//! - [`Scheduler`] bounds concurrency and isolates per-record failures.
//! - [`plan`] runs the decisions alone, for dry runs.

mod decision;
mod http;
mod outcome;
mod plan;
mod scheduler;
mod traits;

pub use decision::{decide, Decision, FetchReason, LocalFileState};
pub use http::{new_part_file, ClientError, HttpFetcher, PART_SUFFIX, TEMP_PREFIX};
pub use outcome::{BatchReport, DownloadOutcome, FailedRecord, FetchFailure, FetchStatus};
pub use plan::{plan, Plan, PlannedRecord};
pub use scheduler::{OutcomeCallback, Scheduler};
pub use traits::{FetchResult, Fetcher};
