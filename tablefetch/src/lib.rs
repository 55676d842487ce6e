//! tablefetch - manifest-driven batch file downloader.
//!
//! Reads a delimited manifest of remote files, compares each entry with what
//! is already on disk, and fetches only what is missing or incomplete. Runs
//! are idempotent: a completed batch re-run fetches nothing.
//!
//! # Modules
//!
//! - [`manifest`]: parsing manifests into validated records
//! - [`fetch`]: skip decision, HTTP transfers, bounded-concurrency scheduler
//! - [`batch`]: the end-to-end pipeline used by the CLI
//! - [`config`]: engine settings and the INI config file
//! - [`logging`]: tracing subscriber setup

pub mod batch;
pub mod config;
pub mod fetch;
pub mod logging;
pub mod manifest;

pub use batch::{BatchError, BatchResult, BatchRunner};
pub use config::FetchConfig;
pub use fetch::BatchReport;
pub use manifest::{ManifestOptions, ManifestRecord};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
