//! Skip/fetch decision.
//!
//! This is the whole idempotence contract: a file whose size on disk equals
//! the manifest's expected size is never fetched again. Everything else is.

use std::fs;
use std::path::Path;

use crate::manifest::ManifestRecord;

/// What the filesystem holds at a record's target path right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalFileState {
    pub exists: bool,
    pub size: u64,
}

impl LocalFileState {
    /// Nothing at the path.
    pub fn absent() -> Self {
        Self::default()
    }

    /// A regular file of the given size.
    pub fn present(size: u64) -> Self {
        Self { exists: true, size }
    }

    /// Stat the path.
    ///
    /// Anything that is not a readable regular file is reported as absent,
    /// which leads to a fetch; the fetch then surfaces the real problem.
    pub fn observe(path: &Path) -> Self {
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => Self::present(meta.len()),
            _ => Self::absent(),
        }
    }
}

/// Outcome of comparing a record against local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Skip,
    Fetch(FetchReason),
}

/// Why a record has to be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchReason {
    /// No file at the target path.
    Missing,
    /// A file exists with a different size (partial, truncated, or larger
    /// than expected).
    SizeMismatch { actual: u64 },
}

impl Decision {
    pub fn is_skip(&self) -> bool {
        matches!(self, Decision::Skip)
    }
}

/// Skip iff a file exists and its size equals the expected size.
pub fn decide(record: &ManifestRecord, local: &LocalFileState) -> Decision {
    if !local.exists {
        Decision::Fetch(FetchReason::Missing)
    } else if local.size == record.expected_size {
        Decision::Skip
    } else {
        Decision::Fetch(FetchReason::SizeMismatch { actual: local.size })
    }
}
