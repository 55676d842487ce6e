//! Seam between the scheduler and the transport.

use std::path::Path;

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::outcome::FetchFailure;

/// Result of one fetch: bytes written to the final path.
pub type FetchResult = Result<u64, FetchFailure>;

/// Fetches one remote file to a local path.
///
/// Implementations must never leave a partially written file at `dest`: the
/// destination either keeps its previous content or holds the complete
/// transfer. They must return promptly with [`FetchFailure::Cancelled`] once
/// `cancel` fires.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        dest: &'a Path,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FetchResult>;
}
