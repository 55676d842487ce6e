//! End-to-end batch: read a manifest, prepare the output directory, fetch.
//!
//! Problems that make the whole batch pointless (unreadable manifest,
//! unusable output directory, bad client settings) are returned as
//! [`BatchError`] before anything is fetched. Everything else ends up in
//! the [`BatchReport`].

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::FetchConfig;
use crate::fetch::{self, BatchReport, ClientError, HttpFetcher, OutcomeCallback, Plan, Scheduler};
use crate::manifest::{Manifest, ManifestError, ManifestOptions, ManifestReader};

/// Result type for batch operations.
pub type BatchResult<T> = Result<T, BatchError>;

/// Errors that abort a batch before any fetch.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("failed to create output directory {}: {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("output path {} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// One batch: a manifest file, an output directory and the settings for both.
pub struct BatchRunner {
    manifest_path: PathBuf,
    output_dir: PathBuf,
    options: ManifestOptions,
    config: FetchConfig,
    on_outcome: Option<OutcomeCallback>,
}

impl BatchRunner {
    pub fn new(manifest_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            output_dir: output_dir.into(),
            options: ManifestOptions::default(),
            config: FetchConfig::default(),
            on_outcome: None,
        }
    }

    pub fn with_manifest_options(mut self, options: ManifestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_config(mut self, config: FetchConfig) -> Self {
        self.config = config;
        self
    }

    /// Observer for every terminal outcome.
    pub fn with_callback(mut self, callback: OutcomeCallback) -> Self {
        self.on_outcome = Some(callback);
        self
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Parse the manifest, logging every rejected row.
    pub fn read_manifest(&self) -> BatchResult<Manifest> {
        let manifest = ManifestReader::new(self.options.clone()).read_path(&self.manifest_path)?;

        for err in &manifest.row_errors {
            warn!(row = err.row, line = ?err.line, error = %err.kind, "Rejected manifest row");
        }
        info!(
            path = %self.manifest_path.display(),
            records = manifest.records.len(),
            rejected = manifest.row_errors.len(),
            "Manifest loaded"
        );

        Ok(manifest)
    }

    /// Decide every record against the output directory without fetching.
    pub fn plan(&self, manifest: &Manifest) -> Plan {
        fetch::plan(&manifest.records, &self.output_dir)
    }

    /// Read the manifest and run it.
    pub async fn run(&self, cancel: CancellationToken) -> BatchResult<BatchReport> {
        let manifest = self.read_manifest()?;
        self.run_manifest(manifest, cancel).await
    }

    /// Run an already parsed manifest. Its row errors are carried into the
    /// report.
    pub async fn run_manifest(
        &self,
        manifest: Manifest,
        cancel: CancellationToken,
    ) -> BatchResult<BatchReport> {
        self.prepare_output_dir().await?;
        let fetcher = HttpFetcher::new(&self.config)?;

        let mut scheduler = Scheduler::new(
            Arc::new(fetcher),
            self.output_dir.clone(),
            self.config.parallel_downloads,
        );
        if let Some(callback) = &self.on_outcome {
            scheduler = scheduler.with_shared_callback(Arc::clone(callback));
        }

        let Manifest {
            records,
            row_errors,
        } = manifest;
        let report = scheduler.run(records, cancel).await;

        Ok(report.with_row_errors(row_errors))
    }

    async fn prepare_output_dir(&self) -> BatchResult<()> {
        match tokio::fs::metadata(&self.output_dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(BatchError::NotADirectory(self.output_dir.clone())),
            Err(_) => tokio::fs::create_dir_all(&self.output_dir)
                .await
                .map_err(|source| BatchError::OutputDir {
                    path: self.output_dir.clone(),
                    source,
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_manifest(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("manifest.tsv");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_read_manifest_keeps_row_errors() {
        let dir = TempDir::new().unwrap();
        let manifest = write_manifest(
            dir.path(),
            "ID\tDownload URL\tPath\tFile size\n\
             a\thttps://example.com/a\ta.bin\t3\n\
             b\thttps://example.com/b\tb.bin\tlots\n",
        );

        let parsed = BatchRunner::new(manifest, dir.path().join("out"))
            .read_manifest()
            .unwrap();

        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.row_errors.len(), 1);
    }

    #[test]
    fn test_missing_manifest_is_fatal() {
        let dir = TempDir::new().unwrap();

        let result = BatchRunner::new(dir.path().join("nope.tsv"), dir.path()).read_manifest();

        assert!(matches!(result, Err(BatchError::Manifest(_))));
    }

    #[tokio::test]
    async fn test_output_path_that_is_a_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let manifest = write_manifest(dir.path(), "ID\tDownload URL\tPath\tFile size\n");
        let blocker = dir.path().join("out");
        std::fs::write(&blocker, b"").unwrap();

        let result = BatchRunner::new(manifest, &blocker)
            .run(CancellationToken::new())
            .await;

        assert!(matches!(result, Err(BatchError::NotADirectory(_))));
    }

    #[tokio::test]
    async fn test_empty_manifest_creates_output_dir() {
        let dir = TempDir::new().unwrap();
        let manifest = write_manifest(dir.path(), "ID\tDownload URL\tPath\tFile size\n");
        let out = dir.path().join("nested/out");

        let report = BatchRunner::new(manifest, &out)
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert!(out.is_dir());
        assert_eq!(report.total, 0);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_invalid_auth_header_is_fatal() {
        let dir = TempDir::new().unwrap();
        let manifest = write_manifest(dir.path(), "ID\tDownload URL\tPath\tFile size\n");
        let config = FetchConfig::new()
            .with_access_token("t")
            .with_auth_header("not valid");

        let result = BatchRunner::new(manifest, dir.path().join("out"))
            .with_config(config)
            .run(CancellationToken::new())
            .await;

        assert!(matches!(result, Err(BatchError::Client(_))));
    }
}
