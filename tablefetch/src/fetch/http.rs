//! HTTP-based file fetcher.
//!
//! Each transfer streams the response body into a hidden temporary file in
//! the destination's directory and persists it over the destination only
//! once the whole body has been written and synced. The temporary name
//! carries a random suffix, so it never collides with another record's path,
//! and a failed attempt only ever removes the file it created itself.

use std::error::Error as _;
use std::io;
use std::path::Path;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response};
use tempfile::{NamedTempFile, TempPath};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::outcome::FetchFailure;
use super::traits::{FetchResult, Fetcher};
use crate::config::FetchConfig;

/// Prefix of in-progress files.
pub const TEMP_PREFIX: &str = ".tablefetch-";

/// Suffix of in-progress files.
pub const PART_SUFFIX: &str = ".part";

/// Buffer size for writing downloads (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Errors building the HTTP client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid auth header name '{0}'")]
    InvalidHeaderName(String),

    #[error("access token is not a valid header value")]
    InvalidToken,

    #[error("failed to create HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Fetches files over HTTP(S) with bounded retries for transient failures.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpFetcher {
    /// Build a fetcher from configuration.
    ///
    /// When an access token is configured it is attached to every request;
    /// on the `Authorization` header it is sent as a bearer token, on any
    /// other header verbatim.
    pub fn new(config: &FetchConfig) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.access_token {
            let name = HeaderName::from_bytes(config.auth_header.as_bytes())
                .map_err(|_| ClientError::InvalidHeaderName(config.auth_header.clone()))?;
            let value = if name == AUTHORIZATION {
                format!("Bearer {}", token)
            } else {
                token.clone()
            };
            let mut value = HeaderValue::from_str(&value).map_err(|_| ClientError::InvalidToken)?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.timeout)
            .default_headers(headers)
            .user_agent(concat!("tablefetch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
        })
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Fetch `url` into `dest`, retrying transient failures.
    pub async fn fetch_to(&self, url: &str, dest: &Path, cancel: &CancellationToken) -> FetchResult {
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)
            .await
            .map_err(|e| FetchFailure::local_io(dir, e))?;

        let mut attempt = 0;

        loop {
            match self.fetch_once(url, dest, dir, cancel).await {
                Err(failure) if failure.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        url,
                        attempt,
                        max_retries = self.max_retries,
                        error = %failure,
                        "Transient failure, retrying"
                    );
                    if !self.retry_delay.is_zero() {
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(FetchFailure::Cancelled),
                            _ = tokio::time::sleep(self.retry_delay) => {}
                        }
                    }
                }
                result => return result,
            }
        }
    }

    async fn fetch_once(
        &self,
        url: &str,
        dest: &Path,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> FetchResult {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchFailure::Cancelled),
            response = self.client.get(url).send() => response.map_err(network_failure)?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::HttpStatus {
                code: status.as_u16(),
            });
        }

        let part = new_part_file(dir).map_err(|e| FetchFailure::local_io(dir, e))?;
        let (file, part_path) = part.into_parts();

        // Dropping `part_path` on any early return deletes the partial file.
        let written = stream_body(url, response, File::from_std(file), &part_path, cancel).await?;

        part_path
            .persist(dest)
            .map_err(|e| FetchFailure::local_io(dest, e.error))?;

        debug!(url, dest = %dest.display(), bytes = written, "Transfer finalized");
        Ok(written)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        dest: &'a Path,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FetchResult> {
        self.fetch_to(url, dest, cancel).boxed()
    }
}

/// Create a fresh in-progress file in `dir`: `.tablefetch-<random>.part`.
pub fn new_part_file(dir: &Path) -> io::Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(TEMP_PREFIX).suffix(PART_SUFFIX);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o644));
    }
    builder.tempfile_in(dir)
}

async fn stream_body(
    url: &str,
    response: Response,
    file: File,
    part: &TempPath,
    cancel: &CancellationToken,
) -> FetchResult {
    let expected = response.content_length();
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, file);
    let mut stream = response.bytes_stream();
    let mut received: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchFailure::Cancelled),
            next = stream.next() => next,
        };

        match next {
            None => break,
            Some(Ok(chunk)) => {
                writer
                    .write_all(&chunk)
                    .await
                    .map_err(|e| FetchFailure::local_io(part.to_path_buf(), e))?;
                received += chunk.len() as u64;
            }
            Some(Err(err)) => {
                debug!(url, received, error = %error_chain(&err), "Body stream failed");
                return Err(FetchFailure::Truncated { received, expected });
            }
        }
    }

    writer
        .flush()
        .await
        .map_err(|e| FetchFailure::local_io(part.to_path_buf(), e))?;
    writer
        .into_inner()
        .sync_all()
        .await
        .map_err(|e| FetchFailure::local_io(part.to_path_buf(), e))?;

    match expected {
        Some(expected) if expected != received => Err(FetchFailure::Truncated {
            received,
            expected: Some(expected),
        }),
        _ => Ok(received),
    }
}

fn network_failure(err: reqwest::Error) -> FetchFailure {
    FetchFailure::Network {
        message: error_chain(&err),
    }
}

/// reqwest's top-level message omits the cause (refused, reset, timed out).
fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn fetcher(config: FetchConfig) -> HttpFetcher {
        HttpFetcher::new(&config).unwrap()
    }

    /// Serve a fixed raw HTTP response on every connection, optionally
    /// keeping the connection open afterwards.
    async fn serve_raw(response: Vec<u8>, hold_open: bool) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let response = response.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let _ = socket.write_all(&response).await;
                    let _ = socket.flush().await;
                    if hold_open {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }
                });
            }
        });

        (format!("http://{}/file.bin", addr), hits)
    }

    /// Accept connections and close them without answering.
    async fn serve_and_drop() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                drop(socket);
            }
        });

        (format!("http://{}/file.bin", addr), hits)
    }

    /// In-progress files left behind in `dir`.
    fn leftover_parts(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(TEMP_PREFIX))
            .collect()
    }

    fn truncated_response(declared: usize, sent: usize) -> Vec<u8> {
        let mut response = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", declared)
            .into_bytes();
        response.extend(std::iter::repeat(b'x').take(sent));
        response
    }

    #[test]
    fn test_part_files_are_hidden_and_unique() {
        let dir = TempDir::new().unwrap();
        let first = new_part_file(dir.path()).unwrap();
        let second = new_part_file(dir.path()).unwrap();

        for part in [&first, &second] {
            let name = part.path().file_name().unwrap().to_string_lossy().into_owned();
            assert!(name.starts_with(TEMP_PREFIX), "{}", name);
            assert!(name.ends_with(PART_SUFFIX), "{}", name);
            assert_eq!(part.path().parent(), Some(dir.path()));
        }
        assert_ne!(first.path(), second.path());
        assert_eq!(leftover_parts(dir.path()).len(), 2);

        drop(first);
        drop(second);
        assert!(leftover_parts(dir.path()).is_empty());
    }

    #[test]
    fn test_invalid_auth_header_rejected() {
        let config = FetchConfig::new()
            .with_access_token("t")
            .with_auth_header("bad header");
        assert!(matches!(
            HttpFetcher::new(&config),
            Err(ClientError::InvalidHeaderName(_))
        ));
    }

    #[test]
    fn test_invalid_token_rejected() {
        let config = FetchConfig::new().with_access_token("line\nbreak");
        assert!(matches!(
            HttpFetcher::new(&config),
            Err(ClientError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_fetch_writes_file_atomically() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/data.bin")
            .with_status(200)
            .with_body("hello world")
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("nested/dir/data.bin");

        let written = fetcher(FetchConfig::new())
            .fetch_to(
                &format!("{}/data.bin", server.url()),
                &dest,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(written, 11);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello world");
        assert!(leftover_parts(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_http_error_status_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing.bin")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("missing.bin");

        let result = fetcher(FetchConfig::new().with_max_retries(3))
            .fetch_to(
                &format!("{}/missing.bin", server.url()),
                &dest,
                &CancellationToken::new(),
            )
            .await;

        mock.assert_async().await;
        assert_eq!(result, Err(FetchFailure::HttpStatus { code: 404 }));
        assert!(!dest.exists());
        assert!(leftover_parts(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_failed_refetch_keeps_previous_file() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/data.bin")
            .with_status(500)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("data.bin");
        std::fs::write(&dest, b"old").unwrap();

        let result = fetcher(FetchConfig::new())
            .fetch_to(
                &format!("{}/data.bin", server.url()),
                &dest,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result, Err(FetchFailure::HttpStatus { code: 500 }));
        assert_eq!(std::fs::read(&dest).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_sibling_part_named_file_alone() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/x")
            .with_status(404)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("x");
        let neighbour = dir.path().join("x.part");
        std::fs::write(&neighbour, b"abc").unwrap();

        let result = fetcher(FetchConfig::new())
            .fetch_to(
                &format!("{}/x", server.url()),
                &dest,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result, Err(FetchFailure::HttpStatus { code: 404 }));
        assert_eq!(std::fs::read(&neighbour).unwrap(), b"abc");
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_dropped_connection_retried_as_network_error() {
        let (url, hits) = serve_and_drop().await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("file.bin");

        let result = fetcher(FetchConfig::new().with_max_retries(2))
            .fetch_to(&url, &dest, &CancellationToken::new())
            .await;

        assert!(
            matches!(result, Err(FetchFailure::Network { .. })),
            "unexpected result: {:?}",
            result
        );
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(!dest.exists());
        assert!(leftover_parts(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_bearer_token_attached() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/secure.bin")
            .match_header("authorization", "Bearer s3cret")
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();

        let result = fetcher(FetchConfig::new().with_access_token("s3cret"))
            .fetch_to(
                &format!("{}/secure.bin", server.url()),
                &dir.path().join("secure.bin"),
                &CancellationToken::new(),
            )
            .await;

        mock.assert_async().await;
        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn test_custom_auth_header_sent_verbatim() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/secure.bin")
            .match_header("x-api-key", "k3y")
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();

        let config = FetchConfig::new()
            .with_access_token("k3y")
            .with_auth_header("X-Api-Key");
        let result = fetcher(config)
            .fetch_to(
                &format!("{}/secure.bin", server.url()),
                &dir.path().join("secure.bin"),
                &CancellationToken::new(),
            )
            .await;

        mock.assert_async().await;
        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn test_truncated_transfer_retried_then_cleaned_up() {
        let (url, hits) = serve_raw(truncated_response(100, 10), false).await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("file.bin");

        let result = fetcher(FetchConfig::new().with_max_retries(2))
            .fetch_to(&url, &dest, &CancellationToken::new())
            .await;

        match result {
            Err(FetchFailure::Truncated { received, expected }) => {
                assert!(received <= 10);
                assert_eq!(expected, Some(100));
            }
            other => panic!("expected truncated transfer, got {:?}", other),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(!dest.exists());
        assert!(leftover_parts(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("file.bin");

        let result = fetcher(FetchConfig::new().with_max_retries(1))
            .fetch_to(
                &format!("http://{}/file.bin", addr),
                &dest,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(FetchFailure::Network { .. })));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_cancellation_removes_partial_file() {
        let (url, _hits) = serve_raw(truncated_response(1_000_000, 1024), true).await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("file.bin");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let result = fetcher(FetchConfig::new())
            .fetch_to(&url, &dest, &cancel)
            .await;

        assert_eq!(result, Err(FetchFailure::Cancelled));
        assert!(!dest.exists());
        assert!(leftover_parts(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_stalled_transfer_times_out() {
        let (url, _hits) = serve_raw(truncated_response(1_000_000, 16), true).await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("file.bin");

        let config = FetchConfig::new().with_timeout_secs(1).with_max_retries(0);
        let result = fetcher(config)
            .fetch_to(&url, &dest, &CancellationToken::new())
            .await;

        let failure = result.unwrap_err();
        assert!(failure.is_retryable(), "unexpected failure: {:?}", failure);
        assert!(!dest.exists());
        assert!(leftover_parts(dir.path()).is_empty());
    }
}
