use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::integrity::{hashes_match, md5_sum, IntegrityError};
use crate::models::{ByteProgress, Verified, VerifiedBy};

/// Custom errors for download operations.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server answered {status} for {url}")]
    Status { url: String, status: StatusCode },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{} is corrupt after download (expected hash {expected:?}, got {actual})", path.display())]
    Integrity { path: PathBuf, expected: String, actual: String },
    #[error("download interrupted by the user")]
    Interrupted,
}

impl From<IntegrityError> for DownloadError {
    fn from(err: IntegrityError) -> Self {
        match err {
            IntegrityError::Io(e) => DownloadError::Io(e),
        }
    }
}

impl DownloadError {
    /// Network failures and server-side errors may succeed on another
    /// attempt; client errors like 404 won't.
    fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Network(_) => true,
            DownloadError::Status { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

/// Options shared by every transfer of a session.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub connect_timeout: Duration,
    /// Maximum time to wait between two reads of the response body.
    pub read_timeout: Duration,
    /// Granularity of writes, progress reports and cancellation checks.
    pub chunk_size: usize,
    /// Extra attempts after a network failure or a 5xx answer.
    pub retries: usize,
    pub user_agent: String,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(60),
            chunk_size: 8 * 1024,
            retries: 0,
            user_agent: format!("shard-patcher/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Streams remote files to disk and verifies them against an expected hash.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    options: DownloadOptions,
}

impl Downloader {
    /// Create a new downloader with provided options.
    pub fn new(options: DownloadOptions) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .user_agent(options.user_agent.clone())
            .connect_timeout(options.connect_timeout)
            .read_timeout(options.read_timeout)
            .build()?;
        Ok(Self { client, options })
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Makes sure `destination` holds content hashing to `expected_hash`.
    ///
    /// An existing file that already matches is accepted without touching the
    /// network. Otherwise the file is downloaded from scratch and re-hashed; on
    /// a mismatch the file is removed and [`DownloadError::Integrity`] returned.
    /// A cancelled transfer leaves the partial file in place.
    pub async fn fetch<F>(
        &self,
        url: &str,
        destination: &Path,
        expected_hash: &str,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<Verified, DownloadError>
    where
        F: FnMut(ByteProgress),
    {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if tokio::fs::try_exists(destination).await? {
            let current = md5_sum(destination).await?;
            if hashes_match(&current, expected_hash) {
                debug!(path = %destination.display(), "existing file already verified");
                return Ok(Verified { hash: expected_hash.to_string(), by: VerifiedBy::ExistingFile });
            }
            info!(
                path = %destination.display(),
                expected = expected_hash,
                actual = %current,
                "existing file is outdated or corrupt"
            );
        }

        let mut attempts = 0;
        let bytes = loop {
            match self.download_to(url, destination, cancel, &mut on_progress).await {
                Ok(bytes) => break bytes,
                Err(e) if e.is_retryable() && attempts < self.options.retries => {
                    attempts += 1;
                    warn!(url, attempt = attempts, error = %e, "download failed, retrying");
                }
                Err(e) => return Err(e),
            }
        };

        let actual = md5_sum(destination).await?;
        if !hashes_match(&actual, expected_hash) {
            warn!(
                path = %destination.display(),
                expected = expected_hash,
                actual = %actual,
                "downloaded file is corrupt, removing it"
            );
            tokio::fs::remove_file(destination).await?;
            return Err(DownloadError::Integrity {
                path: destination.to_path_buf(),
                expected: expected_hash.to_string(),
                actual,
            });
        }

        Ok(Verified { hash: expected_hash.to_string(), by: VerifiedBy::Downloaded { bytes } })
    }

    /// Streams `url` into `destination`, truncating whatever was there.
    /// Returns the number of bytes written.
    pub async fn download_to<F>(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<u64, DownloadError>
    where
        F: FnMut(ByteProgress),
    {
        let started = Instant::now();
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(DownloadError::Status { url: url.to_string(), status: resp.status() });
        }
        let total = resp.content_length().unwrap_or(0);
        debug!(url, total, "streaming response body");

        let mut file = File::create(destination).await?;
        let mut downloaded = 0u64;

        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk?;
            for piece in bytes.chunks(self.options.chunk_size.max(1)) {
                if cancel.is_cancelled() {
                    file.flush().await?;
                    return Err(DownloadError::Interrupted);
                }
                file.write_all(piece).await?;
                downloaded += piece.len() as u64;
                on_progress(ByteProgress { downloaded, total, elapsed: started.elapsed() });
            }
        }
        file.flush().await?;

        Ok(downloaded)
    }

    /// Declared size of a remote file, via a HEAD request.
    pub async fn remote_size(&self, url: &str) -> Result<u64, DownloadError> {
        let resp = self.client.head(url).send().await?;
        if !resp.status().is_success() {
            return Err(DownloadError::Status { url: url.to_string(), status: resp.status() });
        }
        let size = resp.headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        Ok(size)
    }
}
