//! Downloads through the host session's own network stack.
//!
//! This is the fallback for servers that only answer requests carrying the
//! engine's full context (TLS session, client hints, cookies the snapshot
//! cannot see). The body is streamed into a temp file that is removed on
//! every terminal outcome: success, failure, or cancellation.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::AcceptProfile;
use super::client::parse_http_url;
use super::error::FetchError;
use crate::session::{BrowsingSession, NativeDownloadEvent, NativeDownloadStream, SessionError};

/// Progress of one native download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DownloadProgress {
    /// Bytes written so far.
    pub received: u64,
    /// Total size, when the server declared one.
    pub expected: Option<u64>,
}

impl DownloadProgress {
    /// Completed fraction in `0.0..=1.0`, when the total is known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        match self.expected {
            Some(0) | None => None,
            Some(total) => Some((self.received as f64 / total as f64).min(1.0)),
        }
    }
}

/// Callback invoked as native download bytes arrive.
pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// Streams a session download into a self-deleting temp file.
#[derive(Clone, Default)]
pub struct NativeSessionDownloader {
    temp_dir: Option<PathBuf>,
    progress: Option<ProgressCallback>,
}

impl fmt::Debug for NativeSessionDownloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeSessionDownloader")
            .field("temp_dir", &self.temp_dir)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl NativeSessionDownloader {
    /// Creates a downloader using the system temp directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Places temp artifacts in `dir` instead of the system temp directory.
    #[must_use]
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Reports progress to `callback`.
    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Downloads `url` through the session and returns the full body.
    ///
    /// The bytes are not validated here; callers run them through
    /// [`crate::sniff::is_pdf`].
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] when:
    /// - The URL is not an absolute http(s) URL
    /// - The temp artifact cannot be created, written or read back
    /// - The session refuses the download or reports a failure
    /// - `cancel` fires before the download completes
    #[instrument(skip(self, session, cancel), fields(url = %url))]
    pub async fn download(
        &self,
        session: &dyn BrowsingSession,
        url: &str,
        accept: AcceptProfile,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, FetchError> {
        parse_http_url(url)?;

        // Dropping `artifact` on any early return deletes the file.
        let artifact = self.create_artifact()?;
        let path = artifact.path().to_path_buf();
        debug!(temp = %path.display(), "native download started");

        let headers = vec![("Accept".to_string(), accept.header_value().to_string())];
        let stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(FetchError::cancelled(url)),
            started = session.native_download(url, &headers) => {
                started.map_err(|e| FetchError::session(url, e))?
            }
        };

        let handle = artifact.reopen().map_err(|e| FetchError::io(&path, e))?;
        let mut writer = BufWriter::new(File::from_std(handle));
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(FetchError::cancelled(url)),
            pumped = self.pump(url, stream, &mut writer, &path) => pumped?,
        };
        writer
            .flush()
            .await
            .map_err(|e| FetchError::io(&path, e))?;
        drop(writer);

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| FetchError::io(&path, e))?;
        if let Err(e) = artifact.close() {
            warn!(temp = %path.display(), error = %e, "failed to remove temp artifact");
        }

        debug!(bytes = bytes.len(), received, "native download finished");
        Ok(bytes)
    }

    fn create_artifact(&self) -> Result<NamedTempFile, FetchError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("capture-").suffix(".part");
        match &self.temp_dir {
            Some(dir) => builder
                .tempfile_in(dir)
                .map_err(|e| FetchError::io(dir, e)),
            None => builder
                .tempfile()
                .map_err(|e| FetchError::io(std::env::temp_dir(), e)),
        }
    }

    /// Writes stream chunks until the terminal event.
    async fn pump(
        &self,
        url: &str,
        mut stream: NativeDownloadStream,
        writer: &mut BufWriter<File>,
        path: &Path,
    ) -> Result<u64, FetchError> {
        let mut received: u64 = 0;
        let mut expected = None;

        while let Some(event) = stream.next().await {
            match event {
                NativeDownloadEvent::Started { expected_len } => {
                    expected = expected_len;
                    self.report(received, expected);
                }
                NativeDownloadEvent::Chunk(chunk) => {
                    writer
                        .write_all(&chunk)
                        .await
                        .map_err(|e| FetchError::io(path, e))?;
                    received += chunk.len() as u64;
                    self.report(received, expected);
                }
                NativeDownloadEvent::Finished => {
                    if expected.is_some_and(|total| total != received) {
                        debug!(received, expected, "native download length mismatch");
                    }
                    return Ok(received);
                }
                NativeDownloadEvent::Failed(message) => {
                    return Err(transport_failure(url, message));
                }
            }
        }

        Err(transport_failure(
            url,
            "download stream ended before completion".to_string(),
        ))
    }

    fn report(&self, received: u64, expected: Option<u64>) {
        if let Some(callback) = &self.progress {
            callback(DownloadProgress { received, expected });
        }
    }
}

fn transport_failure(url: &str, message: String) -> FetchError {
    FetchError::session(
        url,
        SessionError::Transport {
            url: url.to_string(),
            message,
        },
    )
}
