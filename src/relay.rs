//! Download/upload/cleanup pipeline for one resolved file.
//!
//! `relay()` owns the whole lifecycle of a transfer: it streams the remote
//! resource into a staging file, hands the finished file to an upload sink,
//! and removes the staging file on every exit path. Progress is reported
//! through a callback seam at a bounded rate so the status channel is never
//! rate-limited by chunk traffic.

use crate::config::PROGRESS_INTERVAL_BYTES;
use crate::resolver::FileDescriptor;
use crate::utils::format_size;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client as HttpClient;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Phase of an active transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// Descriptor produced, nothing transferred yet
    Resolving,
    /// Streaming the remote resource to the staging file
    Downloading,
    /// Re-uploading the staging file through the sink
    Uploading,
    /// Removing the staging file
    Cleaning,
    /// Transfer finished successfully
    Done,
    /// Transfer failed; staging file already cleaned up
    Failed,
}

/// Ephemeral state of one relay invocation. Never shared across transfers.
#[derive(Debug)]
struct TransferState {
    phase: TransferPhase,
    bytes_transferred: u64,
}

impl TransferState {
    const fn new() -> Self {
        Self {
            phase: TransferPhase::Resolving,
            bytes_transferred: 0,
        }
    }
}

/// Errors produced by the relay pipeline.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Advertised size exceeds the configured maximum; rejected before any I/O
    #[error("File too large: {size_bytes} bytes exceeds the limit of {max_bytes} bytes")]
    TooLarge {
        /// Advertised size of the rejected file
        size_bytes: u64,
        /// Configured maximum
        max_bytes: u64,
    },
    /// Transport or filesystem failure while streaming the download
    #[error("Download failed: {0}")]
    DownloadFailed(String),
    /// The sink failed to deliver the staged file
    #[error("Upload failed: {0}")]
    UploadFailed(String),
}

/// Result of a successful relay.
#[derive(Debug, Clone)]
pub struct RelayOutcome {
    /// Exact number of bytes written to (and read back from) staging
    pub bytes_transferred: u64,
    /// Caption the file was delivered with
    pub caption: String,
}

/// Destination for the staged file.
#[async_trait]
pub trait UploadSink: Send + Sync {
    /// Deliver the staging file under `filename` with `caption`.
    async fn upload(&self, filename: &str, path: &Path, caption: &str) -> anyhow::Result<()>;
}

/// Receiver for throttled transfer progress.
///
/// Implementations must be non-blocking or bounded-latency; a stalled
/// reporter would stall the transfer loop.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// Called at most once per [`PROGRESS_INTERVAL_BYTES`] transferred,
    /// plus once when a phase completes. `total_bytes` is 0 when unknown.
    async fn report(&self, phase: TransferPhase, bytes_transferred: u64, total_bytes: u64);
}

/// Streams one resolved file through local staging to an upload sink.
///
/// Holds only read-only configuration; invocations share nothing, so any
/// number of relays may run concurrently.
pub struct RelayPipeline {
    http: HttpClient,
    staging_dir: PathBuf,
    max_file_size: u64,
}

impl RelayPipeline {
    /// Create a pipeline writing staging files under `staging_dir`.
    #[must_use]
    pub fn new(staging_dir: impl Into<PathBuf>, max_file_size: u64) -> Self {
        Self {
            http: HttpClient::new(),
            staging_dir: staging_dir.into(),
            max_file_size,
        }
    }

    /// Relay one descriptor: download to staging, upload through `sink`,
    /// remove the staging file.
    ///
    /// The staging file never survives this call, success or failure; a
    /// removal failure is logged and swallowed so it cannot mask the
    /// primary outcome.
    ///
    /// # Errors
    ///
    /// [`RelayError::TooLarge`] before any I/O when the advertised size
    /// exceeds the configured maximum; [`RelayError::DownloadFailed`] /
    /// [`RelayError::UploadFailed`] for mid-transfer failures.
    pub async fn relay(
        &self,
        descriptor: &FileDescriptor,
        progress: &dyn ProgressReporter,
        sink: &dyn UploadSink,
    ) -> Result<RelayOutcome, RelayError> {
        if descriptor.size_bytes > self.max_file_size {
            return Err(RelayError::TooLarge {
                size_bytes: descriptor.size_bytes,
                max_bytes: self.max_file_size,
            });
        }

        let mut state = TransferState::new();
        let mut staging = StagingFile::create(&self.staging_dir, &descriptor.filename)
            .await
            .map_err(|e| RelayError::DownloadFailed(e.to_string()))?;

        state.phase = TransferPhase::Downloading;
        match self
            .download(descriptor, staging.path(), &mut state, progress)
            .await
        {
            Ok(()) => {}
            Err(e) => {
                state.phase = TransferPhase::Failed;
                staging.cleanup().await;
                return Err(e);
            }
        }

        state.phase = TransferPhase::Uploading;
        progress
            .report(state.phase, state.bytes_transferred, state.bytes_transferred)
            .await;

        // Caption reflects what was actually written, not the advertised
        // size, which may be absent or wrong.
        let caption = format!(
            "{} ({})",
            descriptor.filename,
            format_size(state.bytes_transferred)
        );

        if let Err(e) = sink
            .upload(&descriptor.filename, staging.path(), &caption)
            .await
        {
            state.phase = TransferPhase::Failed;
            staging.cleanup().await;
            return Err(RelayError::UploadFailed(e.to_string()));
        }

        state.phase = TransferPhase::Cleaning;
        staging.cleanup().await;

        state.phase = TransferPhase::Done;
        info!(
            filename = %descriptor.filename,
            bytes = state.bytes_transferred,
            "Relay completed"
        );
        Ok(RelayOutcome {
            bytes_transferred: state.bytes_transferred,
            caption,
        })
    }

    /// Stream the remote resource into the staging file chunk by chunk,
    /// never buffering the whole file in memory.
    async fn download(
        &self,
        descriptor: &FileDescriptor,
        path: &Path,
        state: &mut TransferState,
        progress: &dyn ProgressReporter,
    ) -> Result<(), RelayError> {
        let response = self
            .http
            .get(&descriptor.direct_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| RelayError::DownloadFailed(e.to_string()))?;

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| RelayError::DownloadFailed(e.to_string()))?;

        let mut stream = response.bytes_stream();
        let mut last_reported = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| RelayError::DownloadFailed(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| RelayError::DownloadFailed(e.to_string()))?;
            state.bytes_transferred += chunk.len() as u64;

            if state.bytes_transferred - last_reported >= PROGRESS_INTERVAL_BYTES {
                progress
                    .report(
                        TransferPhase::Downloading,
                        state.bytes_transferred,
                        descriptor.size_bytes,
                    )
                    .await;
                last_reported = state.bytes_transferred;
            }
        }

        // The staging file must be complete and flushed before the sink
        // reads it back.
        file.flush()
            .await
            .map_err(|e| RelayError::DownloadFailed(e.to_string()))?;

        progress
            .report(
                TransferPhase::Downloading,
                state.bytes_transferred,
                descriptor.size_bytes,
            )
            .await;
        debug!(
            filename = %descriptor.filename,
            bytes = state.bytes_transferred,
            "Download finished"
        );
        Ok(())
    }
}

/// Staging file with guaranteed removal.
///
/// `cleanup()` is called explicitly on every pipeline exit path; the `Drop`
/// impl is the backstop for cancellation and panics, so no partial file is
/// left behind when the surrounding task unwinds.
struct StagingFile {
    path: PathBuf,
    removed: bool,
}

impl StagingFile {
    /// Reserve a unique staging path for `filename` under `dir`.
    ///
    /// The filename is sanitized against path traversal and prefixed with a
    /// fresh UUID so concurrent relays of files sharing a name never collide.
    async fn create(dir: &Path, filename: &str) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let unique = format!(
            "{}.{}",
            Uuid::new_v4().as_simple(),
            sanitize_filename(filename)
        );
        Ok(Self {
            path: dir.join(unique),
            removed: false,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the staging file. Failures are logged, never escalated.
    async fn cleanup(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), "Could not delete staging file: {e}"),
        }
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), "Could not delete staging file: {e}"),
        }
    }
}

/// Strip path separators and traversal sequences from a resolver-supplied
/// filename so it is safe to join onto the staging directory.
#[must_use]
pub fn sanitize_filename(filename: &str) -> String {
    // Keep only the final path component, then drop NUL and wrapping dots
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let cleaned: String = base.chars().filter(|c| *c != '\0').collect();
    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename_strips_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("a/b\\c"), "c");
        assert_eq!(sanitize_filename("movie.mkv"), "movie.mkv");
        assert_eq!(sanitize_filename("evil/.."), "file");
        assert_eq!(sanitize_filename("..."), "file");
        assert_eq!(sanitize_filename(""), "file");
        assert_eq!(sanitize_filename("nul\0byte"), "nulbyte");
    }

    #[tokio::test]
    async fn test_staging_paths_are_unique_per_invocation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = StagingFile::create(dir.path(), "movie.mkv")
            .await
            .expect("staging a");
        let b = StagingFile::create(dir.path(), "movie.mkv")
            .await
            .expect("staging b");
        assert_ne!(a.path(), b.path());
    }

    #[tokio::test]
    async fn test_drop_removes_leftover_staging_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = {
            let staging = StagingFile::create(dir.path(), "part.bin")
                .await
                .expect("staging");
            tokio::fs::write(staging.path(), b"partial")
                .await
                .expect("write");
            staging.path().to_path_buf()
            // dropped here without explicit cleanup, as on cancellation
        };
        assert!(!path.exists());
    }
}
