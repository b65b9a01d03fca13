//! Consumes one URL's extractor event stream, persists its logs, and
//! uploads the resulting artifact.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::extractor::{ExtractorError, ExtractorEvent, ExtractorRunner};
use crate::storage::{Storage, StorageError};
use crate::store::Store;

/// Errors from downloading and uploading one URL.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The extractor subprocess failed.
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractorError),

    /// The extracted file could not be uploaded to storage.
    #[error("upload failed: {0}")]
    Upload(#[from] StorageError),

    /// The extracted file's name was not valid UTF-8.
    #[error("extracted file name is not valid UTF-8: {0}")]
    InvalidFileName(PathBuf),
}

/// Deletes the wrapped path when dropped, regardless of how the enclosing
/// scope exits. The extractor hands off its scratch directory (persisted
/// past its own `TempDir`'s lifetime so this guard can consume the file
/// after the extractor task finishes) rather than just the file, so the
/// now-empty directory can be removed in the same step.
struct TempFileGuard(Option<PathBuf>);

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self(Some(path))
    }

    fn path(&self) -> &Path {
        self.0.as_deref().unwrap_or_else(|| Path::new(""))
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        let Some(path) = self.0.take() else {
            return;
        };
        if let Err(err) = std::fs::remove_file(&path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %err, "failed to remove extractor temp file");
            }
        }
        if let Some(dir) = path.parent() {
            if let Err(err) = std::fs::remove_dir(dir) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(dir = %dir.display(), error = %err, "failed to remove extractor scratch directory");
                }
            }
        }
    }
}

/// Downloads one URL by driving an [`ExtractorRunner`] and uploading its
/// output via [`Storage`].
pub struct Downloader {
    extractor: Arc<dyn ExtractorRunner>,
    storage: Arc<dyn Storage>,
    store: Store,
}

impl Downloader {
    /// Builds a downloader over the given collaborators.
    #[must_use]
    pub fn new(extractor: Arc<dyn ExtractorRunner>, storage: Arc<dyn Storage>, store: Store) -> Self {
        Self {
            extractor,
            storage,
            store,
        }
    }

    /// Runs extraction for `url_id`/`url`, persisting log lines as they
    /// arrive and uploading the resulting file on success.
    ///
    /// Returns the storage key of the uploaded artifact. The local
    /// extractor output file is removed on every exit path.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Extraction`] if the subprocess failed or
    /// produced an unusable result, or [`DownloadError::Upload`] if the
    /// resulting file could not be saved.
    #[instrument(skip(self, cancel), fields(url_id, url = %url))]
    pub async fn download_url(
        &self,
        cancel: CancellationToken,
        url_id: i64,
        url: &str,
    ) -> Result<String, DownloadError> {
        let mut stream = self.extractor.run(cancel, url.to_string()).await;

        let mut failure: Option<ExtractorError> = None;
        let mut success_path: Option<PathBuf> = None;

        while let Some(event) = stream.next().await {
            match event {
                ExtractorEvent::Log(line) => {
                    if let Err(err) = self.store.append_log(url_id, &line).await {
                        warn!(url_id, error = %err, "failed to persist extractor log line");
                    }
                }
                ExtractorEvent::Failure(err) => failure = Some(err),
                ExtractorEvent::Success(path) => success_path = Some(path),
            }
        }

        if let Some(err) = failure {
            return Err(DownloadError::Extraction(err));
        }
        let Some(path) = success_path else {
            return Err(DownloadError::Extraction(ExtractorError::UnexpectedOutputCount { found: 0 }));
        };

        // Guard runs regardless of whether the upload below succeeds.
        let guard = TempFileGuard::new(path);
        let file_name = guard
            .path()
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| DownloadError::InvalidFileName(guard.path().to_path_buf()))?
            .to_string();

        let key = self.storage.save(guard.path(), &file_name).await?;
        Ok(key)
    }
}
