//! Binds one in-flight URL to its lock/download/unlock lifecycle.
//!
//! Guarantees the matching unlock happens no matter how the download body
//! exits: the download runs in a `tokio::spawn`ed task so a panic surfaces
//! as a `JoinError` instead of unwinding past the unlock call.

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::downloader::{DownloadError, Downloader};
use crate::model::{EventPayload, UrlStatus};
use crate::oembed::{OEmbedClient, OEmbedError};
use crate::store::{Store, StoreError};

/// Grace period for `unlock_url` when the parent token is already
/// cancelled, so a cancelled-in-flight row still leaves `processing`.
const UNLOCK_GRACE: Duration = Duration::from_secs(1);

/// Errors from driving a URL through download or oEmbed lookup.
#[derive(Debug, Error)]
pub enum WorkerManagerError {
    /// The payload could not be decoded.
    #[error("malformed event payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// `lock_url`/`unlock_url` failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The download itself failed; already recorded on the URL row.
    #[error("download failed: {0}")]
    Download(#[from] DownloadError),

    /// The oEmbed fetch failed.
    #[error("oembed fetch failed: {0}")]
    OEmbed(#[from] OEmbedError),

    /// The download task panicked.
    #[error("download task panicked: {0}")]
    Panicked(String),
}

/// Supervises one payload's lock -> download -> unlock lifecycle, and the
/// sibling oEmbed lookup.
#[derive(Clone)]
pub struct WorkerManager {
    store: Store,
    downloader: std::sync::Arc<Downloader>,
    oembed: std::sync::Arc<dyn OEmbedClient>,
}

impl WorkerManager {
    /// Builds a manager over the given collaborators.
    #[must_use]
    pub fn new(
        store: Store,
        downloader: std::sync::Arc<Downloader>,
        oembed: std::sync::Arc<dyn OEmbedClient>,
    ) -> Self {
        Self {
            store,
            downloader,
            oembed,
        }
    }

    /// Locks the URL named by `raw_payload`, downloads it, and unlocks with
    /// the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed payloads, a failed lock/unlock, or a
    /// download failure - the first two are logic errors, the third is
    /// already recorded on the URL row as `status=failure`.
    #[instrument(skip(self, cancel, raw_payload))]
    pub async fn download_url(
        &self,
        cancel: CancellationToken,
        raw_payload: &str,
    ) -> Result<(), WorkerManagerError> {
        let payload = EventPayload::decode(raw_payload)?;
        let locked = self.store.lock_url(payload.id).await?;

        let downloader = self.downloader.clone();
        let url = locked.url.clone();
        let id = locked.id;
        let task_cancel = cancel.clone();
        let join_result =
            tokio::spawn(async move { downloader.download_url(task_cancel, id, &url).await })
                .await;

        let (status, error, file) = match join_result {
            Ok(Ok(file)) => (UrlStatus::Success, None, Some(file)),
            Ok(Err(err)) => (UrlStatus::Failure, Some(err.to_string()), None),
            Err(join_err) if join_err.is_panic() => {
                (UrlStatus::Failure, Some(panic_message(join_err)), None)
            }
            Err(join_err) => (UrlStatus::Failure, Some(join_err.to_string()), None),
        };

        let unlocked = if cancel.is_cancelled() {
            match tokio::time::timeout(
                UNLOCK_GRACE,
                self.store
                    .unlock_url(id, status, error.as_deref(), file.as_deref()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!(id, "unlock_url timed out after cancellation");
                    return Err(WorkerManagerError::Store(StoreError::NotProcessing(id)));
                }
            }
        } else {
            self.store
                .unlock_url(id, status, error.as_deref(), file.as_deref())
                .await
        };
        unlocked?;

        match (status, error) {
            (UrlStatus::Failure, Some(message)) => {
                Err(WorkerManagerError::Download(panic_to_download_error(message)))
            }
            _ => Ok(()),
        }
    }

    /// Fetches and persists oEmbed metadata for the URL named by `raw_payload`.
    #[instrument(skip(self, raw_payload))]
    pub async fn get_oembed(&self, raw_payload: &str) -> Result<(), WorkerManagerError> {
        let payload = EventPayload::decode(raw_payload)?;
        let url = self
            .store
            .get_url(payload.id)
            .await?
            .ok_or(StoreError::NotFound(payload.id))?;

        let bytes = self.oembed.fetch(&url.url).await?;
        self.store.set_oembed(payload.id, &bytes).await?;
        Ok(())
    }
}

fn panic_message(join_err: tokio::task::JoinError) -> String {
    let payload = join_err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "download task panicked with a non-string payload".to_string()
    }
}

fn panic_to_download_error(message: String) -> DownloadError {
    DownloadError::Extraction(crate::extractor::ExtractorError::Spawn(message))
}
