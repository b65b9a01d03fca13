//! Expands an external playlist into individual URLs, deduplicating by the
//! provider's stable video id.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::server_manager::{ServerManager, ServerManagerError};
use crate::store::{Store, StoreError};

/// One video surfaced by a [`PlaylistSource`].
#[derive(Debug, Clone)]
pub struct PlaylistVideo {
    /// The provider's stable identifier, used as the dedup key.
    pub external_id: String,
    /// The URL to enqueue for download.
    pub url: String,
}

/// Errors listing a playlist's videos.
#[derive(Debug, Error)]
#[error("playlist source error: {0}")]
pub struct PlaylistSourceError(pub String);

/// Lists the videos of an external playlist.
///
/// The real HTTP/API integration against a specific provider is out of
/// scope; this trait only specifies the shape [`PlaylistLoader`] needs.
#[async_trait]
pub trait PlaylistSource: Send + Sync {
    /// Lists the videos currently in `playlist_id`.
    async fn list_videos(&self, playlist_id: &str) -> Result<Vec<PlaylistVideo>, PlaylistSourceError>;
}

/// Errors expanding a playlist.
#[derive(Debug, Error)]
pub enum PlaylistLoaderError {
    /// The playlist source failed to list videos.
    #[error("playlist source error: {0}")]
    Source(#[from] PlaylistSourceError),
}

/// Expands playlists into deduplicated [`crate::model::Url`] rows.
pub struct PlaylistLoader {
    source: std::sync::Arc<dyn PlaylistSource>,
    store: Store,
    server_manager: ServerManager,
}

impl PlaylistLoader {
    /// Builds a loader over the given collaborators.
    #[must_use]
    pub fn new(
        source: std::sync::Arc<dyn PlaylistSource>,
        store: Store,
        server_manager: ServerManager,
    ) -> Self {
        Self {
            source,
            store,
            server_manager,
        }
    }

    /// Lists `playlist_id`'s videos and creates a URL for each one not
    /// already seen (keyed by [`PlaylistVideo::external_id`]).
    ///
    /// A failure creating one video's URL is logged and does not abort the
    /// rest of the batch.
    ///
    /// # Errors
    ///
    /// Returns [`PlaylistLoaderError::Source`] if the playlist itself could
    /// not be listed.
    #[instrument(skip(self), fields(playlist_id = %playlist_id))]
    pub async fn create_urls_from_playlist(&self, playlist_id: &str) -> Result<(), PlaylistLoaderError> {
        let videos = self.source.list_videos(playlist_id).await?;

        for video in videos {
            if let Err(err) = self.create_url_for_video(&video).await {
                warn!(
                    external_id = %video.external_id,
                    error = %err,
                    "failed to create url for playlist video"
                );
            }
        }

        Ok(())
    }

    async fn create_url_for_video(&self, video: &PlaylistVideo) -> Result<(), PlaylistLoaderVideoError> {
        let (_row, created) = self.store.create_external_video(&video.external_id).await?;
        if !created {
            return Ok(());
        }

        self.server_manager.create_url(&video.url, None).await?;
        Ok(())
    }
}

/// Internal per-video error, distinct from [`PlaylistLoaderError`] because
/// it is only ever logged, never returned.
#[derive(Debug, Error)]
enum PlaylistLoaderVideoError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("server manager error: {0}")]
    ServerManager(#[from] ServerManagerError),
}
