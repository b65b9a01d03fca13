//! Blob storage for downloaded artifacts.
//!
//! The real object-storage integration is out of scope; [`FilesystemStorage`]
//! is the runnable default and [`MemoryStorage`] is a test double, both
//! behind the [`Storage`] trait so [`crate::downloader::Downloader`] never
//! depends on a concrete backend.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::instrument;

/// Errors saving an artifact to blob storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading the source file failed.
    #[error("failed to read artifact: {0}")]
    Read(String),
    /// Writing to the storage backend failed.
    #[error("failed to write artifact {key}: {source}")]
    Write {
        /// The storage key being written.
        key: String,
        /// The underlying error.
        source: String,
    },
}

/// Infers a content type from a storage key's file suffix.
///
/// Unknown suffixes fall back to `application/octet-stream`.
#[must_use]
pub fn content_type_for(key: &str) -> &'static str {
    let lower = key.to_ascii_lowercase();
    if lower.ends_with(".mp3") {
        "audio/mpeg"
    } else if lower.ends_with(".mp4") {
        "video/mp4"
    } else if lower.ends_with(".webm") {
        "video/webm"
    } else {
        "application/octet-stream"
    }
}

/// Persists a downloaded artifact under a storage key.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Saves the bytes at `local_path` under `key`, returning the key the
    /// caller should record as the URL row's `file` value (typically `key`
    /// itself, echoed back for symmetry with backends that rewrite it).
    async fn save(&self, local_path: &std::path::Path, key: &str) -> Result<String, StorageError>;
}

/// Copies artifacts into a configured directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    /// Artifacts are copied under `root`, which is created if missing.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Storage for FilesystemStorage {
    #[instrument(skip(self), fields(key = %key))]
    async fn save(&self, local_path: &std::path::Path, key: &str) -> Result<String, StorageError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|err| StorageError::Write {
                key: key.to_string(),
                source: err.to_string(),
            })?;

        let mut source = tokio::fs::File::open(local_path)
            .await
            .map_err(|err| StorageError::Read(err.to_string()))?;
        let mut bytes = Vec::new();
        source
            .read_to_end(&mut bytes)
            .await
            .map_err(|err| StorageError::Read(err.to_string()))?;

        let dest = self.root.join(key);
        tokio::fs::write(&dest, &bytes)
            .await
            .map_err(|err| StorageError::Write {
                key: key.to_string(),
                source: err.to_string(),
            })?;

        Ok(key.to_string())
    }
}

/// In-memory [`Storage`] test double; records saved bytes by key.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    saved: std::sync::Arc<tokio::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the bytes saved under `key`, if any.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.saved.lock().await.get(key).cloned()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save(&self, local_path: &std::path::Path, key: &str) -> Result<String, StorageError> {
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|err| StorageError::Read(err.to_string()))?;
        self.saved.lock().await.insert(key.to_string(), bytes);
        Ok(key.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn content_type_matches_known_suffixes() {
        assert_eq!(content_type_for("clip.mp3"), "audio/mpeg");
        assert_eq!(content_type_for("clip.mp4"), "video/mp4");
        assert_eq!(content_type_for("clip.webm"), "video/webm");
        assert_eq!(content_type_for("CLIP.MP4"), "video/mp4");
    }

    #[test]
    fn content_type_falls_back_for_unknown_suffix() {
        assert_eq!(content_type_for("clip.xyz"), "application/octet-stream");
    }

    #[tokio::test]
    async fn memory_storage_round_trips_saved_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.bin");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let storage = MemoryStorage::new();
        let key = storage.save(&path, "out.bin").await.unwrap();
        assert_eq!(key, "out.bin");
        assert_eq!(storage.get("out.bin").await, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn filesystem_storage_copies_into_root() {
        let src_dir = tempfile::tempdir().unwrap();
        let src_path = src_dir.path().join("src.bin");
        tokio::fs::write(&src_path, b"payload").await.unwrap();

        let dest_dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(dest_dir.path());

        storage.save(&src_path, "out.bin").await.unwrap();
        let written = tokio::fs::read(dest_dir.path().join("out.bin"))
            .await
            .unwrap();
        assert_eq!(written, b"payload");
    }
}
