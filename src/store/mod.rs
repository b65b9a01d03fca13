//! Persistence for the [`Url`](crate::model::Url) lifecycle and the
//! [`ExternalVideo`](crate::model::ExternalVideo) dedup key.
//!
//! `lock_url`/`unlock_url` are conditional `UPDATE ... WHERE status = ?
//! RETURNING *` transitions that gate the subprocess-execution critical
//! section, claiming a row atomically without a separate SELECT.

mod error;

pub use error::{StoreDbErrorKind, StoreError};

use sqlx::Row;
use tracing::instrument;

use crate::db::Database;
use crate::model::{ExternalVideo, Url, UrlStatus};

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// The now-timestamp expression shared by every write in this module; kept
/// as a constant so every `updated_at`/`created_at` column uses the exact
/// same ISO-8601-with-`Z` format `sqlx`'s chrono decoder expects.
const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

fn check_affected(id: i64, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(StoreError::NotFound(id))
    } else {
        Ok(())
    }
}

/// Persistence adapter for URL rows and their append-only logs.
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
}

impl Store {
    /// Wraps an existing [`Database`] connection pool.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Creates a new `pending` URL row.
    ///
    /// `retries` is stored only when `Some`; freshly created (non-retried)
    /// URLs pass `None`.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn create_url(&self, url: &str, retries: Option<i64>) -> Result<Url> {
        let row = sqlx::query_as::<_, Url>(
            r"INSERT INTO urls (url, status, retries)
              VALUES (?, ?, ?)
              RETURNING *",
        )
        .bind(url)
        .bind(UrlStatus::Pending.as_str())
        .bind(retries)
        .fetch_one(self.db.pool())
        .await?;

        Ok(row)
    }

    /// Conditionally transitions a `pending` row to `processing`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotLocked`] if the row is missing or not
    /// currently `pending` - the caller must not proceed to download.
    #[instrument(skip(self), fields(id))]
    pub async fn lock_url(&self, id: i64) -> Result<Url> {
        let row = sqlx::query_as::<_, Url>(&format!(
            r"UPDATE urls
              SET status = ?, updated_at = {NOW}
              WHERE id = ? AND status = ? AND deleted_at IS NULL
              RETURNING *"
        ))
        .bind(UrlStatus::Processing.as_str())
        .bind(id)
        .bind(UrlStatus::Pending.as_str())
        .fetch_optional(self.db.pool())
        .await?;

        row.ok_or(StoreError::NotLocked(id))
    }

    /// Conditionally transitions a `processing` row to `success` or `failure`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotProcessing`] if the row is missing or not
    /// currently `processing`.
    #[instrument(skip(self, error, file), fields(id, status = %status))]
    pub async fn unlock_url(
        &self,
        id: i64,
        status: UrlStatus,
        error: Option<&str>,
        file: Option<&str>,
    ) -> Result<Url> {
        debug_assert!(matches!(status, UrlStatus::Success | UrlStatus::Failure));

        let row = sqlx::query_as::<_, Url>(&format!(
            r"UPDATE urls
              SET status = ?, error = ?, file = ?, updated_at = {NOW}
              WHERE id = ? AND status = ?
              RETURNING *"
        ))
        .bind(status.as_str())
        .bind(error)
        .bind(file)
        .bind(id)
        .bind(UrlStatus::Processing.as_str())
        .fetch_optional(self.db.pool())
        .await?;

        row.ok_or(StoreError::NotProcessing(id))
    }

    /// Appends one line to a URL's log array.
    ///
    /// Read-modify-write under SQLite's single-writer-at-a-time semantics;
    /// acceptable because log persistence is documented as best-effort (a
    /// failure here is logged upstream, not propagated as a download
    /// failure).
    #[instrument(skip(self, line), fields(id))]
    pub async fn append_log(&self, id: i64, line: &str) -> Result<()> {
        let current: Option<(String,)> = sqlx::query_as("SELECT logs FROM urls WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        let Some((current,)) = current else {
            return Err(StoreError::NotFound(id));
        };

        let mut logs = serde_json::from_str::<Vec<String>>(&current).unwrap_or_default();
        logs.push(line.to_string());
        let encoded = Url::serialize_logs(&logs);

        let result = sqlx::query(&format!(
            "UPDATE urls SET logs = ?, updated_at = {NOW} WHERE id = ?"
        ))
        .bind(encoded)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Fetches a URL by id. Returns `None` for a soft-deleted or missing row.
    #[instrument(skip(self), fields(id))]
    pub async fn get_url(&self, id: i64) -> Result<Option<Url>> {
        let row = sqlx::query_as::<_, Url>("SELECT * FROM urls WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row)
    }

    /// Soft-deletes a URL by stamping `deleted_at`.
    #[instrument(skip(self), fields(id))]
    pub async fn delete_url(&self, id: i64) -> Result<()> {
        let result = sqlx::query(&format!(
            "UPDATE urls SET deleted_at = {NOW} WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Lists non-deleted URLs, optionally filtered by status, newest first,
    /// paginated by cursor (exclusive lower bound on `id`) and limit.
    #[instrument(skip(self))]
    pub async fn list_urls(
        &self,
        status: Option<UrlStatus>,
        cursor: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Url>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, Url>(
                    r"SELECT * FROM urls
                      WHERE deleted_at IS NULL AND status = ? AND id > ?
                      ORDER BY id ASC
                      LIMIT ?",
                )
                .bind(status.as_str())
                .bind(cursor.unwrap_or(0))
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, Url>(
                    r"SELECT * FROM urls
                      WHERE deleted_at IS NULL AND id > ?
                      ORDER BY id ASC
                      LIMIT ?",
                )
                .bind(cursor.unwrap_or(0))
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
        };
        Ok(rows)
    }

    /// Returns the log lines for a URL, paginated by cursor (0-based offset
    /// into the log array) and limit.
    #[instrument(skip(self), fields(id))]
    pub async fn list_logs(&self, id: i64, cursor: usize, limit: usize) -> Result<Vec<String>> {
        let Some(url) = self.get_url(id).await? else {
            return Err(StoreError::NotFound(id));
        };
        let logs = url.parse_logs();
        Ok(logs.into_iter().skip(cursor).take(limit).collect())
    }

    /// Persists the raw oEmbed payload fetched for a URL.
    #[instrument(skip(self, payload), fields(id))]
    pub async fn set_oembed(&self, id: i64, payload: &[u8]) -> Result<()> {
        let result = sqlx::query(&format!(
            "UPDATE urls SET oembed = ?, updated_at = {NOW} WHERE id = ?"
        ))
        .bind(payload)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Inserts `external_id` if not already present, returning the (possibly
    /// pre-existing) row and whether this call created it.
    #[instrument(skip(self), fields(external_id = %external_id))]
    pub async fn create_external_video(
        &self,
        external_id: &str,
    ) -> Result<(ExternalVideo, bool)> {
        let inserted = sqlx::query_as::<_, ExternalVideo>(
            r"INSERT INTO external_videos (external_id) VALUES (?)
              ON CONFLICT (external_id) DO NOTHING
              RETURNING *",
        )
        .bind(external_id)
        .fetch_optional(self.db.pool())
        .await?;

        if let Some(video) = inserted {
            return Ok((video, true));
        }

        let existing = sqlx::query_as::<_, ExternalVideo>(
            "SELECT * FROM external_videos WHERE external_id = ?",
        )
        .bind(external_id)
        .fetch_one(self.db.pool())
        .await?;

        Ok((existing, false))
    }

    /// Looks up an `ExternalVideo` by its provider id, without creating one.
    #[instrument(skip(self), fields(external_id = %external_id))]
    pub async fn get_external_video(&self, external_id: &str) -> Result<Option<ExternalVideo>> {
        let row = sqlx::query_as::<_, ExternalVideo>(
            "SELECT * FROM external_videos WHERE external_id = ?",
        )
        .bind(external_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }
}
