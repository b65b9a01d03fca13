//! List-based queue persistence backing the [`crate::broker::Broker`].
//!
//! `SqliteQueueStore` represents every logical queue (`download-url`,
//! `download-url:tmp`, `download-url:failed`, ...) as rows in one
//! `queue_entries` table distinguished by the `queue` column. "Head" is the
//! most recently inserted row; "tail" is the oldest. This gives FIFO
//! push-to-head / pop-from-tail semantics with plain SQL, the same way
//! [`crate::queue`]'s `Queue::dequeue` claims work with a single
//! `UPDATE ... RETURNING` rather than a separate SELECT-then-UPDATE.

use async_trait::async_trait;
use sqlx::Row;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::db::Database;

/// Errors from the queue store.
#[derive(Debug, Error)]
pub enum QueueStoreError {
    /// The underlying database operation failed.
    #[error("queue store database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Storage backing for broker queues.
///
/// A trait so tests can swap in an in-memory double without a database;
/// [`SqliteQueueStore`] is the only production implementation, consistent
/// with the core reading/writing through one SQLite connection pool.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Pushes `payload` to the head of `queue`.
    async fn push_head(&self, queue: &str, payload: &str) -> Result<(), QueueStoreError>;

    /// Pops and returns the tail of `queue`, or `None` if empty. Non-blocking.
    async fn pop_tail(&self, queue: &str) -> Result<Option<String>, QueueStoreError>;

    /// Atomically moves the tail of `queue` to the head of `dst`, returning
    /// the moved payload. Returns `Ok(None)` if `queue` is currently empty
    /// (callers poll).
    async fn move_tail_to_head(
        &self,
        queue: &str,
        dst: &str,
    ) -> Result<Option<String>, QueueStoreError>;

    /// Removes up to `count` rows from `queue` whose payload equals `value`,
    /// returning the number removed.
    async fn remove_by_value(
        &self,
        queue: &str,
        value: &str,
        count: u32,
    ) -> Result<u64, QueueStoreError>;
}

/// SQLite-backed [`QueueStore`].
#[derive(Debug, Clone)]
pub struct SqliteQueueStore {
    db: Database,
}

impl SqliteQueueStore {
    /// Wraps an existing [`Database`] connection pool.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    #[instrument(skip(self), fields(queue = %queue))]
    async fn push_head(&self, queue: &str, payload: &str) -> Result<(), QueueStoreError> {
        sqlx::query("INSERT INTO queue_entries (queue, payload) VALUES (?, ?)")
            .bind(queue)
            .bind(payload)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(queue = %queue))]
    async fn pop_tail(&self, queue: &str) -> Result<Option<String>, QueueStoreError> {
        let row = sqlx::query(
            r"DELETE FROM queue_entries
              WHERE id = (
                  SELECT id FROM queue_entries WHERE queue = ? ORDER BY id ASC LIMIT 1
              )
              RETURNING payload",
        )
        .bind(queue)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|r| r.get::<String, _>("payload")))
    }

    #[instrument(skip(self), fields(queue = %queue, dst = %dst))]
    async fn move_tail_to_head(
        &self,
        queue: &str,
        dst: &str,
    ) -> Result<Option<String>, QueueStoreError> {
        let mut tx = self.db.pool().begin().await?;

        let popped = sqlx::query(
            r"DELETE FROM queue_entries
              WHERE id = (
                  SELECT id FROM queue_entries WHERE queue = ? ORDER BY id ASC LIMIT 1
              )
              RETURNING payload",
        )
        .bind(queue)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = popped else {
            tx.rollback().await?;
            return Ok(None);
        };
        let payload: String = row.get("payload");

        sqlx::query("INSERT INTO queue_entries (queue, payload) VALUES (?, ?)")
            .bind(dst)
            .bind(&payload)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(payload))
    }

    #[instrument(skip(self, value), fields(queue = %queue, count))]
    async fn remove_by_value(
        &self,
        queue: &str,
        value: &str,
        count: u32,
    ) -> Result<u64, QueueStoreError> {
        let candidates = sqlx::query(
            r"SELECT id FROM queue_entries WHERE queue = ? AND payload = ? ORDER BY id ASC LIMIT ?",
        )
        .bind(queue)
        .bind(value)
        .bind(i64::from(count))
        .fetch_all(self.db.pool())
        .await?;

        if candidates.is_empty() {
            return Ok(0);
        }

        let mut removed = 0u64;
        for row in candidates {
            let id: i64 = row.get("id");
            let result = sqlx::query("DELETE FROM queue_entries WHERE id = ?")
                .bind(id)
                .execute(self.db.pool())
                .await?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }
}

/// Blocks (with bounded polling) until `move_tail_to_head` yields a payload
/// or `cancel` fires.
///
/// SQLite has no native blocking list-pop, so this polls at
/// [`POLL_INTERVAL`] and races each attempt against the token, matching the
/// "suspend on an empty queue, wake on push or cancel" contract without a
/// second notification channel.
pub(crate) const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

pub(crate) async fn blocking_move_tail_to_head(
    store: &dyn QueueStore,
    queue: &str,
    dst: &str,
    cancel: &CancellationToken,
) -> Result<String, QueueStoreError> {
    loop {
        if cancel.is_cancelled() {
            return Err(QueueStoreError::Database(sqlx::Error::PoolClosed));
        }
        if let Some(payload) = store.move_tail_to_head(queue, dst).await? {
            return Ok(payload);
        }
        tokio::select! {
            () = tokio::time::sleep(POLL_INTERVAL) => {}
            () = cancel.cancelled() => return Err(QueueStoreError::Database(sqlx::Error::PoolClosed)),
        }
    }
}
