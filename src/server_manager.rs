//! Creates URL rows and publishes the events that drive them through the pipeline.

use thiserror::Error;
use tracing::{instrument, warn};

use crate::broker::Broker;
use crate::model::{EventPayload, Url};
use crate::queues::{DOWNLOAD_URL, GET_OEMBED};
use crate::store::{Store, StoreError};

/// Errors creating or reading URLs.
#[derive(Debug, Error)]
pub enum ServerManagerError {
    /// The store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Handles URL creation (and passthrough reads) on behalf of the CLI/API surface.
#[derive(Clone)]
pub struct ServerManager {
    store: Store,
    broker: Broker,
}

impl ServerManager {
    /// Builds a manager over the given collaborators.
    #[must_use]
    pub fn new(store: Store, broker: Broker) -> Self {
        Self { store, broker }
    }

    /// Creates a `pending` URL row and enqueues it on both `download-url`
    /// and `get-oembed`.
    ///
    /// A broker send failure is logged, not propagated - the row is still
    /// created even if the initial publish fails; a dead row can still be
    /// picked up later by an explicit `download-url`/`retry-download-url`
    /// CLI invocation. See the crate's design notes for why this side is
    /// best-effort rather than part of the same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`ServerManagerError::Store`] if the row itself could not be created.
    #[instrument(skip(self), fields(url = %url, retries))]
    pub async fn create_url(&self, url: &str, retries: Option<i64>) -> Result<Url, ServerManagerError> {
        let row = self.store.create_url(url, retries).await?;

        let payload = EventPayload::new(row.id, url);
        let encoded = match payload.encode() {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(id = row.id, error = %err, "failed to encode event payload");
                return Ok(row);
            }
        };

        if let Err(err) = self.broker.send(DOWNLOAD_URL, &encoded).await {
            warn!(id = row.id, error = %err, "failed to publish download-url event");
        }
        if let Err(err) = self.broker.send(GET_OEMBED, &encoded).await {
            warn!(id = row.id, error = %err, "failed to publish get-oembed event");
        }

        Ok(row)
    }

    /// Fetches a URL by id.
    #[instrument(skip(self), fields(id))]
    pub async fn get_url(&self, id: i64) -> Result<Option<Url>, ServerManagerError> {
        Ok(self.store.get_url(id).await?)
    }

    /// Soft-deletes a URL by id.
    #[instrument(skip(self), fields(id))]
    pub async fn delete_url(&self, id: i64) -> Result<(), ServerManagerError> {
        Ok(self.store.delete_url(id).await?)
    }

    /// Lists non-deleted URLs.
    #[instrument(skip(self))]
    pub async fn list_urls(
        &self,
        status: Option<crate::model::UrlStatus>,
        cursor: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Url>, ServerManagerError> {
        Ok(self.store.list_urls(status, cursor, limit).await?)
    }

    /// Lists a URL's log lines.
    #[instrument(skip(self), fields(id))]
    pub async fn list_logs(
        &self,
        id: i64,
        cursor: usize,
        limit: usize,
    ) -> Result<Vec<String>, ServerManagerError> {
        Ok(self.store.list_logs(id, cursor, limit).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::queue_store::SqliteQueueStore;
    use std::sync::Arc;

    async fn manager() -> (ServerManager, Broker) {
        let db = Database::new_in_memory().await.unwrap();
        let store = Store::new(db.clone());
        let broker = Broker::new(Arc::new(SqliteQueueStore::new(db)));
        (ServerManager::new(store, broker.clone()), broker)
    }

    #[tokio::test]
    async fn create_url_publishes_to_both_queues() {
        let (manager, broker) = manager().await;
        let created = manager.create_url("https://example.com/v", None).await.unwrap();

        let cancel = tokio_util::sync::CancellationToken::new();
        broker
            .receive(DOWNLOAD_URL, &cancel, |_payload| async { Ok(()) })
            .await
            .unwrap();
        broker
            .receive(GET_OEMBED, &cancel, |_payload| async { Ok(()) })
            .await
            .unwrap();

        assert_eq!(created.status(), crate::model::UrlStatus::Pending);
    }

    #[tokio::test]
    async fn create_url_without_retries_leaves_retries_none() {
        let (manager, _broker) = manager().await;
        let created = manager.create_url("https://example.com/v", None).await.unwrap();
        assert_eq!(created.retries, None);
    }

    #[tokio::test]
    async fn create_url_with_retries_stores_the_count() {
        let (manager, _broker) = manager().await;
        let created = manager
            .create_url("https://example.com/v", Some(2))
            .await
            .unwrap();
        assert_eq!(created.retries, Some(2));
    }

    #[tokio::test]
    async fn delete_then_get_returns_none() {
        let (manager, _broker) = manager().await;
        let created = manager.create_url("https://example.com/v", None).await.unwrap();
        manager.delete_url(created.id).await.unwrap();
        assert!(manager.get_url(created.id).await.unwrap().is_none());
    }
}
