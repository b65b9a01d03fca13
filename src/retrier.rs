//! Re-enters dead-lettered `download-url` events into the pipeline when the
//! failure looks transient.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::broker::{Broker, BrokerError};
use crate::model::{EventPayload, Url};
use crate::queues::DOWNLOAD_URL;
use crate::server_manager::{ServerManager, ServerManagerError};
use crate::store::{Store, StoreError};

/// A failed download is not retried past this many attempts.
const MAX_RETRIES: i64 = 5;

/// Regexes matching log text produced by a transient, worth-retrying
/// failure: rate limiting, geo-blocking, and copyright takedowns.
static TRANSIENT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"HTTP Error 429: Too Many Requests",
        r"has not made this video available in your country",
        r"who has blocked it on copyright grounds",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("pattern is a valid static regex"))
    .collect()
});

/// Errors retrying a failed download.
#[derive(Debug, Error)]
pub enum RetrierError {
    /// A broker operation failed.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// The dead-lettered payload could not be decoded.
    #[error("malformed event payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// A store lookup failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The URL named by the payload no longer exists.
    #[error("url {0} not found")]
    NotFound(i64),

    /// Creating the successor URL failed.
    #[error("server manager error: {0}")]
    ServerManager(#[from] ServerManagerError),
}

/// Substring [`Downloader`](crate::downloader::Downloader) error strings
/// carry when the recorded failure came from the extractor subprocess
/// exiting non-zero, as opposed to a spawn failure or cancellation.
const EXIT_STATUS_MARKER: &str = "exited with status";

/// Evaluates whether `url`'s recorded failure looks transient.
///
/// Matches iff the failure was an extractor exit-status error *and* the
/// joined log text hits one of [`TRANSIENT_PATTERNS`] - a cancelled or
/// never-spawned extractor never qualifies, even if its logs happen to
/// contain matching text.
#[must_use]
pub fn should_retry(url: &Url) -> bool {
    let Some(error) = url.error.as_deref() else {
        return false;
    };
    if !error.contains(EXIT_STATUS_MARKER) {
        return false;
    }
    let joined = url.parse_logs().join("\n");
    TRANSIENT_PATTERNS.iter().any(|pattern| pattern.is_match(&joined))
}

/// Drains the `download-url` dead-letter queue and re-enters eligible URLs.
pub struct Retrier {
    broker: Broker,
    store: Store,
    server_manager: ServerManager,
}

impl Retrier {
    /// Builds a retrier over the given collaborators.
    #[must_use]
    pub fn new(broker: Broker, store: Store, server_manager: ServerManager) -> Self {
        Self {
            broker,
            store,
            server_manager,
        }
    }

    /// Pops the next `download-url` dead-letter entry (if any) and, if its
    /// recorded failure looks transient and it has not exhausted its
    /// retry budget, creates a successor URL with an incremented counter.
    ///
    /// Returns `Ok(None)` when the dead-letter queue was empty, or
    /// `Ok(Some(None))` when a payload was popped but was not retried.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker, store, or URL-creation step fails.
    #[instrument(skip(self))]
    pub async fn retry_next_download_url(&self) -> Result<Option<Option<Url>>, RetrierError> {
        let Some(raw) = self.broker.pop_next_failed(DOWNLOAD_URL).await? else {
            return Ok(None);
        };

        let payload = EventPayload::decode(&raw)?;
        let failed = self
            .store
            .get_url(payload.id)
            .await?
            .ok_or(RetrierError::NotFound(payload.id))?;

        if !should_retry(&failed) {
            return Ok(Some(None));
        }
        let retries = failed.retries.unwrap_or(0);
        if retries >= MAX_RETRIES {
            return Ok(Some(None));
        }

        let successor = self
            .server_manager
            .create_url(&failed.url, Some(retries + 1))
            .await?;
        Ok(Some(Some(successor)))
    }

    /// Explicitly retries the URL named by `id`, bypassing [`should_retry`]
    /// and the retry bound - an explicit request is authoritative.
    ///
    /// Removes the matching dead-lettered payload, if any, so it is not
    /// also picked up by a later [`Retrier::retry_next_download_url`] sweep.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker, store, or URL-creation step fails.
    #[instrument(skip(self), fields(id))]
    pub async fn retry_download_url(&self, id: i64) -> Result<Url, RetrierError> {
        let failed = self
            .store
            .get_url(id)
            .await?
            .ok_or(RetrierError::NotFound(id))?;

        let payload = EventPayload::new(id, &failed.url);
        if let Ok(encoded) = payload.encode() {
            if let Err(err) = self.broker.remove_failed(DOWNLOAD_URL, &encoded).await {
                warn!(id, error = %err, "failed to remove dead-lettered payload before explicit retry");
            }
        }

        let retries = failed.retries.unwrap_or(0);
        let successor = self
            .server_manager
            .create_url(&failed.url, Some(retries + 1))
            .await?;
        Ok(successor)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::queue_store::SqliteQueueStore;
    use std::sync::Arc;

    async fn retrier() -> (Retrier, Broker, Store) {
        let db = Database::new_in_memory().await.unwrap();
        let store = Store::new(db.clone());
        let broker = Broker::new(Arc::new(SqliteQueueStore::new(db)));
        let server_manager = ServerManager::new(store.clone(), broker.clone());
        (
            Retrier::new(broker.clone(), store.clone(), server_manager),
            broker,
            store,
        )
    }

    fn sample_url(error: Option<&str>, logs: &[&str]) -> Url {
        let now = chrono::Utc::now();
        Url {
            id: 1,
            url: "https://example.com".to_string(),
            status_str: "failure".to_string(),
            error: error.map(str::to_string),
            file: None,
            retries: None,
            logs: serde_json::to_string(&logs).unwrap(),
            oembed: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn should_retry_matches_rate_limit_message() {
        let url = sample_url(
            Some("extraction failed: extractor exited with status 1"),
            &["ERROR: Unable to download webpage: HTTP Error 429: Too Many Requests"],
        );
        assert!(should_retry(&url));
    }

    #[test]
    fn should_retry_rejects_unrelated_failure() {
        let url = sample_url(
            Some("extraction failed: extractor exited with status 1"),
            &["ERROR: video unavailable"],
        );
        assert!(!should_retry(&url));
    }

    #[test]
    fn should_retry_rejects_transient_looking_log_from_a_non_exit_status_failure() {
        let url = sample_url(
            Some("extraction failed: extractor cancelled"),
            &["ERROR: Unable to download webpage: HTTP Error 429: Too Many Requests"],
        );
        assert!(
            !should_retry(&url),
            "a cancelled or never-spawned extractor must not be retried even if its logs look transient"
        );
    }

    #[tokio::test]
    async fn retry_next_returns_none_when_queue_empty() {
        let (retrier, _broker, _store) = retrier().await;
        assert!(retrier.retry_next_download_url().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retry_next_creates_successor_for_transient_failure() {
        let (retrier, broker, store) = retrier().await;
        let url = store.create_url("https://example.com/v", None).await.unwrap();
        store
            .append_log(
                url.id,
                "ERROR: Unable to download webpage: HTTP Error 429: Too Many Requests",
            )
            .await
            .unwrap();
        store.lock_url(url.id).await.unwrap();
        store
            .unlock_url(
                url.id,
                crate::model::UrlStatus::Failure,
                Some("extraction failed: extractor exited with status 1"),
                None,
            )
            .await
            .unwrap();

        let payload = EventPayload::new(url.id, &url.url).encode().unwrap();
        broker.send(&crate::queues::failed_of(DOWNLOAD_URL), &payload).await.unwrap();

        let result = retrier.retry_next_download_url().await.unwrap();
        let successor = result.flatten().expect("transient failure should be retried");
        assert_eq!(successor.retries, Some(1));
        assert_ne!(successor.id, url.id);
    }

    #[tokio::test]
    async fn retry_next_skips_non_transient_failure() {
        let (retrier, broker, store) = retrier().await;
        let url = store.create_url("https://example.com/v", None).await.unwrap();
        store.append_log(url.id, "ERROR: unrelated").await.unwrap();
        store.lock_url(url.id).await.unwrap();
        store
            .unlock_url(
                url.id,
                crate::model::UrlStatus::Failure,
                Some("extraction failed: extractor exited with status 1"),
                None,
            )
            .await
            .unwrap();

        let payload = EventPayload::new(url.id, &url.url).encode().unwrap();
        broker.send(&crate::queues::failed_of(DOWNLOAD_URL), &payload).await.unwrap();

        let result = retrier.retry_next_download_url().await.unwrap();
        assert!(matches!(result, Some(None)));
    }

    #[tokio::test]
    async fn retry_next_stops_at_retry_bound() {
        let (retrier, broker, store) = retrier().await;
        let url = store.create_url("https://example.com/v", Some(5)).await.unwrap();
        store
            .append_log(
                url.id,
                "ERROR: Unable to download webpage: HTTP Error 429: Too Many Requests",
            )
            .await
            .unwrap();
        store.lock_url(url.id).await.unwrap();
        store
            .unlock_url(
                url.id,
                crate::model::UrlStatus::Failure,
                Some("extraction failed: extractor exited with status 1"),
                None,
            )
            .await
            .unwrap();

        let payload = EventPayload::new(url.id, &url.url).encode().unwrap();
        broker.send(&crate::queues::failed_of(DOWNLOAD_URL), &payload).await.unwrap();

        let result = retrier.retry_next_download_url().await.unwrap();
        assert!(matches!(result, Some(None)));
    }

    #[tokio::test]
    async fn explicit_retry_bypasses_should_retry_and_removes_dead_letter() {
        let (retrier, broker, store) = retrier().await;
        let url = store.create_url("https://example.com/v", None).await.unwrap();
        store.append_log(url.id, "ERROR: unrelated").await.unwrap();
        store.lock_url(url.id).await.unwrap();
        store
            .unlock_url(
                url.id,
                crate::model::UrlStatus::Failure,
                Some("extraction failed: extractor exited with status 1"),
                None,
            )
            .await
            .unwrap();

        let payload = EventPayload::new(url.id, &url.url).encode().unwrap();
        broker.send(&crate::queues::failed_of(DOWNLOAD_URL), &payload).await.unwrap();

        let successor = retrier.retry_download_url(url.id).await.unwrap();
        assert_eq!(successor.retries, Some(1));

        let remaining = broker.pop_next_failed(DOWNLOAD_URL).await.unwrap();
        assert!(remaining.is_none());
    }
}
