//! Broker: a list-based job queue with an in-flight and a dead-letter side queue.
//!
//! For a queue named `Q`, [`Broker`] maintains three lists in the
//! [`crate::queue_store::QueueStore`]: `Q` itself, `Q:tmp` (payloads a
//! handler currently owns), and `Q:failed` (payloads whose handler did not
//! succeed). `receive` moves a payload `Q -> Q:tmp`, runs the handler, then
//! removes it from `Q:tmp` exactly once regardless of outcome - ordinary
//! success, a returned error, or a handler panic all take this path.

mod error;

pub use error::BrokerError;

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::queue_store::{self, QueueStore};
use crate::queues::{failed_of, tmp_of};

/// Thin façade over a [`QueueStore`] implementing at-least-once delivery
/// with a dead-letter side queue.
#[derive(Clone)]
pub struct Broker {
    store: Arc<dyn QueueStore>,
}

impl Broker {
    /// Wraps a queue store implementation.
    #[must_use]
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Appends `payload` to the head of `queue`.
    #[instrument(skip(self, payload), fields(queue = %queue))]
    pub async fn send(&self, queue: &str, payload: &str) -> Result<(), BrokerError> {
        self.store.push_head(queue, payload).await?;
        Ok(())
    }

    /// Moves the next payload of `queue` into `queue:tmp`, invokes `handler`
    /// with it, then removes it from `queue:tmp` exactly once.
    ///
    /// Blocks (polling, see [`crate::queue_store`]) until a payload is
    /// available or `cancel` fires. On a non-success handler outcome -
    /// ordinary error or panic - the payload is additionally appended to
    /// `queue:failed`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Cancelled`] if `cancel` fires before a payload
    /// arrives, [`BrokerError::HandlerFailed`]/[`BrokerError::HandlerPanicked`]
    /// if the handler did not succeed, or a store error if the queue
    /// bookkeeping itself failed.
    pub async fn receive<F, Fut>(
        &self,
        queue: &str,
        cancel: &CancellationToken,
        handler: F,
    ) -> Result<(), BrokerError>
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let tmp = tmp_of(queue);
        let payload =
            queue_store::blocking_move_tail_to_head(self.store.as_ref(), queue, &tmp, cancel)
                .await
                .map_err(|err| {
                    if cancel.is_cancelled() {
                        BrokerError::Cancelled
                    } else {
                        BrokerError::Store(err)
                    }
                })?;

        self.run_and_release(queue, &tmp, payload, handler).await
    }

    #[instrument(skip(self, payload, handler), fields(queue = %queue))]
    async fn run_and_release<F, Fut>(
        &self,
        queue: &str,
        tmp: &str,
        payload: String,
        handler: F,
    ) -> Result<(), BrokerError>
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let task_payload = payload.clone();
        // tokio::spawn isolates a handler panic into a JoinError rather than
        // unwinding this task, which is what lets the release/dead-letter
        // bookkeeping below run unconditionally.
        let join_result = tokio::spawn(async move { handler(task_payload).await }).await;

        let outcome = match join_result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(BrokerError::HandlerFailed(message)),
            Err(join_err) if join_err.is_panic() => {
                Err(BrokerError::HandlerPanicked(panic_message(join_err)))
            }
            Err(join_err) => Err(BrokerError::HandlerFailed(join_err.to_string())),
        };

        if let Err(err) = self.store.remove_by_value(tmp, &payload, 1).await {
            warn!(queue = %queue, error = %err, "failed to remove payload from in-flight queue");
        }

        if let Err(ref outcome_err) = outcome {
            let failed = failed_of(queue);
            if let Err(err) = self.store.push_head(&failed, &payload).await {
                warn!(
                    queue = %queue,
                    original_error = %outcome_err,
                    error = %err,
                    "failed to record dead-letter payload"
                );
            }
        }

        outcome
    }

    /// Pops the next dead-lettered payload of `queue`, or `None` if empty.
    #[instrument(skip(self), fields(queue = %queue))]
    pub async fn pop_next_failed(&self, queue: &str) -> Result<Option<String>, BrokerError> {
        let failed = failed_of(queue);
        Ok(self.store.pop_tail(&failed).await?)
    }

    /// Removes the first matching `payload` from `queue:failed`, if present.
    ///
    /// Used by explicit-retry flows that bypass the normal retrier sweep.
    #[instrument(skip(self, payload), fields(queue = %queue))]
    pub async fn remove_failed(&self, queue: &str, payload: &str) -> Result<u64, BrokerError> {
        let failed = failed_of(queue);
        Ok(self.store.remove_by_value(&failed, payload, 1).await?)
    }
}

fn panic_message(join_err: tokio::task::JoinError) -> String {
    let payload = join_err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::queue_store::SqliteQueueStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn broker() -> Broker {
        let db = Database::new_in_memory().await.unwrap();
        Broker::new(Arc::new(SqliteQueueStore::new(db)))
    }

    #[tokio::test]
    async fn successful_handler_removes_payload_from_tmp_and_never_touches_failed() {
        let broker = broker().await;
        broker.send("q", "payload-1").await.unwrap();

        let cancel = CancellationToken::new();
        broker
            .receive("q", &cancel, |_payload| async { Ok(()) })
            .await
            .unwrap();

        assert_eq!(broker.pop_next_failed("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn failing_handler_moves_payload_to_dead_letter_exactly_once() {
        let broker = broker().await;
        broker.send("q", "payload-2").await.unwrap();

        let cancel = CancellationToken::new();
        let result = broker
            .receive("q", &cancel, |_payload| async {
                Err("boom".to_string())
            })
            .await;

        assert!(matches!(result, Err(BrokerError::HandlerFailed(_))));
        assert_eq!(
            broker.pop_next_failed("q").await.unwrap().as_deref(),
            Some("payload-2")
        );
        assert_eq!(broker.pop_next_failed("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn panicking_handler_is_converted_to_handler_panicked_and_dead_lettered() {
        let broker = broker().await;
        broker.send("q", "payload-3").await.unwrap();

        let cancel = CancellationToken::new();
        let result = broker
            .receive("q", &cancel, |_payload| async {
                panic!("handler exploded");
            })
            .await;

        assert!(matches!(result, Err(BrokerError::HandlerPanicked(msg)) if msg.contains("exploded")));
        assert_eq!(
            broker.pop_next_failed("q").await.unwrap().as_deref(),
            Some("payload-3")
        );
    }

    #[tokio::test]
    async fn receive_on_empty_queue_returns_cancelled_when_token_fires() {
        let broker = broker().await;
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });

        let result = broker
            .receive("empty-queue", &cancel, |_payload| async { Ok(()) })
            .await;
        assert!(matches!(result, Err(BrokerError::Cancelled)));
    }

    #[tokio::test]
    async fn remove_failed_deletes_a_dead_lettered_payload() {
        let broker = broker().await;
        broker.send("q", "payload-4").await.unwrap();
        let cancel = CancellationToken::new();
        let _ = broker
            .receive("q", &cancel, |_payload| async { Err("x".to_string()) })
            .await;

        let removed = broker.remove_failed("q", "payload-4").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(broker.pop_next_failed("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn handler_observes_moved_payload_exactly_once() {
        let broker = broker().await;
        broker.send("q", "payload-5").await.unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();

        let cancel = CancellationToken::new();
        broker
            .receive("q", &cancel, move |payload| {
                let seen = seen_clone.clone();
                async move {
                    assert_eq!(payload, "payload-5");
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
