//! Fans out one cooperative receive loop per registered queue, bounded by
//! a single shared cancellation token.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::broker::{Broker, BrokerError};

/// A boxed, cloneable handler invoked with a raw queue payload.
pub type Handler =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync>;

/// Errors from a worker's receive loops.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// A queue's receive loop hit a broker/transport error (not an ordinary
    /// handler failure, which the loop tolerates and continues past).
    #[error("queue {queue} receive loop failed: {source}")]
    Receive {
        /// The queue whose loop failed.
        queue: String,
        /// The underlying broker error.
        source: BrokerError,
    },
}

/// Runs one [`Broker::receive`] loop per registered `(queue, handler)` pair.
pub struct Worker {
    broker: Broker,
    routes: Vec<(String, Handler)>,
}

impl Worker {
    /// Builds a worker over the given broker, with no routes registered yet.
    #[must_use]
    pub fn new(broker: Broker) -> Self {
        Self {
            broker,
            routes: Vec::new(),
        }
    }

    /// Registers `handler` to run for every payload received on `queue`.
    #[must_use]
    pub fn register(mut self, queue: impl Into<String>, handler: Handler) -> Self {
        self.routes.push((queue.into(), handler));
        self
    }

    /// Runs every registered route's receive loop until `cancel` fires or
    /// any loop hits a non-cancellation broker error.
    ///
    /// A handler returning an error, or panicking, is an ordinary per-job
    /// outcome: the Broker dead-letters the payload and the loop continues.
    /// Only a genuine broker/transport error ends a loop early and cancels
    /// the shared token so the remaining loops wind down too.
    ///
    /// # Errors
    ///
    /// Returns the first non-cancellation error observed across all loops,
    /// after every loop has exited.
    #[instrument(skip(self, cancel))]
    pub async fn listen(self, cancel: CancellationToken) -> Result<(), WorkerError> {
        let handles = self.routes.into_iter().map(|(queue, handler)| {
            let broker = self.broker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { run_loop(broker, queue, handler, cancel).await })
        });

        let results = futures_util::future::join_all(handles).await;

        let mut first_error = None;
        for result in results {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(join_err) => {
                    warn!(error = %join_err, "worker receive loop task panicked");
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn run_loop(
    broker: Broker,
    queue: String,
    handler: Handler,
    cancel: CancellationToken,
) -> Result<(), WorkerError> {
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let handler = handler.clone();
        let outcome = broker
            .receive(&queue, &cancel, move |payload| handler(payload))
            .await;

        match outcome {
            Ok(()) => {}
            Err(BrokerError::Cancelled) => return Ok(()),
            Err(BrokerError::HandlerFailed(message)) => {
                warn!(queue = %queue, error = %message, "handler failed, payload dead-lettered");
            }
            Err(BrokerError::HandlerPanicked(message)) => {
                warn!(queue = %queue, error = %message, "handler panicked, payload dead-lettered");
            }
            Err(err) => {
                cancel.cancel();
                return Err(WorkerError::Receive { queue, source: err });
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::queue_store::SqliteQueueStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn broker() -> Broker {
        let db = Database::new_in_memory().await.unwrap();
        Broker::new(Arc::new(SqliteQueueStore::new(db)))
    }

    #[tokio::test]
    async fn processes_payload_then_stops_on_cancellation() {
        let broker = broker().await;
        broker.send("q", "payload").await.unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let handler: Handler = Arc::new(move |payload| {
            let seen = seen_clone.clone();
            Box::pin(async move {
                assert_eq!(payload, "payload");
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });

        let cancel = CancellationToken::new();
        let worker = Worker::new(broker).register("q", handler);

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            cancel_clone.cancel();
        });

        worker.listen(cancel).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_failure_does_not_stop_the_loop() {
        let broker = broker().await;
        broker.send("q", "payload-1").await.unwrap();
        broker.send("q", "payload-2").await.unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let handler: Handler = Arc::new(move |_payload| {
            let seen = seen_clone.clone();
            Box::pin(async move {
                let count = seen.fetch_add(1, Ordering::SeqCst);
                if count == 0 {
                    Err("boom".to_string())
                } else {
                    Ok(())
                }
            })
        });

        let cancel = CancellationToken::new();
        let worker = Worker::new(broker.clone()).register("q", handler);

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            cancel_clone.cancel();
        });

        worker.listen(cancel).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(
            broker.pop_next_failed("q").await.unwrap().as_deref(),
            Some("payload-1")
        );
    }
}
