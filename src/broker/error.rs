//! Error types for broker operations.

use thiserror::Error;

use crate::queue_store::QueueStoreError;

/// Errors that can occur sending, receiving, or retrying broker messages.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The underlying queue store failed.
    #[error("queue store error: {0}")]
    Store(#[from] QueueStoreError),

    /// The handler returned an application-level error.
    ///
    /// The payload has already been moved out of `queue:tmp` and into
    /// `queue:failed` by the time this variant reaches the caller.
    #[error("handler failed: {0}")]
    HandlerFailed(String),

    /// The handler task panicked.
    ///
    /// Treated identically to [`BrokerError::HandlerFailed`] for queue
    /// bookkeeping purposes, but kept distinct so callers can tell the two
    /// apart in logs.
    #[error("handler panicked: {0}")]
    HandlerPanicked(String),

    /// The cancellation token fired while waiting for a payload.
    #[error("receive cancelled")]
    Cancelled,

    /// A payload read from the store was not valid UTF-8/JSON for the caller's purposes.
    #[error("malformed payload: {0}\n  Suggestion: check producers are all using EventPayload::encode")]
    MalformedPayload(String),
}
