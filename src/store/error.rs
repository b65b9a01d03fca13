//! Error types for `Url`/`ExternalVideo` persistence.

use thiserror::Error;

/// Structured classification for store/database failures, mirroring the
/// queue module's own `sqlx::Error` classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreDbErrorKind {
    /// SQLite returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Constraint failure (unique/foreign-key/check/not-null).
    ConstraintViolation,
    /// Connection pool timed out waiting for a free connection.
    PoolTimeout,
    /// Connection pool is closed.
    PoolClosed,
    /// Expected row was not found.
    RowNotFound,
    /// Unclassified database failure.
    Other,
}

impl StoreDbErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::RowNotFound => Self::RowNotFound,
            sqlx::Error::Database(database_error) => {
                let code = database_error.code();
                if matches!(
                    code.as_deref(),
                    Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6")
                ) {
                    Self::BusyOrLocked
                } else if database_error.is_unique_violation()
                    || database_error.is_check_violation()
                    || code
                        .as_deref()
                        .is_some_and(|value| value.starts_with("SQLITE_CONSTRAINT"))
                {
                    Self::ConstraintViolation
                } else {
                    Self::Other
                }
            }
            _ => Self::Other,
        }
    }
}

/// Errors from `Url`/`ExternalVideo` persistence operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("store database error ({kind:?}): {message}")]
    Database {
        /// Typed classification of the underlying `sqlx::Error`.
        kind: StoreDbErrorKind,
        /// Human-readable database error text.
        message: String,
    },

    /// The URL row did not exist (or was soft-deleted).
    #[error("url not found: id {0}\n  Suggestion: the row may have been deleted or the id is wrong")]
    NotFound(i64),

    /// `lock_url` found the row not in `Pending` status.
    ///
    /// Either another worker already claimed it, or it is already in a
    /// terminal state; the caller must not proceed to download.
    #[error("url {0} could not be locked: not in pending status")]
    NotLocked(i64),

    /// `unlock_url` found the row not in `Processing` status.
    ///
    /// Indicates a logic error upstream (unlocking twice, or unlocking a
    /// row this worker never locked).
    #[error("url {0} could not be unlocked: not in processing status")]
    NotProcessing(i64),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if matches!(err, sqlx::Error::RowNotFound) {
            return Self::Database {
                kind: StoreDbErrorKind::RowNotFound,
                message: err.to_string(),
            };
        }
        Self::Database {
            kind: StoreDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_locked_message_mentions_pending() {
        let err = StoreError::NotLocked(9);
        assert!(err.to_string().contains("pending"));
        assert!(err.to_string().contains('9'));
    }

    #[test]
    fn not_found_message_has_suggestion() {
        let err = StoreError::NotFound(1);
        assert!(err.to_string().contains("Suggestion"));
    }
}
