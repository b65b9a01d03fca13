//! Logical queue names shared by the server, worker, and retrier.

/// Primary queue: new or retried URLs awaiting download.
pub const DOWNLOAD_URL: &str = "download-url";

/// Primary queue: URLs awaiting oEmbed metadata lookup.
pub const GET_OEMBED: &str = "get-oembed";

/// In-flight auxiliary list for `queue`, per [`crate::broker::Broker::receive`].
#[must_use]
pub fn tmp_of(queue: &str) -> String {
    format!("{queue}:tmp")
}

/// Dead-letter auxiliary list for `queue`, per [`crate::broker::Broker::receive`].
#[must_use]
pub fn failed_of(queue: &str) -> String {
    format!("{queue}:failed")
}
