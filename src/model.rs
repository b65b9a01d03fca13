//! Core domain types shared across the broker, store, and manager layers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle state of a [`Url`] row.
///
/// Transitions only ever flow `Pending -> Processing -> {Success, Failure}`;
/// see [`crate::store::Store::lock_url`] and [`crate::store::Store::unlock_url`]
/// for the conditional updates that enforce this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    /// Waiting to be picked up by a worker.
    Pending,
    /// Locked by a worker; the extraction subprocess is running.
    Processing,
    /// Terminal: download succeeded and the artifact was uploaded.
    Success,
    /// Terminal: download failed (permanently, or retries exhausted).
    Failure,
}

impl UrlStatus {
    /// Database string representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for UrlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for UrlStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            _ => Err(format!("invalid url status: {s}")),
        }
    }
}

/// A URL row tracked by the pipeline.
#[derive(Debug, Clone, FromRow)]
pub struct Url {
    /// Primary key.
    pub id: i64,
    /// The source URL string.
    pub url: String,
    /// Current lifecycle state (stored as text, parsed via [`Url::status`]).
    #[sqlx(rename = "status")]
    pub status_str: String,
    /// Failure message, present only when `status == Failure`.
    pub error: Option<String>,
    /// Storage key of the uploaded artifact, present only when `status == Success`.
    pub file: Option<String>,
    /// Retry counter; `None` for originally-created URLs, `Some(n)` for Retrier successors.
    pub retries: Option<i64>,
    /// Append-only log lines, stored as a JSON array (see [`Url::parse_logs`]).
    pub logs: String,
    /// Opaque oEmbed payload, set by [`crate::worker_manager::WorkerManager::get_oembed`].
    pub oembed: Option<Vec<u8>>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last row mutation time.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker; rows with this set are excluded from listings.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Url {
    /// Returns the parsed status enum.
    ///
    /// Falls back to `Pending` if the status string is somehow invalid -
    /// the `CHECK` constraint on the `urls` table makes this unreachable
    /// in practice, but `status_str` is still a plain `String` at the type
    /// level.
    #[must_use]
    pub fn status(&self) -> UrlStatus {
        self.status_str.parse().unwrap_or(UrlStatus::Pending)
    }

    /// Parses the `logs` column into an ordered vector of lines.
    ///
    /// Returns an empty vector if the column is empty or not valid JSON.
    #[must_use]
    pub fn parse_logs(&self) -> Vec<String> {
        serde_json::from_str(&self.logs).unwrap_or_default()
    }

    /// Serializes a log-line vector to the JSON array form stored in the `logs` column.
    #[must_use]
    pub fn serialize_logs(logs: &[String]) -> String {
        serde_json::to_string(logs).unwrap_or_else(|_| "[]".to_string())
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Url {{ id: {}, url: {}, status: {} }}",
            self.id,
            self.url,
            self.status()
        )
    }
}

/// Dedup key row for playlist expansion; see [`crate::playlist_loader::PlaylistLoader`].
#[derive(Debug, Clone, FromRow)]
pub struct ExternalVideo {
    /// Primary key.
    pub id: i64,
    /// The playlist provider's stable identifier for this video.
    pub external_id: String,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

/// Broker message body: identifies the URL row an event concerns.
///
/// `url` is included only as a hint for handlers that want it without an
/// extra store round-trip; the row itself is the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    /// The `Url` row's primary key.
    pub id: i64,
    /// The source URL, when known at send time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl EventPayload {
    /// Builds a payload for a newly created URL.
    #[must_use]
    pub fn new(id: i64, url: impl Into<String>) -> Self {
        Self {
            id,
            url: Some(url.into()),
        }
    }

    /// Encodes this payload as the JSON string the broker transports.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (unreachable in practice for
    /// this type, but kept fallible since it crosses the broker boundary).
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes a payload previously produced by [`EventPayload::encode`].
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` is not a valid encoded payload.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn url_status_as_str_roundtrips_through_from_str() {
        for status in [
            UrlStatus::Pending,
            UrlStatus::Processing,
            UrlStatus::Success,
            UrlStatus::Failure,
        ] {
            assert_eq!(status.as_str().parse::<UrlStatus>().unwrap(), status);
        }
    }

    #[test]
    fn url_status_from_str_rejects_unknown() {
        let result = "bogus".parse::<UrlStatus>();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("invalid url status"));
    }

    #[test]
    fn url_status_display_matches_as_str() {
        assert_eq!(UrlStatus::Processing.to_string(), "processing");
    }

    fn sample_url(status_str: &str, logs: &str) -> Url {
        let now = Utc::now();
        Url {
            id: 1,
            url: "https://example.com/watch".to_string(),
            status_str: status_str.to_string(),
            error: None,
            file: None,
            retries: None,
            logs: logs.to_string(),
            oembed: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn parse_logs_empty_string_is_empty_vec() {
        assert!(sample_url("pending", "").parse_logs().is_empty());
    }

    #[test]
    fn parse_logs_roundtrips_serialize_logs() {
        let lines = vec!["a".to_string(), "b".to_string()];
        let encoded = Url::serialize_logs(&lines);
        assert_eq!(sample_url("pending", &encoded).parse_logs(), lines);
    }

    #[test]
    fn parse_logs_invalid_json_is_empty_vec() {
        assert!(sample_url("pending", "not json").parse_logs().is_empty());
    }

    #[test]
    fn status_falls_back_to_pending_on_invalid_string() {
        assert_eq!(sample_url("garbage", "[]").status(), UrlStatus::Pending);
    }

    #[test]
    fn event_payload_encode_decode_roundtrip() {
        let payload = EventPayload::new(42, "https://example.com/v");
        let encoded = payload.encode().unwrap();
        let decoded = EventPayload::decode(&encoded).unwrap();
        assert_eq!(decoded.id, 42);
        assert_eq!(decoded.url.as_deref(), Some("https://example.com/v"));
    }

    #[test]
    fn event_payload_decode_ignores_unknown_fields() {
        let decoded = EventPayload::decode(r#"{"id": 7, "extra": "ignored"}"#).unwrap();
        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.url, None);
    }
}
