//! oEmbed metadata lookup collaborator.
//!
//! The real HTML-discovery/provider-matching implementation is out of
//! scope; this module only specifies the trait boundary plus a thin
//! `reqwest`-based "fetch from a configured endpoint" implementation and an
//! in-memory test double.

use async_trait::async_trait;
use thiserror::Error;
use tracing::instrument;

/// Errors fetching oEmbed metadata for a URL.
#[derive(Debug, Error)]
pub enum OEmbedError {
    /// The HTTP request failed.
    #[error("oembed request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The configured endpoint returned a non-success status.
    #[error("oembed endpoint returned status {0}")]
    Status(u16),
}

/// Fetches opaque oEmbed bytes for a URL.
#[async_trait]
pub trait OEmbedClient: Send + Sync {
    /// Fetches the oEmbed response body for `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, OEmbedError>;
}

/// Queries a single configured oEmbed endpoint with `?url=<url>`.
#[derive(Debug, Clone)]
pub struct HttpOEmbedClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpOEmbedClient {
    /// `endpoint` is queried as `{endpoint}?url={url}` for every lookup.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl OEmbedClient for HttpOEmbedClient {
    #[instrument(skip(self), fields(url = %url, endpoint = %self.endpoint))]
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, OEmbedError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("url", url)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(OEmbedError::Status(response.status().as_u16()));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// In-memory [`OEmbedClient`] test double returning a fixed response.
#[derive(Debug, Clone, Default)]
pub struct MemoryOEmbedClient {
    response: Vec<u8>,
}

impl MemoryOEmbedClient {
    /// Always returns `response` regardless of the requested URL.
    #[must_use]
    pub fn with_response(response: Vec<u8>) -> Self {
        Self { response }
    }
}

#[async_trait]
impl OEmbedClient for MemoryOEmbedClient {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, OEmbedError> {
        Ok(self.response.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_client_always_returns_configured_response() {
        let client = MemoryOEmbedClient::with_response(b"fixed".to_vec());
        assert_eq!(client.fetch("https://a").await.unwrap(), b"fixed");
        assert_eq!(client.fetch("https://b").await.unwrap(), b"fixed");
    }

    #[tokio::test]
    async fn http_client_fetches_successful_response_body() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/oembed"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
            .mount(&server)
            .await;

        let client = HttpOEmbedClient::new(format!("{}/oembed", server.uri()));
        let bytes = client.fetch("https://example.com/v").await.unwrap();
        assert_eq!(bytes, b"payload");
    }

    #[tokio::test]
    async fn http_client_surfaces_non_success_status() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/oembed"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = HttpOEmbedClient::new(format!("{}/oembed", server.uri()));
        let result = client.fetch("https://example.com/v").await;
        assert!(matches!(result, Err(OEmbedError::Status(404))));
    }
}
