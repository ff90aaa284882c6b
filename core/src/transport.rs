//! Transport seam between the engine and its two collaborators.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::HeaderValue;
use serde_json::Value;

use crate::error::ReplayError;
use crate::error::Result;

/// Raw response body, chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Opens one streaming request. Implementations must not retry; a dropped
/// transport is terminal for the read that owns it.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn open(&self, endpoint: &str, body: Value) -> Result<ByteStream>;
}

/// `reqwest`-backed transport: POST JSON, stream the body back.
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Useful for testing or custom TLS/proxy setups.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventTransport for HttpTransport {
    async fn open(&self, endpoint: &str, body: Value) -> Result<ByteStream> {
        let response = self
            .client
            .post(endpoint)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(endpoint, status = status.as_u16(), "stream request rejected");
            return Err(ReplayError::Http {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(endpoint, "stream opened");
        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(ReplayError::from)),
        ))
    }
}
