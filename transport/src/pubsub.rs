//! Pub/Sub REST publish client

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use soak_bench_core::{Credential, EncodedBatch, Transport, TransportError, TransportResponse};

use crate::HttpConfig;

/// Public Pub/Sub API endpoint
pub const DEFAULT_PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com";

/// Publishes batches to one topic
///
/// `topic` is the full resource path, e.g. `projects/p/topics/t`. Requests go
/// to `POST {endpoint}/v1/{topic}:publish`; the setup probe is
/// `GET {endpoint}/v1/{topic}`.
#[derive(Debug, Clone)]
pub struct PubSubClient {
    client: reqwest::Client,
    publish_url: String,
    topic_url: String,
    config: HttpConfig,
}

impl PubSubClient {
    /// Create a client for `topic` on `endpoint`
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Config` for an empty endpoint or topic, or if
    /// the HTTP client cannot be built.
    pub fn new(endpoint: &str, topic: &str, config: &HttpConfig) -> Result<Self, TransportError> {
        let endpoint = endpoint.trim().trim_end_matches('/');
        let topic = topic.trim().trim_matches('/');
        if endpoint.is_empty() {
            return Err(TransportError::Config("endpoint is empty".into()));
        }
        if topic.is_empty() {
            return Err(TransportError::Config("topic is empty".into()));
        }

        let client = config
            .build_client()
            .map_err(|e| TransportError::Config(format!("failed to build HTTP client: {e}")))?;

        let topic_url = format!("{endpoint}/v1/{topic}");
        Ok(Self {
            client,
            publish_url: format!("{topic_url}:publish"),
            topic_url,
            config: config.clone(),
        })
    }

    /// Publish URL
    pub fn publish_url(&self) -> &str {
        &self.publish_url
    }

    /// Topic metadata URL used by the probe
    pub fn topic_url(&self) -> &str {
        &self.topic_url
    }

    fn map_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.config.request_timeout)
        } else {
            TransportError::Connection(e.to_string())
        }
    }
}

#[async_trait]
impl Transport for PubSubClient {
    fn name(&self) -> &str {
        "pubsub"
    }

    async fn probe(&self, credential: &Credential) -> Result<u16, TransportError> {
        let response = self
            .client
            .get(&self.topic_url)
            .header(AUTHORIZATION, credential.bearer())
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status().as_u16();
        tracing::debug!(url = %self.topic_url, status, "Probed topic");
        Ok(status)
    }

    async fn publish(
        &self,
        batch: &EncodedBatch,
        credential: &Credential,
    ) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(&self.publish_url)
            .header(AUTHORIZATION, credential.bearer())
            .header(CONTENT_TYPE, "application/json")
            .body(batch.body.clone())
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| self.map_error(e))?;

        Ok(TransportResponse::new(status, body.to_vec()))
    }
}
