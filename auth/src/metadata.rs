//! Tokens from an instance metadata endpoint

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use soak_bench_core::{AuthError, Credential, TokenProvider};

/// Header every metadata request carries
pub const METADATA_FLAVOR: (&str, &str) = ("Metadata-Flavor", "Google");

/// Default service-account token endpoint on the instance metadata server
pub const DEFAULT_METADATA_ENDPOINT: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Per-request timeout for the token endpoint
pub const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Fetches a fresh token from the endpoint on every call
///
/// An override token short-circuits the fetch; that is how tests and local
/// runs inject a credential without a metadata server.
pub struct MetadataTokenProvider {
    client: reqwest::Client,
    endpoint: String,
    override_token: Option<String>,
}

impl MetadataTokenProvider {
    /// Provider for the given token endpoint
    ///
    /// # Errors
    /// Returns `AuthError::Config` if the endpoint is empty or the HTTP
    /// client cannot be built.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, AuthError> {
        Self::with_timeout(endpoint, DEFAULT_METADATA_TIMEOUT)
    }

    /// Provider with a custom request timeout
    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(AuthError::Config("metadata endpoint is empty".into()));
        }
        Self::build(endpoint, timeout)
    }

    /// Provider that only ever returns `token` and has no endpoint to fetch from
    pub fn from_override(token: impl Into<String>) -> Result<Self, AuthError> {
        Ok(Self::build(String::new(), DEFAULT_METADATA_TIMEOUT)?.with_override(token))
    }

    fn build(endpoint: String, timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(format!("soak-bench/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AuthError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            override_token: None,
        })
    }

    /// Return this token instead of contacting the endpoint
    pub fn with_override(mut self, token: impl Into<String>) -> Self {
        self.override_token = Some(token.into());
        self
    }

    /// The token endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn fetch(&self) -> Result<Credential, AuthError> {
        let response = self
            .client
            .get(&self.endpoint)
            .header(METADATA_FLAVOR.0, METADATA_FLAVOR.1)
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Status(status.as_u16()));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Malformed(e.to_string()))?;

        if body.access_token.is_empty() {
            return Err(AuthError::Malformed("empty access_token".into()));
        }

        let now = Utc::now();
        let mut credential = Credential::new(body.access_token);
        if let Some(secs) = body.expires_in {
            let lifetime = chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX));
            if let Some(expiry) = now.checked_add_signed(lifetime) {
                credential = credential.with_expiry(expiry);
            }
        }

        tracing::trace!(expires_at = ?credential.expires_at, "Fetched metadata token");
        Ok(credential)
    }
}

#[async_trait]
impl TokenProvider for MetadataTokenProvider {
    fn name(&self) -> &str {
        "metadata"
    }

    async fn acquire(&self) -> Result<Credential, AuthError> {
        if let Some(token) = &self.override_token {
            return Ok(Credential::new(token.clone()));
        }
        self.fetch().await
    }
}

impl std::fmt::Debug for MetadataTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataTokenProvider")
            .field("endpoint", &self.endpoint)
            .field("override_token", &self.override_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
