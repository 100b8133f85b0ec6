//! Core traits for transports and credential providers
//!
//! These traits are defined in core to avoid circular dependencies.
//! Implementations live in their respective crates (transport/, auth/).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::request::EncodedBatch;

// ============================================================================
// Credentials
// ============================================================================

/// Opaque bearer credential
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    /// When the credential was obtained
    pub acquired_at: DateTime<Utc>,
    /// When the issuer says it stops being valid, if known
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Wrap a token acquired now
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            acquired_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Attach an expiry
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// The raw token
    pub fn token(&self) -> &str {
        &self.token
    }

    /// `Authorization` header value
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// True once `now + margin` passes the expiry (never for credentials
    /// without one)
    pub fn expires_within(&self, margin: Duration) -> bool {
        match self.expires_at {
            Some(expiry) => chrono::Duration::from_std(margin)
                .ok()
                .and_then(|margin| Utc::now().checked_add_signed(margin))
                .map_or(true, |deadline| deadline >= expiry),
            None => false,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("acquired_at", &self.acquired_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Supplies a credential for each operation
///
/// Must be safe to call concurrently from every worker. Each call is an
/// independent acquisition unless the implementation documents caching.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Strategy name for logs (e.g. "static", "metadata")
    fn name(&self) -> &str;

    /// Obtain a credential
    async fn acquire(&self) -> Result<Credential, AuthError>;
}

/// Credential acquisition errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Issuer answered with a non-success status
    #[error("credential endpoint returned status {0}")]
    Status(u16),

    /// Issuer could not be reached
    #[error("credential request failed: {0}")]
    Request(String),

    /// Issuer answered with an unusable body
    #[error("credential response malformed: {0}")]
    Malformed(String),

    /// Provider is misconfigured
    #[error("credential provider misconfigured: {0}")]
    Config(String),
}

// ============================================================================
// Publish transport
// ============================================================================

/// Raw transport response; validation happens in the executor
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// Create a response
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Publishes batches to the target and probes it during setup
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport identifier for logs
    fn name(&self) -> &str;

    /// Read-only metadata request against the target; returns the status
    async fn probe(&self, credential: &Credential) -> Result<u16, TransportError>;

    /// Send one encoded batch
    async fn publish(
        &self,
        batch: &EncodedBatch,
        credential: &Credential,
    ) -> Result<TransportResponse, TransportError>;
}

/// Transport-level errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection or protocol failure
    #[error("connection error: {0}")]
    Connection(String),

    /// Transport-side timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Streaming handshake was refused
    #[error("handshake rejected with status {0}")]
    Rejected(u16),

    /// Bad target or client configuration
    #[error("configuration error: {0}")]
    Config(String),
}

// ============================================================================
// Streaming transport
// ============================================================================

/// Something a streaming connection produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A data frame of the given size
    Message {
        /// Payload bytes
        bytes: usize,
    },
    /// The server closed the connection
    Closed,
}

/// An open, authenticated streaming connection
#[async_trait]
pub trait StreamConnection: Send {
    /// Wait for the next event
    async fn next_event(&mut self) -> Result<StreamEvent, TransportError>;

    /// Close from the client side
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens streaming connections to the target
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Connector identifier for logs
    fn name(&self) -> &str;

    /// Connect and authenticate with the credential
    async fn connect(
        &self,
        credential: &Credential,
    ) -> Result<Box<dyn StreamConnection>, TransportError>;
}
