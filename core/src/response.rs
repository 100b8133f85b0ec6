//! Transport responses and operation outcomes

use serde::{Deserialize, Serialize};

use crate::error::FailureReason;
use crate::traits::TransportResponse;

/// Successful publish response body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    /// Identifiers the service assigned, one per accepted message
    #[serde(default)]
    pub message_ids: Vec<String>,
}

impl PublishResponse {
    /// Units the service acknowledged
    pub fn accepted_count(&self) -> usize {
        self.message_ids.len()
    }
}

/// Apply both success checks to a raw response
///
/// The status must be 2xx and the body must parse with a positive accepted
/// count. Returns the accepted count on success.
pub fn validate_publish(response: &TransportResponse) -> Result<usize, FailureReason> {
    if !response.is_success() {
        return Err(FailureReason::HttpStatus);
    }

    let parsed: PublishResponse =
        serde_json::from_slice(&response.body).map_err(|_| FailureReason::InvalidResponse)?;

    match parsed.accepted_count() {
        0 => Err(FailureReason::NoMessagesAccepted),
        n => Ok(n),
    }
}

/// Result of one operation, consumed immediately by the aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationOutcome {
    /// Both checks passed
    pub success: bool,
    /// Round-trip latency in milliseconds, when the transport was reached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    /// Bytes sent (publish) or received (stream)
    pub payload_bytes: usize,
    /// Messages this operation carried
    pub messages: usize,
    /// Units the service acknowledged (publish) or delivered (stream)
    pub accepted: usize,
    /// Why the operation failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    /// Human-readable detail for logs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl OperationOutcome {
    /// A successful operation
    pub fn success(latency_ms: f64, payload_bytes: usize, messages: usize, accepted: usize) -> Self {
        Self {
            success: true,
            latency_ms: Some(latency_ms),
            payload_bytes,
            messages,
            accepted,
            failure: None,
            detail: None,
        }
    }

    /// A failed operation
    pub fn failure(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            latency_ms: None,
            payload_bytes: 0,
            messages: 0,
            accepted: 0,
            failure: Some(reason),
            detail: Some(detail.into()),
        }
    }

    /// Attach the latency measured before the failure was detected
    pub fn with_latency(mut self, latency_ms: f64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Attach the payload size
    pub fn with_payload_bytes(mut self, bytes: usize) -> Self {
        self.payload_bytes = bytes;
        self
    }
}
