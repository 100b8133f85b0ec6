//! Error types for soak-bench-core
//!
//! Only configuration and precondition problems surface as errors. Everything
//! that goes wrong while an individual operation runs is a [`FailureReason`]
//! recorded in the metrics and never escalated.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad classification of a [`BenchError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchErrorKind {
    /// Invalid configuration value
    Config,
    /// A required builder field was never set
    MissingConfig,
    /// Setup precondition (credential or probe) failed
    Precondition,
    /// Run orchestration failed (task join errors and similar)
    Orchestration,
    /// Metrics structures could not be created
    Metrics,
}

impl std::fmt::Display for BenchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BenchErrorKind::Config => "configuration error",
            BenchErrorKind::MissingConfig => "missing configuration",
            BenchErrorKind::Precondition => "precondition failed",
            BenchErrorKind::Orchestration => "orchestration error",
            BenchErrorKind::Metrics => "metrics error",
        };
        f.write_str(s)
    }
}

/// Core error type
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct BenchError {
    /// Error classification
    pub kind: BenchErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl BenchError {
    /// Create an error of the given kind
    pub fn new(kind: BenchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Invalid configuration value
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(BenchErrorKind::Config, message)
    }

    /// A builder was finalized without a required field
    pub fn missing_config(field: &str) -> Self {
        Self::new(
            BenchErrorKind::MissingConfig,
            format!("required field `{field}` was not set"),
        )
    }

    /// Setup precondition failed
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(BenchErrorKind::Precondition, message)
    }

    /// Orchestration failure
    pub fn orchestration(message: impl Into<String>) -> Self {
        Self::new(BenchErrorKind::Orchestration, message)
    }

    /// Metrics construction failure
    pub fn metrics(message: impl Into<String>) -> Self {
        Self::new(BenchErrorKind::Metrics, message)
    }
}

/// Result type alias
pub type BenchResult<T> = std::result::Result<T, BenchError>;

/// Why a single operation did not count as a success
///
/// The string forms are stable: they appear in logs and in the summary's
/// failure breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    /// Payload could not be serialized
    Serialization,
    /// Credential provider returned no credential
    AuthUnavailable,
    /// Transport call failed before a response arrived
    TransportError,
    /// Transport call exceeded the request timeout
    Timeout,
    /// Response status was not 2xx
    HttpStatus,
    /// Response body did not parse as the expected shape
    InvalidResponse,
    /// Response parsed but reported zero accepted units
    NoMessagesAccepted,
    /// Streaming session closed before it started streaming
    StreamInterrupted,
    /// Still in flight when the shutdown grace period ran out
    TimeoutAtShutdown,
    /// Dispatch was due while every worker slot was busy
    SchedulingCapacityExceeded,
}

impl FailureReason {
    /// All reasons, in summary display order
    pub const ALL: [FailureReason; 10] = [
        FailureReason::Serialization,
        FailureReason::AuthUnavailable,
        FailureReason::TransportError,
        FailureReason::Timeout,
        FailureReason::HttpStatus,
        FailureReason::InvalidResponse,
        FailureReason::NoMessagesAccepted,
        FailureReason::StreamInterrupted,
        FailureReason::TimeoutAtShutdown,
        FailureReason::SchedulingCapacityExceeded,
    ];

    /// Stable identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Serialization => "serialization",
            FailureReason::AuthUnavailable => "auth-unavailable",
            FailureReason::TransportError => "transport-error",
            FailureReason::Timeout => "timeout",
            FailureReason::HttpStatus => "http-status",
            FailureReason::InvalidResponse => "invalid-response",
            FailureReason::NoMessagesAccepted => "no-messages-accepted",
            FailureReason::StreamInterrupted => "stream-interrupted",
            FailureReason::TimeoutAtShutdown => "timeout-at-shutdown",
            FailureReason::SchedulingCapacityExceeded => "scheduling-capacity-exceeded",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            FailureReason::Serialization => 0,
            FailureReason::AuthUnavailable => 1,
            FailureReason::TransportError => 2,
            FailureReason::Timeout => 3,
            FailureReason::HttpStatus => 4,
            FailureReason::InvalidResponse => 5,
            FailureReason::NoMessagesAccepted => 6,
            FailureReason::StreamInterrupted => 7,
            FailureReason::TimeoutAtShutdown => 8,
            FailureReason::SchedulingCapacityExceeded => 9,
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}
