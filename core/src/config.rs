//! Test configuration and worker-pool sizing

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where credentials come from
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialSource {
    /// A bearer token supplied once and reused for the whole run
    Static {
        /// The token
        token: String,
    },
    /// Fetched from a credential-issuing endpoint for each operation
    Metadata {
        /// Token endpoint URL
        endpoint: String,
        /// Injected token that bypasses the fetch entirely
        #[serde(default, skip_serializing_if = "Option::is_none")]
        override_token: Option<String>,
        /// Reuse fetched tokens until shortly before they expire
        #[serde(default)]
        cache: bool,
    },
}

impl std::fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialSource::Static { .. } => f
                .debug_struct("Static")
                .field("token", &"<redacted>")
                .finish(),
            CredentialSource::Metadata {
                endpoint,
                override_token,
                cache,
            } => f
                .debug_struct("Metadata")
                .field("endpoint", endpoint)
                .field("override_token", &override_token.as_ref().map(|_| "<redacted>"))
                .field("cache", cache)
                .finish(),
        }
    }
}

/// What a single operation does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadMode {
    /// Publish one batch of messages per operation
    Publish,
    /// Open a streaming connection and hold it
    Stream {
        /// How long each connection is held once streaming
        #[serde(with = "duration_str")]
        hold: Duration,
    },
}

/// Service-level thresholds evaluated at teardown
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Upper bound on p95 latency (milliseconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_p95_latency_ms: Option<f64>,
    /// Lower bound on success rate (0.0 - 1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_success_rate: Option<f64>,
    /// Lower bound on achieved rate as a percentage of target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_achieved_pct: Option<f64>,
}

impl Thresholds {
    /// True when no threshold is configured
    pub fn is_empty(&self) -> bool {
        self.max_p95_latency_ms.is_none()
            && self.min_success_rate.is_none()
            && self.min_achieved_pct.is_none()
    }
}

/// Soak test configuration
///
/// Immutable once validated. `target_rate` is expressed in messages per
/// second; each operation carries `batch_size` messages, so operations are
/// dispatched at `target_rate / batch_size` per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    /// Target messages per second
    pub target_rate: f64,

    /// Messages per operation
    pub batch_size: usize,

    /// Lower bound on worker slots
    pub min_workers: usize,

    /// Total dispatch window
    #[serde(with = "duration_str")]
    pub duration: Duration,

    /// Linear ramp-up window at the start of the run (zero disables)
    #[serde(default, with = "duration_str")]
    pub ramp_up: Duration,

    /// Target resource, e.g. `projects/p/topics/t` or a WebSocket URL
    pub target: String,

    /// Credential strategy
    pub credentials: CredentialSource,

    /// Per-operation transport timeout
    #[serde(default = "default_request_timeout", with = "duration_str")]
    pub request_timeout: Duration,

    /// How long in-flight operations may finish after dispatch stops
    #[serde(default = "default_shutdown_grace", with = "duration_str")]
    pub shutdown_grace: Duration,

    /// Interval between progress log lines (zero disables)
    #[serde(default = "default_progress_interval", with = "duration_str")]
    pub progress_interval: Duration,

    /// Operation type
    #[serde(default = "default_mode")]
    pub mode: LoadMode,

    /// SLO thresholds
    #[serde(default, skip_serializing_if = "Thresholds::is_empty")]
    pub thresholds: Thresholds,

    /// Skip threshold evaluation (debugging aid)
    #[serde(default)]
    pub thresholds_disabled: bool,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_progress_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_mode() -> LoadMode {
    LoadMode::Publish
}

impl TestConfig {
    /// Create a config with the required fields and defaults for the rest
    pub fn new(
        target_rate: f64,
        batch_size: usize,
        duration: Duration,
        target: impl Into<String>,
        credentials: CredentialSource,
    ) -> Self {
        Self {
            target_rate,
            batch_size,
            min_workers: 1,
            duration,
            ramp_up: Duration::ZERO,
            target: target.into(),
            credentials,
            request_timeout: default_request_timeout(),
            shutdown_grace: default_shutdown_grace(),
            progress_interval: default_progress_interval(),
            mode: default_mode(),
            thresholds: Thresholds::default(),
            thresholds_disabled: false,
        }
    }

    /// Set the minimum worker count
    pub fn with_min_workers(mut self, n: usize) -> Self {
        self.min_workers = n;
        self
    }

    /// Set the ramp-up window
    pub fn with_ramp_up(mut self, ramp_up: Duration) -> Self {
        self.ramp_up = ramp_up;
        self
    }

    /// Set the per-operation timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the shutdown grace period
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the progress log interval
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Set the load mode
    pub fn with_mode(mut self, mode: LoadMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the thresholds
    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Operations dispatched per second once fully ramped
    pub fn operation_rate(&self) -> f64 {
        self.target_rate / self.batch_size.max(1) as f64
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.target_rate.is_finite() || self.target_rate <= 0.0 {
            return Err(ConfigError::InvalidRate(format!(
                "target rate must be positive, got {}",
                self.target_rate
            )));
        }

        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(
                "batch size must be at least 1".into(),
            ));
        }

        if self.min_workers == 0 {
            return Err(ConfigError::InvalidWorkers(
                "minimum worker count must be at least 1".into(),
            ));
        }

        if self.duration.is_zero() {
            return Err(ConfigError::InvalidDuration(
                "test duration must be non-zero".into(),
            ));
        }

        if self.ramp_up > self.duration {
            return Err(ConfigError::InvalidDuration(format!(
                "ramp-up ({:?}) exceeds test duration ({:?})",
                self.ramp_up, self.duration
            )));
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidDuration(
                "request timeout must be non-zero".into(),
            ));
        }

        if self.target.trim().is_empty() {
            return Err(ConfigError::MissingTarget);
        }

        match &self.credentials {
            CredentialSource::Static { token } if token.trim().is_empty() => {
                return Err(ConfigError::MissingCredentials(
                    "static token is empty".into(),
                ));
            }
            CredentialSource::Metadata {
                endpoint,
                override_token,
                ..
            } if endpoint.trim().is_empty() && override_token.is_none() => {
                return Err(ConfigError::MissingCredentials(
                    "credential endpoint is empty and no override token was given".into(),
                ));
            }
            _ => {}
        }

        if let LoadMode::Stream { hold } = &self.mode {
            if hold.is_zero() {
                return Err(ConfigError::InvalidDuration(
                    "stream hold duration must be non-zero".into(),
                ));
            }
            if self.batch_size != 1 {
                return Err(ConfigError::InvalidBatchSize(format!(
                    "stream mode opens one connection per operation, batch size must be 1 (got {})",
                    self.batch_size
                )));
            }
        }

        if let Some(rate) = self.thresholds.min_success_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::InvalidThreshold(format!(
                    "min success rate must be within [0, 1], got {rate}"
                )));
            }
        }

        Ok(())
    }
}

/// Worker pool bounds derived from a [`TestConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolSizing {
    /// Slots expected to be busy in steady state
    pub preallocated: usize,
    /// Hard cap on in-flight operations
    pub max_workers: usize,
}

impl WorkerPoolSizing {
    /// Derive pool bounds
    ///
    /// `preallocated = max(min, ceil(rate / (batch * 2)))` and
    /// `max = max(min * 2, ceil(rate / batch), preallocated)`.
    pub fn from_config(config: &TestConfig) -> Self {
        let batch = config.batch_size.max(1) as f64;
        let min = config.min_workers;

        let preallocated = min.max((config.target_rate / (batch * 2.0)).ceil() as usize);
        let max_workers = (min.saturating_mul(2))
            .max((config.target_rate / batch).ceil() as usize)
            .max(preallocated);

        Self {
            preallocated,
            max_workers,
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Target rate is not positive
    #[error("Invalid rate: {0}")]
    InvalidRate(String),

    /// Batch size is zero
    #[error("Invalid batch size: {0}")]
    InvalidBatchSize(String),

    /// Worker bound is zero
    #[error("Invalid worker count: {0}")]
    InvalidWorkers(String),

    /// A duration is zero or inconsistent
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// No target resource
    #[error("Missing target resource")]
    MissingTarget,

    /// Credential source unusable
    #[error("Missing credential source: {0}")]
    MissingCredentials(String),

    /// Threshold out of range
    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    /// Duration string does not parse
    #[error("Invalid duration string: {0}")]
    DurationSyntax(String),
}

/// Parse a duration such as `"250ms"`, `"30s"`, `"15m"`, `"2h"` or `"300"`
/// (bare numbers are seconds).
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ConfigError::DurationSyntax("empty duration".into()));
    }

    let (num, unit_secs) = if let Some(n) = s.strip_suffix("ms") {
        (n, 0.001)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3600.0)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60.0)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1.0)
    } else {
        (s, 1.0)
    };

    let value: f64 = num
        .trim()
        .parse()
        .map_err(|_| ConfigError::DurationSyntax(s.to_string()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::DurationSyntax(s.to_string()));
    }

    Duration::try_from_secs_f64(value * unit_secs)
        .map_err(|_| ConfigError::DurationSyntax(format!("{s} is out of range")))
}

/// Format a duration in the form accepted by [`parse_duration`]
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms % 1000 != 0 {
        format!("{ms}ms")
    } else {
        let secs = d.as_secs();
        if secs != 0 && secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs != 0 && secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{secs}s")
        }
    }
}

mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
