//! CLI argument parsing and command dispatch

mod run;

pub use run::{exit_code, run, validate};

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use soak_bench_auth::DEFAULT_METADATA_ENDPOINT;
use soak_bench_core::{parse_duration, CredentialSource, LoadMode, TestConfig};
use soak_bench_transport::DEFAULT_PUBSUB_ENDPOINT;

#[derive(Parser)]
#[command(name = "soak-bench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a soak test
    Run {
        #[command(flatten)]
        test: TestArgs,

        /// Write the final report as pretty JSON
        #[arg(long, value_name = "PATH")]
        summary_json: Option<PathBuf>,
    },
    /// Validate the configuration and print the worker-pool sizing
    Validate {
        #[command(flatten)]
        test: TestArgs,
    },
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

/// Every test setting, from flags or `SOAK_*` variables
///
/// With `--config`, the file supplies the base configuration and any flag
/// given here overrides the matching field.
#[derive(Args, Default)]
pub struct TestArgs {
    /// JSON configuration file
    #[arg(short, long, env = "SOAK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Target messages per second
    #[arg(long, env = "SOAK_TARGET_RATE")]
    pub target_rate: Option<f64>,

    /// Messages per operation
    #[arg(long, env = "SOAK_BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Lower bound on worker slots
    #[arg(long, env = "SOAK_MIN_WORKERS")]
    pub min_workers: Option<usize>,

    /// Dispatch window, e.g. `30m`
    #[arg(long, env = "SOAK_DURATION", value_parser = duration_arg)]
    pub duration: Option<Duration>,

    /// Linear ramp-up at the start of the run
    #[arg(long, env = "SOAK_RAMP_UP", value_parser = duration_arg)]
    pub ramp_up: Option<Duration>,

    /// Topic path (`projects/p/topics/t`) or WebSocket URL
    #[arg(long, env = "SOAK_TOPIC")]
    pub topic: Option<String>,

    /// Pub/Sub API endpoint
    #[arg(long, env = "SOAK_PUBSUB_ENDPOINT", default_value = DEFAULT_PUBSUB_ENDPOINT)]
    pub endpoint: String,

    /// Static bearer token
    #[arg(long, env = "SOAK_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Fetch tokens from this metadata endpoint
    #[arg(long, env = "SOAK_METADATA_ENDPOINT")]
    pub metadata_endpoint: Option<String>,

    /// Token returned instead of contacting the metadata endpoint
    #[arg(long, env = "SOAK_OVERRIDE_TOKEN", hide_env_values = true)]
    pub override_token: Option<String>,

    /// Reuse metadata tokens until shortly before they expire
    #[arg(long, env = "SOAK_CACHE_CREDENTIALS")]
    pub cache_credentials: bool,

    /// Per-operation timeout
    #[arg(long, env = "SOAK_REQUEST_TIMEOUT", value_parser = duration_arg)]
    pub request_timeout: Option<Duration>,

    /// How long in-flight operations may finish after dispatch stops
    #[arg(long, env = "SOAK_SHUTDOWN_GRACE", value_parser = duration_arg)]
    pub shutdown_grace: Option<Duration>,

    /// Interval between progress lines (0 disables)
    #[arg(long, env = "SOAK_PROGRESS_INTERVAL", value_parser = duration_arg)]
    pub progress_interval: Option<Duration>,

    /// Stream mode: hold each WebSocket connection this long
    #[arg(long, env = "SOAK_STREAM_HOLD", value_parser = duration_arg)]
    pub stream_hold: Option<Duration>,

    /// Fail the run if p95 latency exceeds this (ms)
    #[arg(long, env = "SOAK_MAX_P95_MS")]
    pub max_p95_ms: Option<f64>,

    /// Fail the run if the success rate drops below this (0-1)
    #[arg(long, env = "SOAK_MIN_SUCCESS_RATE")]
    pub min_success_rate: Option<f64>,

    /// Fail the run if achieved/target drops below this percentage
    #[arg(long, env = "SOAK_MIN_ACHIEVED_PCT")]
    pub min_achieved_pct: Option<f64>,

    /// Skip threshold evaluation
    #[arg(long, env = "SOAK_DISABLE_THRESHOLDS")]
    pub disable_thresholds: bool,
}

impl TestArgs {
    /// Build the test configuration from the file (if any) and the flags
    pub fn resolve(&self) -> Result<TestConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => self.config_from_flags()?,
        };
        self.apply_overrides(&mut config);
        Ok(config)
    }

    fn config_from_flags(&self) -> Result<TestConfig> {
        let Some(target_rate) = self.target_rate else {
            bail!("--target-rate is required without --config");
        };
        let Some(duration) = self.duration else {
            bail!("--duration is required without --config");
        };
        let Some(topic) = &self.topic else {
            bail!("--topic is required without --config");
        };
        let Some(credentials) = self.credentials() else {
            bail!("one of --token, --metadata-endpoint or --override-token is required");
        };

        Ok(TestConfig::new(
            target_rate,
            self.batch_size.unwrap_or(1),
            duration,
            topic.clone(),
            credentials,
        ))
    }

    fn credentials(&self) -> Option<CredentialSource> {
        if let Some(token) = &self.token {
            return Some(CredentialSource::Static {
                token: token.clone(),
            });
        }
        if self.metadata_endpoint.is_none() && self.override_token.is_none() {
            return None;
        }
        Some(CredentialSource::Metadata {
            endpoint: self
                .metadata_endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_METADATA_ENDPOINT.to_string()),
            override_token: self.override_token.clone(),
            cache: self.cache_credentials,
        })
    }

    fn apply_overrides(&self, config: &mut TestConfig) {
        if let Some(rate) = self.target_rate {
            config.target_rate = rate;
        }
        if let Some(batch) = self.batch_size {
            config.batch_size = batch;
        }
        if let Some(n) = self.min_workers {
            config.min_workers = n;
        }
        if let Some(d) = self.duration {
            config.duration = d;
        }
        if let Some(d) = self.ramp_up {
            config.ramp_up = d;
        }
        if let Some(topic) = &self.topic {
            config.target = topic.clone();
        }
        if let Some(credentials) = self.credentials() {
            config.credentials = credentials;
        }
        if let Some(d) = self.request_timeout {
            config.request_timeout = d;
        }
        if let Some(d) = self.shutdown_grace {
            config.shutdown_grace = d;
        }
        if let Some(d) = self.progress_interval {
            config.progress_interval = d;
        }
        if let Some(hold) = self.stream_hold {
            config.mode = LoadMode::Stream { hold };
        }
        if let Some(ms) = self.max_p95_ms {
            config.thresholds.max_p95_latency_ms = Some(ms);
        }
        if let Some(rate) = self.min_success_rate {
            config.thresholds.min_success_rate = Some(rate);
        }
        if let Some(pct) = self.min_achieved_pct {
            config.thresholds.min_achieved_pct = Some(pct);
        }
        if self.disable_thresholds {
            config.thresholds_disabled = true;
        }
    }
}

fn load_config(path: &PathBuf) -> Result<TestConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}
