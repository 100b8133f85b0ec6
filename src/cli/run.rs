//! `run` and `validate` commands

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use soak_bench_core::{
    ArrivalSchedule, LoadMode, SoakTestBuilder, TestConfig, TestReport, WorkerPoolSizing,
};
use soak_bench_transport::{HttpConfig, PubSubClient, WebSocketConnector};

use super::TestArgs;

/// Exit status for a finished report
pub fn exit_code(report: &TestReport) -> ExitCode {
    match report {
        TestReport::ConnectionUnsuccessful { .. } => ExitCode::from(2),
        TestReport::Completed(summary) if !summary.thresholds_passed() => ExitCode::from(1),
        TestReport::Completed(_) => ExitCode::SUCCESS,
    }
}

/// Build the collaborators, run the test and print the report
pub async fn run(args: &TestArgs, summary_json: Option<&Path>) -> Result<TestReport> {
    let config = args.resolve()?;
    config.validate().context("invalid configuration")?;

    let auth = soak_bench_auth::from_source(&config.credentials)
        .context("failed to set up credential provider")?;

    let mut builder = SoakTestBuilder::new().token_provider(auth);
    builder = match &config.mode {
        LoadMode::Publish => {
            let sizing = WorkerPoolSizing::from_config(&config);
            let http = HttpConfig::default()
                .with_request_timeout(config.request_timeout)
                .with_pool_max_idle(sizing.max_workers);
            let client = PubSubClient::new(&args.endpoint, &config.target, &http)
                .context("failed to set up Pub/Sub client")?;
            builder.transport(Arc::new(client))
        }
        LoadMode::Stream { .. } => {
            let connector = WebSocketConnector::new(config.target.clone())
                .context("failed to set up WebSocket connector")?;
            builder.connector(Arc::new(connector))
        }
    };

    let test = builder.config(config).build().context("failed to build soak test")?;
    let report = test.run_with_signal_handling().await;

    println!("{report}");

    if let Some(path) = summary_json {
        let json = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write summary to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Wrote summary JSON");
    }

    Ok(report)
}

/// Resolve and validate the configuration, then print what a run would do
pub fn validate(args: &TestArgs) -> Result<()> {
    let config: TestConfig = args.resolve()?;
    config.validate().context("invalid configuration")?;

    let sizing = WorkerPoolSizing::from_config(&config);
    let schedule = ArrivalSchedule::from_config(&config);

    println!("Configuration is valid");
    println!("  target:          {}", config.target);
    println!("  mode:            {:?}", config.mode);
    println!("  target rate:     {} msg/s", config.target_rate);
    println!("  batch size:      {}", config.batch_size);
    println!("  operation rate:  {:.3} op/s", schedule.rate());
    println!("  preallocated:    {}", sizing.preallocated);
    println!("  max workers:     {}", sizing.max_workers);
    println!("  duration:        {:?}", config.duration);
    println!("  ramp-up:         {:?}", config.ramp_up);
    Ok(())
}
