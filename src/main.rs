//! soak-bench - rate-controlled soak-test load generator

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Run { test, summary_json } => {
            tracing::info!("soak-bench starting...");
            let report = cli::run(&test, summary_json.as_deref()).await?;
            Ok(cli::exit_code(&report))
        }
        Commands::Validate { test } => {
            cli::validate(&test)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
