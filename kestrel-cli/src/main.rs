//! Kestrel CLI
//!
//! Command-line bridge between local optimization models and the NEOS
//! job-submission service.

mod commands;
mod config;
mod driver;
mod queue;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use colored::Colorize as _;
use kestrel_client::NeosClient;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::{Commands, handle_command};
use config::Config;
use driver::{JobDriver, Outcome};
use queue::JobQueueStore;

#[derive(Parser)]
#[command(name = "kestrel")]
#[command(about = "Submit and manage optimization jobs on the NEOS server", version)]
struct Cli {
    /// NEOS server host[:port] override
    #[arg(long, env = "NEOS_SERVER")]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<Outcome> {
    let config = Config::from_env(cli.server.as_deref())?;
    let client =
        NeosClient::connect(&config.host, config.port, config.submitted_by.clone()).await?;
    let store = JobQueueStore::for_session(config.session_id.as_deref());
    let driver = JobDriver::new(Arc::new(client), config, store);
    handle_command(cli.command, &driver).await
}
