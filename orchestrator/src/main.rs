use anyhow::Result;
use clap::Parser;

mod agent;
mod args;
mod auth;
#[cfg(feature = "chaos")]
mod chaos;
mod controller;
mod handlers;
mod metrics;
mod reconciler;
mod registry;
mod routing;
mod scheduler;
mod server;
mod state;

use args::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    stark_common::init();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Server(args) => server::run_server(args).await,
        Commands::Health(args) => run_health(args).await,
    }
}

async fn run_health(args: args::HealthArgs) -> Result<()> {
    let url = format!("{}/health", args.endpoint.trim_end_matches('/'));
    let response = reqwest::get(&url).await?;
    let status = response.status();
    let body: serde_json::Value = response.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    if !status.is_success() {
        anyhow::bail!("control plane reported {status}");
    }
    Ok(())
}
