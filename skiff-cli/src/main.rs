//! Skiff CLI
//!
//! Command-line interface for the Skiff orchestrator.

mod commands;
mod config;
mod id_resolver;
mod types;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "skiff")]
#[command(about = "Kubernetes cluster provisioning CLI", long_about = None)]
struct Cli {
    /// Orchestrator URL
    #[arg(long, env = "SKIFF_URL", default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config { url: cli.url };

    handle_command(cli.command, &config).await
}
