//! Pipeline command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;

use crate::config::Config;

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// List registered pipelines and their steps
    List,
}

pub async fn handle_pipeline_command(command: PipelineCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        PipelineCommands::List => {
            let pipelines = client.list_pipelines().await?;

            println!("{}", format!("Found {} pipeline(s):", pipelines.len()).bold());
            println!();
            for pipeline in pipelines {
                println!("  {} {}", "▸".cyan(), pipeline.name.bold());
                println!("    {}", pipeline.steps.join(" → ").dimmed());
            }
            Ok(())
        }
    }
}
