//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod account;
mod kube;
mod pipeline;
mod workflow;

pub use account::AccountCommands;
pub use kube::KubeCommands;
pub use pipeline::PipelineCommands;
pub use workflow::WorkflowCommands;

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use skiff_core::domain::kube::TaskIds;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Cluster management
    Kube {
        #[command(subcommand)]
        command: KubeCommands,
    },
    /// Inspect and control provisioning tasks
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },
    /// Cloud account management
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },
    /// Registered pipelines
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Kube { command } => kube::handle_kube_command(command, config).await,
        Commands::Workflow { command } => workflow::handle_workflow_command(command, config).await,
        Commands::Account { command } => account::handle_account_command(command, config).await,
        Commands::Pipeline { command } => pipeline::handle_pipeline_command(command, config).await,
    }
}

/// Print task ids grouped by role
fn print_task_ids(tasks: &TaskIds) {
    for (role, ids) in tasks {
        for id in ids {
            println!("  {:<8} {}", role.cyan(), id);
        }
    }
}
