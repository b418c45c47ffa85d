//! Workflow command handlers
//!
//! A workflow is one task: a pipeline run against a single machine or
//! cluster.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use skiff_client::SkiffClient;
use skiff_core::domain::log::{LogEntry, LogLevel};
use skiff_core::domain::task::{Status, TaskSnapshot};
use uuid::Uuid;

use crate::config::Config;

/// Workflow subcommands
#[derive(Subcommand)]
pub enum WorkflowCommands {
    /// Show the step statuses of a task
    Get {
        /// Task ID
        id: Uuid,
    },
    /// Show task output
    Logs {
        /// Task ID
        id: Uuid,
    },
    /// Resume a failed or cancelled task from its first unfinished step
    Restart {
        /// Task ID
        id: Uuid,
    },
    /// Cancel a running task
    Cancel {
        /// Task ID
        id: Uuid,
    },
}

pub async fn handle_workflow_command(command: WorkflowCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        WorkflowCommands::Get { id } => get_workflow(&client, id).await,
        WorkflowCommands::Logs { id } => get_logs(&client, id).await,
        WorkflowCommands::Restart { id } => {
            client.restart_workflow(id).await?;
            println!("{}", format!("✓ Task {} restarted", id).green().bold());
            Ok(())
        }
        WorkflowCommands::Cancel { id } => {
            client.cancel_workflow(id).await?;
            println!("{}", format!("✓ Cancellation requested for {}", id).green().bold());
            Ok(())
        }
    }
}

async fn get_workflow(client: &SkiffClient, id: Uuid) -> Result<()> {
    let task = client.get_workflow(id).await?;
    print_task(&task);
    Ok(())
}

async fn get_logs(client: &SkiffClient, id: Uuid) -> Result<()> {
    let logs = client.get_logs(id).await?;

    if logs.is_empty() {
        println!("{}", "No logs found for this task.".yellow());
    } else {
        println!("{}", format!("Logs for task {}:", id).bold());
        println!("{}", "─".repeat(80).dimmed());
        for log in logs {
            print_log_entry(&log);
        }
        println!("{}", "─".repeat(80).dimmed());
    }

    Ok(())
}

fn print_task(task: &TaskSnapshot) {
    println!("{}", "Task Details:".bold());
    println!("  ID:       {}", task.id.to_string().cyan());
    println!("  Pipeline: {}", task.pipeline);
    println!("  Cluster:  {}", task.cluster_id.to_string().dimmed());
    println!("  Status:   {}", colorize_status(&task.status()));
    println!("  Attempt:  {}", task.attempt);
    println!("  Created:  {}", task.created_at.format("%Y-%m-%d %H:%M:%S"));

    println!("\n{}", "Steps:".bold());
    for step in &task.step_statuses {
        let duration = match (step.started_at, step.finished_at) {
            (Some(started), Some(finished)) => {
                format!("{}s", finished.signed_duration_since(started).num_seconds())
            }
            _ => String::new(),
        };
        println!(
            "  {:<28} {:<10} {}",
            step.step,
            colorize_status(&step.status),
            duration.dimmed()
        );
        if let Some(error) = &step.error_message {
            println!("    {}", error.red());
        }
    }
}

/// Print a log entry
fn print_log_entry(log: &LogEntry) {
    let level_str = format!("{:?}", log.level).to_uppercase();
    let level_colored = match log.level {
        LogLevel::Debug => level_str.dimmed(),
        LogLevel::Info => level_str.cyan(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Error => level_str.red(),
    };

    println!(
        "{} [{}] {}",
        log.timestamp.format("%H:%M:%S").to_string().dimmed(),
        level_colored,
        log.message
    );
}

fn colorize_status(status: &Status) -> ColoredString {
    let status_str = format!("{:?}", status).to_lowercase();
    match status {
        Status::Todo => status_str.dimmed(),
        Status::Executing => status_str.cyan(),
        Status::Success => status_str.green(),
        Status::Error => status_str.red(),
        Status::Cancelled => status_str.yellow(),
        Status::Skipped => status_str.dimmed(),
    }
}
