//! Cluster command handlers
//!
//! Provisioning, inspection, scaling and deletion of clusters.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use skiff_client::SkiffClient;
use skiff_core::domain::kube::{Kube, KubeState};
use skiff_core::domain::machine::Machine;
use skiff_core::domain::profile::{NodeSpec, Profile};
use skiff_core::dto::provision::ProvisionRequest;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use super::print_task_ids;
use crate::config::Config;
use crate::id_resolver::resolve_kube_id;

/// Cluster subcommands
#[derive(Subcommand)]
pub enum KubeCommands {
    /// Provision a new cluster from a profile file
    Provision {
        /// Cluster name
        #[arg(short, long)]
        name: String,

        /// Cloud account to provision with
        #[arg(short, long)]
        account: String,

        /// Path to the JSON profile
        #[arg(short, long)]
        profile: PathBuf,

        /// Wait until the cluster is operational or failed
        #[arg(short, long)]
        wait: bool,
    },
    /// List all clusters
    List,
    /// Get cluster details
    Get {
        /// Cluster ID, name or unambiguous ID prefix
        id: String,
    },
    /// Delete a cluster and all of its machines
    Delete {
        /// Cluster ID, name or unambiguous ID prefix
        id: String,
    },
    /// Join new workers to an operational cluster
    AddNodes {
        /// Cluster ID, name or unambiguous ID prefix
        id: String,

        /// Machine size
        #[arg(long)]
        size: String,

        /// Machine image
        #[arg(long)]
        image: String,

        /// Number of workers to add
        #[arg(long, default_value_t = 1)]
        count: usize,

        /// Region override for the new workers
        #[arg(long)]
        region: Option<String>,
    },
    /// Remove one worker from a cluster
    DeleteNode {
        /// Cluster ID, name or unambiguous ID prefix
        id: String,

        /// Provider machine id of the worker
        machine_id: String,
    },
}

pub async fn handle_kube_command(command: KubeCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        KubeCommands::Provision {
            name,
            account,
            profile,
            wait,
        } => provision(&client, name, account, &profile, wait).await,
        KubeCommands::List => list_kubes(&client).await,
        KubeCommands::Get { id } => get_kube(&client, &id).await,
        KubeCommands::Delete { id } => delete_kube(&client, &id).await,
        KubeCommands::AddNodes {
            id,
            size,
            image,
            count,
            region,
        } => {
            let node = NodeSpec {
                size,
                image,
                region,
                labels: Default::default(),
            };
            add_nodes(&client, &id, vec![node; count]).await
        }
        KubeCommands::DeleteNode { id, machine_id } => delete_node(&client, &id, &machine_id).await,
    }
}

async fn provision(
    client: &SkiffClient,
    name: String,
    account: String,
    profile_path: &Path,
    wait: bool,
) -> Result<()> {
    let raw = std::fs::read_to_string(profile_path)
        .with_context(|| format!("Failed to read profile {}", profile_path.display()))?;
    let profile: Profile = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid profile {}", profile_path.display()))?;

    let response = client
        .provision(&ProvisionRequest {
            cluster_name: name,
            profile,
            cloud_account_name: account,
        })
        .await?;

    println!("{}", "✓ Provisioning started".green().bold());
    println!("  Cluster ID: {}", response.cluster_id.to_string().cyan());
    println!("{}", "Tasks:".bold());
    print_task_ids(&response.tasks);

    if wait {
        println!();
        println!("{}", "Waiting for the cluster...".dimmed());
        let kube = wait_until_settled(client, response.cluster_id).await?;
        println!("  State: {}", colorize_state(&kube.state));
    }

    Ok(())
}

async fn wait_until_settled(client: &SkiffClient, id: Uuid) -> Result<Kube> {
    loop {
        let kube = client.get_kube(id).await?;
        if kube.state != KubeState::Provisioning {
            return Ok(kube);
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

async fn list_kubes(client: &SkiffClient) -> Result<()> {
    let kubes = client.list_kubes().await?;

    if kubes.is_empty() {
        println!("{}", "No clusters found.".yellow());
        return Ok(());
    }

    println!(
        "{:<36}  {:<16}  {:<12}  {:<10}  {:<12}  {}",
        "ID".bold(),
        "NAME".bold(),
        "PROVIDER".bold(),
        "VERSION".bold(),
        "STATE".bold(),
        "NODES".bold()
    );
    for kube in kubes {
        println!(
            "{:<36}  {:<16}  {:<12}  {:<10}  {:<12}  {}m/{}w",
            kube.id.to_string().dimmed(),
            kube.name,
            kube.provider.as_str(),
            kube.version,
            colorize_state(&kube.state),
            kube.masters,
            kube.workers
        );
    }

    Ok(())
}

async fn get_kube(client: &SkiffClient, id: &str) -> Result<()> {
    let uuid = resolve_kube_id(client, id).await?;
    let kube = client.get_kube(uuid).await?;

    println!("{}", "Cluster Details:".bold());
    println!("  ID:           {}", kube.id.to_string().cyan());
    println!("  Name:         {}", kube.name);
    println!("  Provider:     {} ({})", kube.provider, kube.region);
    println!("  Account:      {}", kube.account_name);
    println!("  Version:      {}", kube.version);
    println!("  State:        {}", colorize_state(&kube.state));
    println!("  Internal DNS: {}", kube.internal_dns);
    println!("  External DNS: {}", kube.external_dns);
    println!("  Created:      {}", kube.created_at.format("%Y-%m-%d %H:%M:%S"));

    println!("\n{}", "Masters:".bold());
    for machine in kube.masters.values() {
        print_machine(machine);
    }
    if !kube.workers.is_empty() {
        println!("\n{}", "Workers:".bold());
        for machine in kube.workers.values() {
            print_machine(machine);
        }
    }

    println!("\n{}", "Tasks:".bold());
    print_task_ids(&kube.tasks);

    Ok(())
}

async fn delete_kube(client: &SkiffClient, id: &str) -> Result<()> {
    let uuid = resolve_kube_id(client, id).await?;
    let tasks = client.delete_kube(uuid).await?;

    println!("{}", format!("✓ Deleting cluster {}", uuid).green().bold());
    print_task_ids(&tasks);
    Ok(())
}

async fn add_nodes(client: &SkiffClient, id: &str, nodes: Vec<NodeSpec>) -> Result<()> {
    let uuid = resolve_kube_id(client, id).await?;
    let count = nodes.len();
    let tasks = client.add_nodes(uuid, nodes).await?;

    println!("{}", format!("✓ Adding {} worker(s)", count).green().bold());
    print_task_ids(&tasks);
    Ok(())
}

async fn delete_node(client: &SkiffClient, id: &str, machine_id: &str) -> Result<()> {
    let uuid = resolve_kube_id(client, id).await?;
    let tasks = client.delete_node(uuid, machine_id).await?;

    println!("{}", format!("✓ Removing worker {}", machine_id).green().bold());
    print_task_ids(&tasks);
    Ok(())
}

fn print_machine(machine: &Machine) {
    let bootstrap = if machine.is_bootstrap { " (bootstrap)" } else { "" };
    println!(
        "  {} {}{}  {}  {}",
        "▸".cyan(),
        machine.name,
        bootstrap.dimmed(),
        machine.ssh_address().unwrap_or("-"),
        format!("{:?}", machine.state).to_lowercase().dimmed()
    );
    println!("    id: {}  size: {}", machine.id.dimmed(), machine.size.dimmed());
}

fn colorize_state(state: &KubeState) -> ColoredString {
    let state_str = format!("{:?}", state).to_lowercase();
    match state {
        KubeState::Provisioning => state_str.yellow(),
        KubeState::Operational => state_str.green(),
        KubeState::Failed => state_str.red(),
        KubeState::Deleting => state_str.dimmed(),
    }
}
