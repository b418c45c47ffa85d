//! Kube Service
//!
//! Cluster lifecycle: provisioning, scaling and teardown. Every long-running
//! operation returns task ids right away; callers poll the workflows.

use skiff_core::domain::kube::{Kube, TaskIds};
use skiff_core::dto::kube::KubeSummary;
use skiff_core::dto::provision::{AddNodesRequest, ProvisionRequest, ProvisionResponse};
use skiff_engine::{Engine, ProvisionError};
use uuid::Uuid;

/// Service error type
#[derive(Debug)]
pub enum KubeError {
    NotFound(String),
    ValidationError(String),
    Conflict(String),
    EngineError(ProvisionError),
}

impl From<ProvisionError> for KubeError {
    fn from(err: ProvisionError) -> Self {
        match err {
            ProvisionError::NotFound(what) => KubeError::NotFound(what),
            ProvisionError::Validation(msg) => KubeError::ValidationError(msg),
            ProvisionError::Conflict(msg) => KubeError::Conflict(msg),
            other => KubeError::EngineError(other),
        }
    }
}

/// Plan a cluster and start provisioning it
pub async fn provision(engine: &Engine, req: ProvisionRequest) -> Result<ProvisionResponse, KubeError> {
    tracing::info!(
        "Provisioning cluster '{}' with account '{}'",
        req.cluster_name,
        req.cloud_account_name
    );

    let response = engine.provision(req).await?;

    tracing::info!(
        "Cluster {} accepted, {} task(s) started",
        response.cluster_id,
        response.tasks.values().map(Vec::len).sum::<usize>()
    );
    Ok(response)
}

/// Get a cluster record by ID, secrets redacted
pub async fn get_kube(engine: &Engine, id: Uuid) -> Result<Kube, KubeError> {
    Ok(engine.get_kube(id).await?)
}

/// List all clusters
pub async fn list_kubes(engine: &Engine) -> Result<Vec<KubeSummary>, KubeError> {
    Ok(engine.list_kubes().await?)
}

/// Start deleting a cluster and all of its machines
pub async fn delete_kube(engine: &Engine, id: Uuid) -> Result<TaskIds, KubeError> {
    let tasks = engine.delete_cluster(id).await?;
    tracing::info!("Cluster {} deletion started", id);
    Ok(tasks)
}

/// Join new workers to an operational cluster
pub async fn add_nodes(engine: &Engine, id: Uuid, req: AddNodesRequest) -> Result<TaskIds, KubeError> {
    Ok(engine.add_nodes(id, req.nodes).await?)
}

/// Remove one node from an operational cluster
pub async fn delete_node(engine: &Engine, id: Uuid, machine_id: &str) -> Result<TaskIds, KubeError> {
    Ok(engine.delete_node(id, machine_id).await?)
}
