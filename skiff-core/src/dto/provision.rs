//! Provisioning DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::kube::TaskIds;
use crate::domain::profile::{NodeSpec, Profile};

/// Request to provision a new cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    pub cluster_name: String,
    pub profile: Profile,
    pub cloud_account_name: String,
}

/// Ids of the tasks started for a cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionResponse {
    pub cluster_id: Uuid,
    pub tasks: TaskIds,
}

/// Request to add worker nodes to an operational cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddNodesRequest {
    pub nodes: Vec<NodeSpec>,
}

/// Task ids of a long-running cluster operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TasksResponse {
    pub tasks: TaskIds,
}
