//! Cluster endpoints

use skiff_core::domain::kube::{Kube, TaskIds};
use skiff_core::domain::profile::NodeSpec;
use skiff_core::dto::kube::KubeSummary;
use skiff_core::dto::provision::{AddNodesRequest, ProvisionRequest, ProvisionResponse, TasksResponse};
use uuid::Uuid;

use crate::SkiffClient;
use crate::error::Result;

impl SkiffClient {
    /// Start provisioning a cluster
    ///
    /// Returns as soon as the tasks are planned; poll the returned task ids
    /// to follow progress.
    pub async fn provision(&self, req: &ProvisionRequest) -> Result<ProvisionResponse> {
        let response = self.client.post(self.url("/provision")).json(req).send().await?;
        self.handle_response(response).await
    }

    pub async fn list_kubes(&self) -> Result<Vec<KubeSummary>> {
        let response = self.client.get(self.url("/kubes")).send().await?;
        self.handle_response(response).await
    }

    /// Get a cluster record; secrets come back redacted
    pub async fn get_kube(&self, id: Uuid) -> Result<Kube> {
        let response = self.client.get(self.url(&format!("/kubes/{}", id))).send().await?;
        self.handle_response(response).await
    }

    /// Start deleting a cluster and all of its machines
    pub async fn delete_kube(&self, id: Uuid) -> Result<TaskIds> {
        let response = self
            .client
            .delete(self.url(&format!("/kubes/{}", id)))
            .send()
            .await?;
        let body: TasksResponse = self.handle_response(response).await?;
        Ok(body.tasks)
    }

    /// Join new workers to an operational cluster
    pub async fn add_nodes(&self, id: Uuid, nodes: Vec<NodeSpec>) -> Result<TaskIds> {
        let response = self
            .client
            .post(self.url(&format!("/kubes/{}/nodes", id)))
            .json(&AddNodesRequest { nodes })
            .send()
            .await?;
        let body: TasksResponse = self.handle_response(response).await?;
        Ok(body.tasks)
    }

    pub async fn delete_node(&self, id: Uuid, machine_id: &str) -> Result<TaskIds> {
        let response = self
            .client
            .delete(self.url(&format!("/kubes/{}/nodes/{}", id, machine_id)))
            .send()
            .await?;
        let body: TasksResponse = self.handle_response(response).await?;
        Ok(body.tasks)
    }
}
