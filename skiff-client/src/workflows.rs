//! Workflow endpoints

use skiff_core::domain::log::LogEntry;
use skiff_core::domain::task::TaskSnapshot;
use uuid::Uuid;

use crate::SkiffClient;
use crate::error::Result;

impl SkiffClient {
    /// Get a task snapshot
    pub async fn get_workflow(&self, id: Uuid) -> Result<TaskSnapshot> {
        let response = self
            .client
            .get(self.url(&format!("/workflows/{}", id)))
            .send()
            .await?;
        self.handle_response(response).await
    }

    /// Get the captured output of a task
    pub async fn get_logs(&self, id: Uuid) -> Result<Vec<LogEntry>> {
        let response = self
            .client
            .get(self.url(&format!("/workflows/{}/logs", id)))
            .send()
            .await?;
        self.handle_response(response).await
    }

    /// Resume a failed or cancelled task
    pub async fn restart_workflow(&self, id: Uuid) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/workflows/{}/restart", id)))
            .send()
            .await?;
        self.handle_empty_response(response).await
    }

    pub async fn cancel_workflow(&self, id: Uuid) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/workflows/{}/cancel", id)))
            .send()
            .await?;
        self.handle_empty_response(response).await
    }
}
