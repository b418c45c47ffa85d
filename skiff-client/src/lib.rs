//! Skiff HTTP Client
//!
//! A typed HTTP client for the Skiff orchestrator API, used by the `skiff`
//! CLI.
//!
//! # Example
//!
//! ```no_run
//! use skiff_client::SkiffClient;
//!
//! # async fn example() -> skiff_client::Result<()> {
//! let client = SkiffClient::new("http://localhost:8080");
//! for kube in client.list_kubes().await? {
//!     println!("{} {:?}", kube.name, kube.state);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
mod accounts;
mod kubes;
mod workflows;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;
use skiff_core::dto::kube::PipelineSummary;

/// HTTP client for the Skiff orchestrator API
///
/// Methods are grouped by resource:
/// - Clusters (provision, list, get, delete, add and delete nodes)
/// - Workflows (get, logs, restart, cancel)
/// - Cloud accounts
/// - Pipeline registry
#[derive(Debug, Clone)]
pub struct SkiffClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl SkiffClient {
    /// Create a new client for the orchestrator at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Returns true when the orchestrator answers its health check
    pub async fn health(&self) -> Result<bool> {
        let response = self.client.get(self.url("/health")).send().await?;
        Ok(response.status().is_success())
    }

    /// List registered pipelines and their steps
    pub async fn list_pipelines(&self) -> Result<Vec<PipelineSummary>> {
        let response = self.client.get(self.url("/pipelines")).send().await?;
        self.handle_response(response).await
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::debug!("Request failed with {}: {}", status, error_text);
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response that returns no content
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}
