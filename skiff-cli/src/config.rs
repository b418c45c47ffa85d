//! Configuration module
//!
//! Handles CLI configuration including the orchestrator URL.

use skiff_client::SkiffClient;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the orchestrator service
    pub url: String,
}

impl Config {
    pub fn client(&self) -> SkiffClient {
        SkiffClient::new(&self.url)
    }
}
