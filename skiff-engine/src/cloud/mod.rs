//! Cloud providers
//!
//! The provider set is closed, so adapters are variants of [`Provider`]
//! rather than trait objects. Each variant offers the same capability set:
//! machines (create, get, find by tag, delete) and per-cluster scaffolding
//! (create, delete).

mod digitalocean;
mod fake;
mod retry;

pub use digitalocean::DigitalOcean;
pub use fake::FakeCloud;
pub use retry::with_backoff;

use skiff_core::domain::account::CloudAccount;
use skiff_core::domain::machine::{Machine, Role};
use skiff_core::domain::provider::ProviderKind;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    /// Rate limits, 5xx, connection failures; worth retrying
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Bad credentials, quota exhausted, invalid request
    #[error("provider error: {0}")]
    Permanent(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("provider {0} is not supported")]
    Unsupported(ProviderKind),

    #[error("cancelled")]
    Cancelled,
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}

/// Everything needed to create one machine
#[derive(Debug, Clone, PartialEq)]
pub struct MachineRequest {
    pub name: String,
    pub role: Role,
    pub is_bootstrap: bool,
    pub region: String,
    pub size: String,
    pub image: String,
    /// Includes the task tag used to find the machine again after a restart
    pub tags: Vec<String>,
    pub ssh_key_ids: Vec<String>,
}

/// Per-cluster scaffolding request
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSpec {
    pub cluster_id: Uuid,
    pub name: String,
    pub region: String,
    pub ssh_public_key: String,
}

pub const SSH_KEY_ID: &str = "sshKeyId";

pub fn task_tag(task_id: Uuid) -> String {
    format!("skiff-task-{}", task_id)
}

pub fn cluster_tag(cluster_id: Uuid) -> String {
    format!("skiff-cluster-{}", cluster_id)
}

pub fn role_tag(role: Role) -> String {
    format!("skiff-{}", role.as_str())
}

pub const BOOTSTRAP_TAG: &str = "skiff-bootstrap";

pub enum Provider {
    DigitalOcean(DigitalOcean),
    Fake(FakeCloud),
}

impl Provider {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Provider::DigitalOcean(_) => ProviderKind::DigitalOcean,
            Provider::Fake(_) => ProviderKind::Fake,
        }
    }

    pub async fn create_machine(&self, req: &MachineRequest) -> Result<Machine, ProviderError> {
        match self {
            Provider::DigitalOcean(p) => p.create_machine(req).await,
            Provider::Fake(p) => p.create_machine(req),
        }
    }

    pub async fn get_machine(&self, region: &str, id: &str) -> Result<Machine, ProviderError> {
        match self {
            Provider::DigitalOcean(p) => p.get_machine(region, id).await,
            Provider::Fake(p) => p.get_machine(id),
        }
    }

    /// Machine carrying `tag`, if one exists
    pub async fn find_machine(&self, region: &str, tag: &str) -> Result<Option<Machine>, ProviderError> {
        match self {
            Provider::DigitalOcean(p) => p.find_machine(region, tag).await,
            Provider::Fake(p) => Ok(p.find_machine(tag)),
        }
    }

    /// Deleting a machine that no longer exists succeeds
    pub async fn delete_machine(&self, region: &str, id: &str) -> Result<(), ProviderError> {
        match self {
            Provider::DigitalOcean(p) => p.delete_machine(region, id).await,
            Provider::Fake(p) => {
                p.delete_machine(id);
                Ok(())
            }
        }
    }

    /// Creates scaffolding; returns references to store on the cluster
    pub async fn create_cluster(
        &self,
        spec: &ClusterSpec,
    ) -> Result<BTreeMap<String, String>, ProviderError> {
        match self {
            Provider::DigitalOcean(p) => p.create_cluster(spec).await,
            Provider::Fake(p) => Ok(p.create_cluster(spec)),
        }
    }

    pub async fn delete_cluster(
        &self,
        cluster_id: Uuid,
        cloud: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError> {
        match self {
            Provider::DigitalOcean(p) => p.delete_cluster(cluster_id, cloud).await,
            Provider::Fake(p) => {
                p.delete_cluster(cluster_id);
                Ok(())
            }
        }
    }
}

/// Builds provider adapters from cloud accounts
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    http: reqwest::Client,
    digitalocean_api: String,
    fake: FakeCloud,
}

impl ProviderRegistry {
    pub fn new(digitalocean_api: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            digitalocean_api: digitalocean_api.into(),
            fake: FakeCloud::default(),
        }
    }

    /// Whether provisioning with `kind` is possible
    pub fn is_registered(&self, kind: ProviderKind) -> bool {
        matches!(kind, ProviderKind::DigitalOcean | ProviderKind::Fake)
    }

    pub fn for_account(&self, account: &CloudAccount) -> Result<Provider, ProviderError> {
        match account.provider {
            ProviderKind::DigitalOcean => {
                let token = account.credential("accessToken").ok_or_else(|| {
                    ProviderError::Permanent(format!(
                        "account {} has no accessToken credential",
                        account.name
                    ))
                })?;
                Ok(Provider::DigitalOcean(DigitalOcean::new(
                    self.http.clone(),
                    self.digitalocean_api.clone(),
                    token,
                )))
            }
            ProviderKind::Fake => Ok(Provider::Fake(self.fake.clone())),
            ProviderKind::Aws => Err(ProviderError::Unsupported(ProviderKind::Aws)),
        }
    }

    /// In-memory cloud shared by every `fake` account
    pub fn fake(&self) -> &FakeCloud {
        &self.fake
    }
}
