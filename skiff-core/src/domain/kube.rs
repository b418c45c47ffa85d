//! Kube domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::domain::machine::Machine;
use crate::domain::profile::{Networking, Profile, SshConfig};
use crate::domain::provider::ProviderKind;

/// Task ids grouped by role (`master`, `node`, `cluster`, `delete`)
pub type TaskIds = BTreeMap<String, Vec<Uuid>>;

pub const ROLE_MASTER: &str = "master";
pub const ROLE_NODE: &str = "node";
pub const ROLE_CLUSTER: &str = "cluster";
pub const ROLE_DELETE: &str = "delete";

/// Aggregate record of one provisioned Kubernetes cluster
///
/// Persisted under `kubes/<id>`. Tasks are referenced by id only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kube {
    pub id: Uuid,
    pub name: String,
    pub provider: ProviderKind,
    pub account_name: String,
    pub region: String,
    pub version: String,
    pub bootstrap_token: String,
    #[serde(rename = "internalDNS")]
    pub internal_dns: String,
    #[serde(rename = "externalDNS")]
    pub external_dns: String,
    /// Private address of the bootstrap master, used by joining nodes
    #[serde(default)]
    pub bootstrap_address: Option<String>,
    #[serde(default)]
    pub ca: Option<CaBundle>,
    #[serde(default)]
    pub masters: BTreeMap<String, Machine>,
    #[serde(default)]
    pub workers: BTreeMap<String, Machine>,
    pub networking: Networking,
    pub ssh: SshConfig,
    pub state: KubeState,
    #[serde(default)]
    pub tasks: TaskIds,
    /// References to provider scaffolding (ssh key ids, VPC ids, ...)
    #[serde(default)]
    pub cloud: BTreeMap<String, String>,
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KubeState {
    Provisioning,
    Operational,
    Failed,
    Deleting,
}

/// Cluster certificate authority, PEM encoded
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CaBundle {
    pub cert: String,
    pub key: String,
}

impl fmt::Debug for CaBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaBundle")
            .field("cert", &format!("{} bytes", self.cert.len()))
            .field("key", &"<redacted>")
            .finish()
    }
}

impl Kube {
    /// The master that initialized the control plane
    pub fn bootstrap_master(&self) -> Option<&Machine> {
        self.masters.values().find(|m| m.is_bootstrap)
    }

    pub fn add_tasks(&mut self, role: &str, ids: impl IntoIterator<Item = Uuid>) {
        self.tasks.entry(role.to_string()).or_default().extend(ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kube_state_serializes_lowercase() {
        let json = serde_json::to_string(&KubeState::Operational).unwrap();
        assert_eq!(json, "\"operational\"");
    }

    #[test]
    fn test_ca_debug_redacts_key() {
        let ca = CaBundle {
            cert: "CERT".to_string(),
            key: "PRIVATE".to_string(),
        };
        assert!(!format!("{:?}", ca).contains("PRIVATE"));
    }
}
