//! Cluster profile
//!
//! The declarative input submitted by an operator. A profile is copied into
//! the shared config of every task of a cluster and into the Kube record, so
//! it must stay serializable and self-contained.

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::domain::provider::ProviderKind;

/// Desired cluster specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub provider: ProviderKind,
    pub region: String,
    pub k8s_version: String,
    #[serde(default = "default_docker_version")]
    pub docker_version: String,
    #[serde(default = "default_helm_version")]
    pub helm_version: String,
    #[serde(default = "default_arch")]
    pub arch: String,
    #[serde(default)]
    pub rbac_enabled: bool,
    #[serde(default)]
    pub prometheus_enabled: bool,
    #[serde(default)]
    pub networking: Networking,
    pub masters: Vec<NodeSpec>,
    #[serde(default)]
    pub workers: Vec<NodeSpec>,
    pub ssh: SshConfig,
    /// Provider specific settings (e.g. VPC or image overrides)
    #[serde(default)]
    pub cloud_settings: BTreeMap<String, String>,
    /// Deadline for non-bootstrap tasks waiting on the bootstrap master
    #[serde(default)]
    pub barrier_timeout_secs: Option<u64>,
    #[serde(default)]
    pub timeouts: TimeoutOverrides,
}

/// Cluster networking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Networking {
    pub cidr: String,
    pub service_cidr: String,
    pub plugin: NetworkPlugin,
}

impl Default for Networking {
    fn default() -> Self {
        Self {
            cidr: "10.244.0.0/16".to_string(),
            service_cidr: "10.96.0.0/12".to_string(),
            plugin: NetworkPlugin::Flannel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPlugin {
    Flannel,
    Calico,
    Weave,
}

impl NetworkPlugin {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkPlugin::Flannel => "flannel",
            NetworkPlugin::Calico => "calico",
            NetworkPlugin::Weave => "weave",
        }
    }
}

/// Size and image of a single node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub size: String,
    pub image: String,
    /// Overrides the profile region for this node
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// SSH settings used to reach provisioned machines
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    #[serde(default = "default_ssh_user")]
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Connect/handshake timeout in seconds
    #[serde(default = "default_ssh_timeout")]
    pub timeout_secs: u64,
    /// PEM/OpenSSH private key installed on every machine at creation
    pub bootstrap_private_key: String,
    pub bootstrap_public_key: String,
    /// Operator key added to authorized_keys
    #[serde(default)]
    pub public_key: Option<String>,
}

impl fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshConfig")
            .field("user", &self.user)
            .field("port", &self.port)
            .field("timeout_secs", &self.timeout_secs)
            .field("bootstrap_private_key", &"<redacted>")
            .field("public_key", &self.public_key.is_some())
            .finish()
    }
}

/// Optional per-profile step budgets, in seconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutOverrides {
    #[serde(default)]
    pub ssh_wait_secs: Option<u64>,
    #[serde(default)]
    pub provision_secs: Option<u64>,
    #[serde(default)]
    pub post_provision_secs: Option<u64>,
    #[serde(default)]
    pub step_secs: Option<u64>,
}

fn default_docker_version() -> String {
    "18.06.3".to_string()
}

fn default_helm_version() -> String {
    "2.16.1".to_string()
}

fn default_arch() -> String {
    "amd64".to_string()
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_timeout() -> u64 {
    10
}

/// Profile validation failure
#[derive(Debug, Error, PartialEq)]
pub enum ProfileError {
    #[error("profile must declare at least one master")]
    NoMasters,

    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("invalid {field} '{value}'")]
    InvalidCidr { field: &'static str, value: String },

    #[error("pod CIDR {cidr} overlaps service CIDR {service_cidr}")]
    OverlappingCidrs { cidr: String, service_cidr: String },
}

impl Profile {
    pub fn master_count(&self) -> usize {
        self.masters.len()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Checks the structural invariants of a profile
    ///
    /// Provider registration is checked by the engine, which owns the
    /// provider set.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.masters.is_empty() {
            return Err(ProfileError::NoMasters);
        }

        if self.region.trim().is_empty() {
            return Err(ProfileError::EmptyField("region"));
        }

        if self.k8s_version.trim().is_empty() {
            return Err(ProfileError::EmptyField("k8sVersion"));
        }

        if self.ssh.user.trim().is_empty() {
            return Err(ProfileError::EmptyField("ssh.user"));
        }

        if self.ssh.bootstrap_private_key.trim().is_empty() {
            return Err(ProfileError::EmptyField("ssh.bootstrapPrivateKey"));
        }

        for node in self.masters.iter().chain(self.workers.iter()) {
            if node.size.trim().is_empty() {
                return Err(ProfileError::EmptyField("node size"));
            }
            if node.image.trim().is_empty() {
                return Err(ProfileError::EmptyField("node image"));
            }
        }

        let cidr = parse_cidr("cidr", &self.networking.cidr)?;
        let service_cidr = parse_cidr("serviceCidr", &self.networking.service_cidr)?;

        if cidr.overlaps(service_cidr) {
            return Err(ProfileError::OverlappingCidrs {
                cidr: self.networking.cidr.clone(),
                service_cidr: self.networking.service_cidr.clone(),
            });
        }

        Ok(())
    }
}

fn parse_cidr(field: &'static str, value: &str) -> Result<Ipv4Network, ProfileError> {
    value.parse::<Ipv4Network>().map_err(|_| ProfileError::InvalidCidr {
        field,
        value: value.to_string(),
    })
}
