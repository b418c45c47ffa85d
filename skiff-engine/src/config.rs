//! Shared pipeline config
//!
//! One `Config` is threaded through every step of a task. Inputs are filled
//! by the orchestrator before the task starts; outputs are written by earlier
//! steps and read by later ones. Step ordering, not locking, keeps writers
//! apart. The whole record is persisted with each task snapshot except the
//! runner, which is rebuilt when a task is restarted.

use serde::{Deserialize, Serialize};
use skiff_core::domain::kube::CaBundle;
use skiff_core::domain::machine::{Machine, Role};
use skiff_core::domain::profile::{NodeSpec, Profile};
use skiff_core::domain::provider::ProviderKind;
use skiff_runner::Runner;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::cluster::BootstrapMaterial;
use crate::settings::Timeouts;
use crate::steps::StepError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub task_id: Uuid,
    pub cluster_id: Uuid,
    pub cluster_name: String,
    pub provider: ProviderKind,
    pub account_name: String,
    pub profile: Profile,

    pub is_master: bool,
    pub is_bootstrap: bool,
    /// Machine already exists and must not be created
    #[serde(default)]
    pub is_import: bool,

    /// Spec of the machine this task creates
    #[serde(default)]
    pub node_spec: Option<NodeSpec>,
    pub node_name: String,
    /// Machine this task operates on
    #[serde(default)]
    pub node: Option<Machine>,
    /// Bootstrap master, for steps that run kubectl against the cluster
    #[serde(default)]
    pub control_plane: Option<Machine>,

    pub bootstrap_token: String,
    #[serde(rename = "internalDNS")]
    pub internal_dns: String,
    #[serde(rename = "externalDNS")]
    pub external_dns: String,
    #[serde(default)]
    pub discovery_url: Option<String>,
    #[serde(default)]
    pub certificates: Option<CaBundle>,
    #[serde(default)]
    pub bootstrap_address: Option<String>,
    #[serde(default)]
    pub kubeconfig: Option<String>,
    /// Provider scaffolding references (ssh key ids, ...)
    #[serde(default)]
    pub cloud: BTreeMap<String, String>,

    pub timeouts: Timeouts,

    #[serde(skip)]
    pub runner: RunnerSlot,
}

impl Config {
    pub fn role(&self) -> Role {
        if self.is_master { Role::Master } else { Role::Worker }
    }

    pub fn node(&self) -> Result<&Machine, StepError> {
        self.node.as_ref().ok_or(StepError::MissingInput("node"))
    }

    pub fn control_plane(&self) -> Result<&Machine, StepError> {
        self.control_plane
            .as_ref()
            .ok_or(StepError::MissingInput("control plane"))
    }

    pub fn runner(&self) -> Result<Arc<dyn Runner>, StepError> {
        self.runner.get().ok_or(StepError::MissingInput("runner"))
    }

    pub fn ca(&self) -> Result<&CaBundle, StepError> {
        self.certificates
            .as_ref()
            .ok_or(StepError::MissingInput("certificates"))
    }

    /// Region the node lives in
    pub fn region(&self) -> &str {
        self.node_spec
            .as_ref()
            .and_then(|spec| spec.region.as_deref())
            .unwrap_or(&self.profile.region)
    }

    /// Copies join material published by the bootstrap master
    ///
    /// Values already present are kept, so a restarted task sees the same
    /// inputs as its first attempt.
    pub fn adopt(&mut self, material: &BootstrapMaterial) {
        if self.certificates.is_none() {
            self.certificates = Some(material.ca.clone());
        }
        if self.bootstrap_address.is_none() {
            self.bootstrap_address = Some(material.bootstrap_address.clone());
        }
        if self.bootstrap_token.is_empty() {
            self.bootstrap_token = material.token.clone();
        }
    }
}

/// Runner installed by the `ssh` step
///
/// Not persisted and ignored by equality, so a snapshot round-trip compares
/// equal to the live config.
#[derive(Clone, Default)]
pub struct RunnerSlot(Option<Arc<dyn Runner>>);

impl RunnerSlot {
    pub fn set(&mut self, runner: Arc<dyn Runner>) {
        self.0 = Some(runner);
    }

    pub fn get(&self) -> Option<Arc<dyn Runner>> {
        self.0.clone()
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Debug for RunnerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(runner) => write!(f, "Runner({})", runner.host()),
            None => f.write_str("NoRunner"),
        }
    }
}

impl PartialEq for RunnerSlot {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_config;
    use skiff_runner::DryRunner;

    #[test]
    fn test_config_round_trip_drops_runner() {
        let mut cfg = sample_config(true, true);
        cfg.runner.set(Arc::new(DryRunner::new("10.0.0.1")));

        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"internalDNS\""));
        assert!(!json.contains("runner"));

        let back: Config = serde_json::from_str(&json).unwrap();
        assert!(!back.runner.is_set());
        assert_eq!(back, cfg);
    }

    #[test]
    fn test_adopt_keeps_existing_values() {
        let mut cfg = sample_config(false, false);
        cfg.bootstrap_token = String::new();
        cfg.bootstrap_address = Some("10.0.0.9".to_string());

        let material = BootstrapMaterial {
            ca: CaBundle {
                cert: "cert".to_string(),
                key: "key".to_string(),
            },
            token: "abcdef.0123456789abcdef".to_string(),
            bootstrap_address: "10.0.0.2".to_string(),
        };
        cfg.adopt(&material);

        assert_eq!(cfg.bootstrap_token, "abcdef.0123456789abcdef");
        assert_eq!(cfg.bootstrap_address.as_deref(), Some("10.0.0.9"));
        assert_eq!(cfg.ca().unwrap().cert, "cert");
    }

    #[test]
    fn test_missing_inputs() {
        let cfg = sample_config(false, false);
        assert!(matches!(cfg.runner(), Err(StepError::MissingInput("runner"))));
        assert!(matches!(cfg.control_plane(), Err(StepError::MissingInput(_))));
        assert_eq!(cfg.role(), Role::Worker);
    }
}
