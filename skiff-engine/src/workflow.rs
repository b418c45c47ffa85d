//! Pipelines
//!
//! A pipeline is a named, ordered list of steps, instantiated once per
//! task. Step names are resolved and dependencies checked when the registry
//! is built, so a bad definition fails at startup rather than mid-run.

use skiff_core::domain::provider::ProviderKind;
use skiff_core::dto::kube::PipelineSummary;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::steps::{Step, StepRegistry};

pub const CLUSTER: &str = "cluster";
pub const DELETE_NODE: &str = "delete-node";
pub const DELETE_CLUSTER: &str = "delete-cluster";
pub const UPGRADE_NODE: &str = "upgrade-node";

const NODE_STEPS: &[&str] = &[
    "create_machine",
    "ssh",
    "authorized_keys",
    "download_binaries",
    "docker",
    "cni",
    "certificates",
    "manifest",
    "kubelet",
    "kubeadm",
];

#[derive(Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error("pipeline {0} not found")]
    NotFound(String),

    #[error("pipeline {0} is already registered")]
    Duplicate(String),

    #[error("pipeline {pipeline} references unknown step {step}")]
    UnknownStep { pipeline: String, step: String },

    #[error("step {step} of pipeline {pipeline} depends on {dependency}, which does not run before it")]
    UnmetDependency {
        pipeline: String,
        step: String,
        dependency: String,
    },
}

pub fn master_pipeline(provider: ProviderKind) -> String {
    format!("{}-master", provider)
}

pub fn worker_pipeline(provider: ProviderKind) -> String {
    format!("{}-worker", provider)
}

#[derive(Clone)]
pub struct Pipeline {
    name: String,
    steps: Vec<Arc<dyn Step>>,
}

impl Pipeline {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }
}

#[derive(Clone, Default)]
pub struct PipelineRegistry {
    pipelines: BTreeMap<String, Pipeline>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every pipeline the engine launches
    pub fn builtin(steps: &StepRegistry) -> Result<Self, PipelineError> {
        let mut registry = Self::new();

        for provider in ProviderKind::ALL {
            let mut master = NODE_STEPS.to_vec();
            master.extend(["bootstrap_token", "network"]);
            if provider == ProviderKind::Aws {
                master.push("cloud_controller_manager");
            }
            master.push("post_start");

            registry.register(steps, master_pipeline(provider), &master)?;
            registry.register(steps, worker_pipeline(provider), NODE_STEPS)?;
        }

        registry.register(
            steps,
            CLUSTER,
            &["ssh", "cluster_check", "cluster_services", "storage_class", "tiller", "prometheus"],
        )?;
        registry.register(steps, DELETE_NODE, &["evacuate", "delete_machine"])?;
        registry.register(steps, DELETE_CLUSTER, &["delete_cluster"])?;
        registry.register(steps, UPGRADE_NODE, &["ssh", "drain", "upgrade", "uncordon"])?;

        Ok(registry)
    }

    /// Resolves `names` against `steps` and registers the result
    pub fn register(
        &mut self,
        steps: &StepRegistry,
        name: impl Into<String>,
        names: &[&str],
    ) -> Result<(), PipelineError> {
        let name = name.into();
        if self.pipelines.contains_key(&name) {
            return Err(PipelineError::Duplicate(name));
        }

        let mut resolved: Vec<Arc<dyn Step>> = Vec::with_capacity(names.len());
        for step_name in names {
            let step = steps.get(step_name).ok_or_else(|| PipelineError::UnknownStep {
                pipeline: name.clone(),
                step: step_name.to_string(),
            })?;

            for dependency in step.depends() {
                if !resolved.iter().any(|s| s.name() == *dependency) {
                    return Err(PipelineError::UnmetDependency {
                        pipeline: name.clone(),
                        step: step_name.to_string(),
                        dependency: dependency.to_string(),
                    });
                }
            }

            resolved.push(step);
        }

        debug!("Registered pipeline {} with {} steps", name, resolved.len());
        self.pipelines.insert(
            name.clone(),
            Pipeline {
                name,
                steps: resolved,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Pipeline, PipelineError> {
        self.pipelines
            .get(name)
            .ok_or_else(|| PipelineError::NotFound(name.to_string()))
    }

    pub fn summaries(&self) -> Vec<PipelineSummary> {
        self.pipelines
            .values()
            .map(|p| PipelineSummary {
                name: p.name.clone(),
                steps: p.step_names(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PipelineRegistry {
        PipelineRegistry::builtin(&StepRegistry::builtin()).unwrap()
    }

    #[test]
    fn test_builtin_pipelines() {
        let registry = registry();

        let master = registry.get("digitalocean-master").unwrap();
        assert_eq!(master.steps().first().unwrap().name(), "create_machine");
        assert_eq!(master.steps().last().unwrap().name(), "post_start");
        assert!(!master.step_names().contains(&"cloud_controller_manager".to_string()));

        let aws = registry.get("aws-master").unwrap();
        assert!(aws.step_names().contains(&"cloud_controller_manager".to_string()));

        let worker = registry.get("fake-worker").unwrap();
        assert_eq!(worker.steps().len(), NODE_STEPS.len());
        assert_eq!(worker.steps().last().unwrap().name(), "kubeadm");

        assert_eq!(registry.get(CLUSTER).unwrap().steps().len(), 6);
        assert_eq!(
            registry.get(UPGRADE_NODE).unwrap().step_names(),
            vec!["ssh", "drain", "upgrade", "uncordon"]
        );
    }

    #[test]
    fn test_unknown_pipeline() {
        assert_eq!(
            registry().get("gce-master").err(),
            Some(PipelineError::NotFound("gce-master".to_string()))
        );
    }

    #[test]
    fn test_unknown_step_is_rejected() {
        let steps = StepRegistry::builtin();
        let mut registry = PipelineRegistry::new();

        let err = registry.register(&steps, "broken", &["ssh", "teleport"]).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownStep { step, .. } if step == "teleport"));
    }

    #[test]
    fn test_dependency_must_run_earlier() {
        let steps = StepRegistry::builtin();
        let mut registry = PipelineRegistry::new();

        let err = registry
            .register(&steps, "backwards", &["ssh", "kubeadm", "kubelet"])
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnmetDependency { step, dependency, .. }
                if step == "kubeadm" && dependency == "kubelet"
        ));

        registry.register(&steps, "ok", &["ssh", "drain", "uncordon"]).unwrap();
        assert_eq!(
            registry.register(&steps, "ok", &["ssh"]),
            Err(PipelineError::Duplicate("ok".to_string()))
        );
    }

    #[test]
    fn test_summaries_list_every_pipeline() {
        let summaries = registry().summaries();
        assert_eq!(summaries.len(), ProviderKind::ALL.len() * 2 + 4);
        assert!(summaries.iter().any(|s| s.name == DELETE_CLUSTER && s.steps == vec!["delete_cluster"]));
    }
}
