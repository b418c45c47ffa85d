//! Steps and the step registry
//!
//! A step is a stateless action run by a task against its shared
//! [`Config`]. Provisioning steps follow one pattern: derive a sub-config,
//! render a template, run it on the target, record outputs. Those are
//! described declaratively by [`ScriptStep`]; steps that talk to the cloud
//! or publish cluster state have their own types.

mod certificates;
mod context;
mod kubeadm;
mod provider;
mod script;
mod ssh;

pub use certificates::{CertificatesStep, generate_ca};
pub use context::{Services, StepContext};
pub use kubeadm::KubeadmStep;
pub use provider::{CreateMachineStep, DeleteClusterStep, DeleteMachineStep};
pub use script::{Budget, ScriptStep, Target};
pub use ssh::SshStep;

use async_trait::async_trait;
use skiff_runner::RunnerError;
use skiff_templates::TemplateError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::cloud::ProviderError;
use crate::cluster::{BarrierError, NodeMapError};
use crate::config::Config;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Barrier(#[from] BarrierError),

    #[error(transparent)]
    NodeMap(#[from] NodeMapError),

    #[error("failed to encode step input: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("machine not active after {0:?}")]
    ProvisionTimeout(Duration),

    #[error("step {step} timed out after {after:?}")]
    Timeout { step: String, after: Duration },

    #[error("cancelled")]
    Cancelled,

    #[error("missing {0}")]
    MissingInput(&'static str),

    #[error("failed to generate certificates: {0}")]
    Certificate(String),
}

impl StepError {
    /// Whether the error stems from the task being cancelled
    pub fn is_cancelled(&self) -> bool {
        match self {
            StepError::Cancelled => true,
            StepError::Runner(e) => e.is_cancelled(),
            StepError::Provider(e) => *e == ProviderError::Cancelled,
            StepError::Barrier(e) => *e == BarrierError::Cancelled,
            _ => false,
        }
    }
}

#[async_trait]
pub trait Step: Send + Sync {
    /// Stable identifier used in snapshots and pipeline definitions
    fn name(&self) -> &'static str;

    /// Steps that must run earlier in the same pipeline
    fn depends(&self) -> &'static [&'static str] {
        &[]
    }

    /// Whether the step has anything to do for this task; a step that does
    /// not apply is recorded as skipped
    fn applies(&self, _cfg: &Config) -> bool {
        true
    }

    /// Budget of a single run
    fn timeout(&self, cfg: &Config) -> Duration {
        cfg.timeouts.step()
    }

    /// Must be idempotent when re-run with the same config after a failure
    async fn run(&self, ctx: &StepContext, cfg: &mut Config) -> Result<(), StepError>;

    /// Compensating action, only invoked by cluster teardown
    async fn rollback(&self, _ctx: &StepContext, _cfg: &mut Config) -> Result<(), StepError> {
        Ok(())
    }
}

/// Name → step map, built once at startup
pub struct StepRegistry {
    steps: Vec<Arc<dyn Step>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Registry holding the whole step catalog
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(CreateMachineStep);
        registry.register(SshStep);
        registry.register(CertificatesStep);
        registry.register(KubeadmStep);
        registry.register(DeleteMachineStep);
        registry.register(DeleteClusterStep);
        for step in script::catalog() {
            registry.register(step);
        }
        registry
    }

    /// Registers a step
    ///
    /// # Panics
    /// Panics if a step with the same name is already registered
    pub fn register<S: Step + 'static>(&mut self, step: S) {
        let name = step.name();
        if self.steps.iter().any(|s| s.name() == name) {
            panic!("Step '{}' is already registered", name);
        }
        self.steps.push(Arc::new(step));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Step>> {
        self.steps.iter().find(|s| s.name() == name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.steps.iter().map(|s| s.name())
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
