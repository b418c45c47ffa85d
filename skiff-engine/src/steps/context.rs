use serde::Serialize;
use skiff_core::domain::kube::Kube;
use skiff_runner::{Command, Runner, RunnerSource, TaskOutput};
use skiff_templates::TemplateRegistry;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::StepError;
use crate::cloud::{Provider, ProviderError, ProviderRegistry};
use crate::cluster::ClusterState;
use crate::config::Config;
use crate::repository::account_repository;
use crate::settings::EngineSettings;
use crate::store::Store;

/// Process-wide collaborators, built once at startup and read-only
/// afterwards
pub struct Services {
    pub store: Arc<dyn Store>,
    pub templates: TemplateRegistry,
    pub runners: Arc<dyn RunnerSource>,
    pub providers: ProviderRegistry,
    pub settings: EngineSettings,
}

/// Everything a step sees besides the shared config
pub struct StepContext {
    pub services: Arc<Services>,
    pub task_id: Uuid,
    /// Name of the running step
    pub step: &'static str,
    pub cancel: CancellationToken,
    pub out: TaskOutput,
    pub cluster: Arc<ClusterState>,
    /// Point past which the step's budget is spent
    pub deadline: Instant,
}

impl StepContext {
    pub fn store(&self) -> &dyn Store {
        self.services.store.as_ref()
    }

    pub fn is_dry_run(&self) -> bool {
        self.services.runners.is_dry_run()
    }

    /// Provider adapter for the task's cloud account
    pub async fn provider(&self, cfg: &Config) -> Result<Provider, StepError> {
        let account = account_repository::find_by_name(self.store(), &cfg.account_name)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("account {}", cfg.account_name)))?;

        Ok(self.services.providers.for_account(&account)?)
    }

    pub fn render<S: Serialize>(&self, template: &str, input: &S) -> Result<String, StepError> {
        Ok(self.services.templates.render(template, input)?)
    }

    /// Runner for a machine other than the task's own node
    pub fn runner_for(&self, cfg: &Config, host: &str) -> Result<Arc<dyn Runner>, StepError> {
        Ok(self.services.runners.runner(host, &cfg.profile.ssh)?)
    }

    /// Runs `script` with `runner`, streaming into the task output
    pub async fn exec(&self, runner: &dyn Runner, script: String) -> Result<(), StepError> {
        debug!(
            "Task {} running {} on {} ({} bytes)",
            self.task_id,
            self.step,
            runner.host(),
            script.len()
        );
        runner
            .run(&self.cancel, Command::new(self.step, script, self.out.clone()))
            .await?;
        Ok(())
    }

    pub async fn update_kube<F>(&self, f: F) -> Result<Option<Kube>, StepError>
    where
        F: FnOnce(&mut Kube) + Send,
    {
        Ok(self.cluster.update_kube(self.store(), f).await?)
    }
}
