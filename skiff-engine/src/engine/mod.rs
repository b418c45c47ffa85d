//! Cluster orchestration
//!
//! The [`Engine`] expands operator requests into tasks, launches them and
//! folds their outcomes back into the cluster's Kube record. It owns the
//! registries built at startup and the set of tasks running in this
//! process; everything else lives in the store.

mod provision;
mod scale;
mod teardown;

#[cfg(test)]
mod scenarios;

use serde_json::Value;
use skiff_core::domain::kube::{Kube, KubeState};
use skiff_core::domain::log::LogEntry;
use skiff_core::domain::profile::ProfileError;
use skiff_core::domain::task::{Status, TaskSnapshot};
use skiff_core::dto::kube::{KubeSummary, PipelineSummary};
use skiff_runner::RunnerError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cloud::ProviderError;
use crate::cluster::{ClusterRegistry, ClusterState};
use crate::config::{Config, RunnerSlot};
use crate::repository::{kube_repository, log_repository, task_repository};
use crate::settings::EngineSettings;
use crate::steps::{Services, StepRegistry};
use crate::store::{Store, StoreError};
use crate::task::{Task, TaskError, TaskHandle, TaskOutcome};
use crate::workflow::{
    CLUSTER, DELETE_CLUSTER, DELETE_NODE, Pipeline, PipelineError, PipelineRegistry, UPGRADE_NODE,
};

pub const REDACTED: &str = "<redacted>";

/// Secrets blanked out of task configs before they leave the engine
const TASK_SECRETS: &[&str] = &["/profile/ssh/bootstrapPrivateKey", "/certificates/key"];

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("discovery endpoint failed: {0}")]
    Discovery(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to rebuild runner: {0}")]
    Runner(#[from] RunnerError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ProfileError> for ProvisionError {
    fn from(e: ProfileError) -> Self {
        ProvisionError::Validation(e.to_string())
    }
}

impl From<TaskError> for ProvisionError {
    fn from(e: TaskError) -> Self {
        match e {
            TaskError::InvalidState(message) => ProvisionError::Conflict(message),
            TaskError::Runner(e) => ProvisionError::Runner(e),
            TaskError::Store(e) => ProvisionError::Store(e),
            other => ProvisionError::Internal(other.to_string()),
        }
    }
}

/// Provisioning engine
///
/// Cheap to clone; clones share the registries and the running set.
#[derive(Clone)]
pub struct Engine {
    services: Arc<Services>,
    steps: Arc<StepRegistry>,
    pipelines: Arc<PipelineRegistry>,
    clusters: ClusterRegistry,
    running: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
    http: reqwest::Client,
}

impl Engine {
    /// Builds the step and pipeline registries; a broken pipeline
    /// definition fails here
    pub fn new(services: Services) -> Result<Self, PipelineError> {
        Self::with_services(Arc::new(services))
    }

    pub fn with_services(services: Arc<Services>) -> Result<Self, PipelineError> {
        let steps = StepRegistry::builtin();
        let pipelines = PipelineRegistry::builtin(&steps)?;
        info!(
            "Engine ready: {} steps, {} pipelines, dry run: {}",
            steps.names().count(),
            pipelines.summaries().len(),
            services.runners.is_dry_run()
        );

        Ok(Self {
            services,
            steps: Arc::new(steps),
            pipelines: Arc::new(pipelines),
            clusters: ClusterRegistry::new(),
            running: Arc::new(Mutex::new(HashMap::new())),
            http: reqwest::Client::new(),
        })
    }

    pub fn store(&self) -> &dyn Store {
        self.services.store.as_ref()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.services.settings
    }

    pub fn is_running(&self, task_id: Uuid) -> bool {
        self.running().contains_key(&task_id)
    }

    pub fn pipelines(&self) -> Vec<PipelineSummary> {
        self.pipelines.summaries()
    }

    /// Task snapshot with secrets redacted
    pub async fn get_task(&self, task_id: Uuid) -> Result<TaskSnapshot, ProvisionError> {
        let mut snapshot: TaskSnapshot = task_repository::find_by_id(self.store(), task_id)
            .await?
            .ok_or_else(|| ProvisionError::NotFound(format!("task {}", task_id)))?;

        redact(&mut snapshot.config, TASK_SECRETS);
        Ok(snapshot)
    }

    /// Output captured for a task, as of its last flush
    pub async fn task_logs(&self, task_id: Uuid) -> Result<Vec<LogEntry>, ProvisionError> {
        self.get_task(task_id).await?;
        Ok(log_repository::find_by_task(self.store(), task_id).await?)
    }

    /// Cluster record with secrets redacted
    pub async fn get_kube(&self, cluster_id: Uuid) -> Result<Kube, ProvisionError> {
        let mut kube = self.load_kube(cluster_id).await?;

        if let Some(ca) = &mut kube.ca {
            ca.key = REDACTED.to_string();
        }
        kube.ssh.bootstrap_private_key = REDACTED.to_string();
        kube.profile.ssh.bootstrap_private_key = REDACTED.to_string();
        Ok(kube)
    }

    pub async fn list_kubes(&self) -> Result<Vec<KubeSummary>, ProvisionError> {
        let kubes = kube_repository::list_all(self.store()).await?;
        Ok(kubes.into_iter().map(KubeSummary::from).collect())
    }

    /// Resumes a failed or cancelled task from its first unfinished step
    pub async fn restart(&self, task_id: Uuid) -> Result<(), ProvisionError> {
        let cancel = self.claim(task_id)?;

        match self.prepare_restart(task_id).await {
            Ok(task) => {
                self.launch(task.with_cancel(cancel));
                Ok(())
            }
            Err(e) => {
                self.running().remove(&task_id);
                Err(e)
            }
        }
    }

    async fn prepare_restart(&self, task_id: Uuid) -> Result<Task, ProvisionError> {
        let mut snapshot: TaskSnapshot<Config> = task_repository::find_by_id(self.store(), task_id)
            .await?
            .ok_or_else(|| ProvisionError::NotFound(format!("task {}", task_id)))?;

        let pipeline = self.pipeline(&snapshot.pipeline)?;
        let kube = self.load_kube(snapshot.cluster_id).await?;
        let cluster = self.cluster_state(&kube);

        if snapshot.pipeline == CLUSTER && snapshot.config.node.is_none() {
            let master = cluster.bootstrap_master().ok_or_else(|| {
                ProvisionError::Conflict(format!("cluster {} has no bootstrap master yet", kube.id))
            })?;
            snapshot.config.control_plane = Some(master.clone());
            snapshot.config.node = Some(master);
        }

        info!("Restarting task {} ({})", task_id, snapshot.pipeline);
        Ok(Task::resume(self.services.clone(), cluster, pipeline, snapshot).await?)
    }

    /// Cancels a task running in this process
    pub async fn cancel(&self, task_id: Uuid) -> Result<(), ProvisionError> {
        let token = self.running().get(&task_id).cloned();
        if let Some(token) = token {
            info!("Cancelling task {}", task_id);
            token.cancel();
            return Ok(());
        }

        match task_repository::find_by_id::<Value>(self.store(), task_id).await? {
            Some(_) => Err(ProvisionError::Conflict(format!(
                "task {} is not running",
                task_id
            ))),
            None => Err(ProvisionError::NotFound(format!("task {}", task_id))),
        }
    }

    fn running(&self) -> MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Marks `task_id` as running unless it already is
    fn claim(&self, task_id: Uuid) -> Result<CancellationToken, ProvisionError> {
        let mut running = self.running();
        if running.contains_key(&task_id) {
            return Err(ProvisionError::Conflict(format!(
                "task {} is still running",
                task_id
            )));
        }

        let token = CancellationToken::new();
        running.insert(task_id, token.clone());
        Ok(token)
    }

    /// Holds planned task ids in the running set until they are launched
    /// or abandoned
    fn reserve(&self, ids: &[Uuid]) {
        let mut running = self.running();
        for id in ids {
            running.entry(*id).or_insert_with(CancellationToken::new);
        }
    }

    fn release(&self, ids: &[Uuid]) {
        let mut running = self.running();
        for id in ids {
            running.remove(id);
        }
    }

    fn pipeline(&self, name: &str) -> Result<Pipeline, PipelineError> {
        self.pipelines.get(name).cloned()
    }

    async fn load_kube(&self, cluster_id: Uuid) -> Result<Kube, ProvisionError> {
        kube_repository::find_by_id(self.store(), cluster_id)
            .await?
            .ok_or_else(|| ProvisionError::NotFound(format!("cluster {}", cluster_id)))
    }

    /// Shared state of a cluster, rebuilt from its record if this process
    /// has not seen it yet
    fn cluster_state(&self, kube: &Kube) -> Arc<ClusterState> {
        self.clusters
            .get(kube.id)
            .unwrap_or_else(|| self.clusters.insert(ClusterState::from_kube(kube)))
    }

    /// Config every task of `kube` starts from
    fn base_config(&self, kube: &Kube) -> Config {
        Config {
            task_id: Uuid::new_v4(),
            cluster_id: kube.id,
            cluster_name: kube.name.clone(),
            provider: kube.provider,
            account_name: kube.account_name.clone(),
            profile: kube.profile.clone(),
            is_master: false,
            is_bootstrap: false,
            is_import: false,
            node_spec: None,
            node_name: String::new(),
            node: None,
            control_plane: None,
            bootstrap_token: kube.bootstrap_token.clone(),
            internal_dns: kube.internal_dns.clone(),
            external_dns: kube.external_dns.clone(),
            discovery_url: None,
            certificates: kube.ca.clone(),
            bootstrap_address: kube.bootstrap_address.clone(),
            kubeconfig: None,
            cloud: kube.cloud.clone(),
            timeouts: self.services.settings.timeouts.for_profile(&kube.profile),
            runner: RunnerSlot::default(),
        }
    }

    /// Runs `task` in the background and records its outcome on the
    /// cluster when it ends
    ///
    /// A reserved task inherits the token of its reservation, so a cancel
    /// issued while it was pending still applies.
    fn launch(&self, task: Task) -> TaskHandle {
        let id = task.id();
        let task = {
            let mut running = self.running();
            match running.get(&id).cloned() {
                Some(reserved) => task.with_cancel(reserved),
                None => {
                    running.insert(id, task.cancel_token());
                    task
                }
            }
        };

        let engine = self.clone();
        task.spawn_with(move |outcome| async move {
            engine.complete(&outcome).await;
            outcome
        })
    }

    async fn complete(&self, outcome: &TaskOutcome) {
        let snapshot = &outcome.snapshot;
        if let Err(e) = self.record_outcome(outcome).await {
            error!(
                "Failed to record outcome of task {} on cluster {}: {}",
                snapshot.id, snapshot.cluster_id, e
            );
        }
        self.running().remove(&snapshot.id);
    }

    async fn record_outcome(&self, outcome: &TaskOutcome) -> Result<(), StoreError> {
        let snapshot = &outcome.snapshot;
        let Some(cluster) = self.clusters.get(snapshot.cluster_id) else {
            debug!("Cluster {} is no longer tracked", snapshot.cluster_id);
            return Ok(());
        };
        let store = self.store();

        match snapshot.pipeline.as_str() {
            CLUSTER => {
                let state = if outcome.is_success() {
                    KubeState::Operational
                } else {
                    KubeState::Failed
                };
                cluster.update_kube(store, |kube| kube.state = state).await?;
                info!("Cluster {} is now {:?}", snapshot.cluster_id, state);
            }
            DELETE_NODE => {
                let Some(node) = snapshot.config.node.as_ref().filter(|_| outcome.is_success()) else {
                    return Ok(());
                };
                let id = node.id.clone();
                cluster
                    .update_kube(store, move |kube| {
                        kube.masters.remove(&id);
                        kube.workers.remove(&id);
                    })
                    .await?;
                info!("Removed node {} from cluster {}", node.id, snapshot.cluster_id);
            }
            DELETE_CLUSTER => {
                if outcome.is_success() {
                    let _guard = cluster.kube_lock.lock().await;
                    kube_repository::delete(store, snapshot.cluster_id).await?;
                    self.clusters.remove(snapshot.cluster_id);
                    info!("Cluster {} deleted", snapshot.cluster_id);
                } else {
                    cluster
                        .update_kube(store, |kube| kube.state = KubeState::Failed)
                        .await?;
                }
            }
            UPGRADE_NODE => {}
            _ => {
                let Some(node) = snapshot.config.node.clone().filter(|_| outcome.is_success()) else {
                    return Ok(());
                };
                let is_master = snapshot.config.is_master;
                let id = node.id.clone();
                cluster
                    .update_kube(store, move |kube| {
                        let nodes = if is_master {
                            &mut kube.masters
                        } else {
                            &mut kube.workers
                        };
                        nodes.insert(node.id.clone(), node);
                    })
                    .await?;
                debug!("Recorded node {} on cluster {}", id, snapshot.cluster_id);
            }
        }

        Ok(())
    }

    async fn set_state(&self, cluster: &ClusterState, state: KubeState) {
        if let Err(e) = cluster.update_kube(self.store(), |kube| kube.state = state).await {
            error!("Failed to mark cluster {} {:?}: {}", cluster.cluster_id, state, e);
        }
    }

    /// Persists a task that will not be launched, with `status` on its
    /// first step so it can be restarted later
    async fn abandon(
        &self,
        mut snapshot: TaskSnapshot<Config>,
        status: Status,
        message: &str,
    ) {
        if let Some(first) = snapshot.step_statuses.first_mut() {
            let now = chrono::Utc::now();
            first.status = status;
            first.error_message = Some(message.to_string());
            first.started_at = Some(now);
            first.finished_at = Some(now);
        }

        warn!("Task {} ({}) not launched: {}", snapshot.id, snapshot.pipeline, message);
        if let Err(e) = task_repository::save(self.store(), &snapshot).await {
            error!("Failed to store task {}: {}", snapshot.id, e);
        }
        self.release(&[snapshot.id]);
    }
}

/// Whether `pipeline` provisions a node
fn is_node_pipeline(pipeline: &str) -> bool {
    pipeline.ends_with("-master") || pipeline.ends_with("-worker")
}

fn redact(value: &mut Value, paths: &[&str]) {
    for path in paths {
        if let Some(secret) = value.pointer_mut(path).filter(|v| v.is_string()) {
            *secret = Value::String(REDACTED.to_string());
        }
    }
}
