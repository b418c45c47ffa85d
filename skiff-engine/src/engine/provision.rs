//! Cluster creation
//!
//! Planning happens inline: the request is validated, every task snapshot
//! is written as `todo` and the ids are returned. The run itself continues
//! in the background: provider scaffolding, then the bootstrap master
//! followed by every other node task, then the `cluster` pipeline once all
//! node tasks succeeded.

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use skiff_core::domain::account::CloudAccount;
use skiff_core::domain::kube::{Kube, KubeState, ROLE_CLUSTER, ROLE_MASTER, ROLE_NODE};
use skiff_core::domain::task::{Status, TaskSnapshot};
use skiff_core::dto::provision::{ProvisionRequest, ProvisionResponse};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{Engine, ProvisionError};
use crate::cloud::{ClusterSpec, with_backoff};
use crate::cluster::ClusterState;
use crate::config::Config;
use crate::repository::{account_repository, kube_repository, task_repository};
use crate::store::StoreError;
use crate::task::{Task, TaskHandle, new_snapshot};
use crate::token::bootstrap_token;
use crate::workflow::{CLUSTER, Pipeline, master_pipeline, worker_pipeline};

const MAX_NAME_LEN: usize = 40;

/// Everything the background run needs, decided up front
struct ProvisionPlan {
    account: CloudAccount,
    kube: Kube,
    cluster: Arc<ClusterState>,
    master_pipeline: Pipeline,
    worker_pipeline: Pipeline,
    cluster_pipeline: Pipeline,
    /// Bootstrap master first
    nodes: Vec<TaskSnapshot<Config>>,
    post: TaskSnapshot<Config>,
}

impl Engine {
    /// Plans a cluster and starts provisioning it in the background
    pub async fn provision(&self, req: ProvisionRequest) -> Result<ProvisionResponse, ProvisionError> {
        let ProvisionRequest {
            cluster_name,
            profile,
            cloud_account_name,
        } = req;

        validate_name(&cluster_name)?;
        profile.validate()?;

        if !self.services.providers.is_registered(profile.provider) {
            return Err(ProvisionError::Validation(format!(
                "provider {} is not supported",
                profile.provider
            )));
        }

        let account = account_repository::find_by_name(self.store(), &cloud_account_name)
            .await?
            .ok_or_else(|| ProvisionError::NotFound(format!("account {}", cloud_account_name)))?;
        if account.provider != profile.provider {
            return Err(ProvisionError::Validation(format!(
                "account {} belongs to {}, profile targets {}",
                account.name, account.provider, profile.provider
            )));
        }

        let master = self.pipeline(&master_pipeline(profile.provider))?;
        let worker = self.pipeline(&worker_pipeline(profile.provider))?;
        let post = self.pipeline(CLUSTER)?;

        let discovery_url = self.discovery_url(profile.master_count()).await?;

        let id = Uuid::new_v4();
        let slug = format!("{}-{}", cluster_name, &id.simple().to_string()[..8]);
        let domain = &self.services.settings.dns_domain;

        let mut kube = Kube {
            id,
            name: cluster_name,
            provider: profile.provider,
            account_name: account.name.clone(),
            region: profile.region.clone(),
            version: profile.k8s_version.clone(),
            bootstrap_token: bootstrap_token(),
            internal_dns: format!("api-internal.{}.{}", slug, domain),
            external_dns: format!("api.{}.{}", slug, domain),
            bootstrap_address: None,
            ca: None,
            masters: BTreeMap::new(),
            workers: BTreeMap::new(),
            networking: profile.networking.clone(),
            ssh: profile.ssh.clone(),
            state: KubeState::Provisioning,
            tasks: BTreeMap::new(),
            cloud: BTreeMap::new(),
            profile,
            created_at: Utc::now(),
        };

        let mut nodes = Vec::new();
        for (i, spec) in kube.profile.masters.iter().enumerate() {
            let mut cfg = self.base_config(&kube);
            cfg.is_master = true;
            cfg.is_bootstrap = i == 0;
            cfg.node_spec = Some(spec.clone());
            cfg.node_name = format!("{}-master-{}", kube.name, i + 1);
            cfg.discovery_url = discovery_url.clone();
            nodes.push(new_snapshot(&master, cfg));
        }
        for (i, spec) in kube.profile.workers.iter().enumerate() {
            let mut cfg = self.base_config(&kube);
            cfg.node_spec = Some(spec.clone());
            cfg.node_name = format!("{}-node-{}", kube.name, i + 1);
            nodes.push(new_snapshot(&worker, cfg));
        }

        let mut cfg = self.base_config(&kube);
        cfg.is_master = true;
        cfg.is_bootstrap = true;
        cfg.node_name = format!("{}-master-1", kube.name);
        let post_snapshot = new_snapshot(&post, cfg);

        let master_count = kube.profile.master_count();
        kube.add_tasks(ROLE_MASTER, nodes[..master_count].iter().map(|s| s.id));
        kube.add_tasks(ROLE_NODE, nodes[master_count..].iter().map(|s| s.id));
        kube.add_tasks(ROLE_CLUSTER, [post_snapshot.id]);

        let planned: Vec<Uuid> = nodes.iter().chain([&post_snapshot]).map(|s| s.id).collect();
        self.reserve(&planned);
        let saved = async {
            kube_repository::save(self.store(), &kube).await?;
            for snapshot in nodes.iter().chain([&post_snapshot]) {
                task_repository::save(self.store(), snapshot).await?;
            }
            Ok::<(), StoreError>(())
        }
        .await;
        if let Err(e) = saved {
            self.release(&planned);
            return Err(e.into());
        }

        let cluster = self.clusters.insert(ClusterState::new(
            id,
            master_count,
            kube.profile.worker_count(),
        ));

        info!(
            "Provisioning cluster {} ({}): {} masters, {} workers on {}",
            kube.name,
            id,
            master_count,
            kube.profile.worker_count(),
            kube.provider
        );

        let response = ProvisionResponse {
            cluster_id: id,
            tasks: kube.tasks.clone(),
        };

        let plan = ProvisionPlan {
            account,
            kube,
            cluster,
            master_pipeline: master,
            worker_pipeline: worker,
            cluster_pipeline: post,
            nodes,
            post: post_snapshot,
        };
        let engine = self.clone();
        tokio::spawn(async move { engine.run_provision(plan).await });

        Ok(response)
    }

    async fn run_provision(self, plan: ProvisionPlan) {
        let ProvisionPlan {
            account,
            kube,
            cluster,
            master_pipeline,
            worker_pipeline,
            cluster_pipeline,
            nodes,
            mut post,
        } = plan;

        let cloud = match self.create_scaffolding(&account, &kube, &cluster).await {
            Ok(cloud) => cloud,
            Err(e) => {
                error!("Scaffolding of cluster {} failed: {}", kube.id, e);
                let message = format!("cluster scaffolding failed: {}", e);
                for snapshot in nodes.into_iter().chain([post]) {
                    self.abandon(snapshot, Status::Error, &message).await;
                }
                self.set_state(&cluster, KubeState::Failed).await;
                return;
            }
        };

        let handles: Vec<TaskHandle> = nodes
            .into_iter()
            .map(|mut snapshot| {
                snapshot.config.cloud = cloud.clone();
                let pipeline = if snapshot.config.is_master {
                    master_pipeline.clone()
                } else {
                    worker_pipeline.clone()
                };
                self.launch(Task::new(
                    self.services.clone(),
                    cluster.clone(),
                    pipeline,
                    snapshot,
                ))
            })
            .collect();

        let mut pending: FuturesUnordered<_> = handles.into_iter().map(TaskHandle::wait).collect();
        let mut failed = 0;
        while let Some(result) = pending.next().await {
            if matches!(&result, Ok(outcome) if outcome.is_success()) {
                continue;
            }

            failed += 1;
            if failed == 1 {
                warn!("Cluster {} has a failed node task, marking it failed", kube.id);
                self.set_state(&cluster, KubeState::Failed).await;
            }
        }

        if failed > 0 {
            let message = format!("{} node task(s) failed", failed);
            self.abandon(post, Status::Cancelled, &message).await;
            return;
        }

        let Some(master) = cluster.bootstrap_master() else {
            self.abandon(post, Status::Error, "bootstrap master is missing").await;
            self.set_state(&cluster, KubeState::Failed).await;
            return;
        };

        info!("All node tasks of cluster {} succeeded, running post-provision", kube.id);
        post.config.cloud = cloud;
        post.config.control_plane = Some(master.clone());
        post.config.node = Some(master);

        let handle = self.launch(Task::new(
            self.services.clone(),
            cluster,
            cluster_pipeline,
            post,
        ));
        if let Err(e) = handle.wait().await {
            error!("Post-provision task of cluster {} aborted: {}", kube.id, e);
        }
    }

    /// Creates the provider-side resources shared by every machine
    async fn create_scaffolding(
        &self,
        account: &CloudAccount,
        kube: &Kube,
        cluster: &ClusterState,
    ) -> Result<BTreeMap<String, String>, ProvisionError> {
        let provider = self.services.providers.for_account(account)?;
        let spec = ClusterSpec {
            cluster_id: kube.id,
            name: kube.name.clone(),
            region: kube.region.clone(),
            ssh_public_key: kube.ssh.bootstrap_public_key.clone(),
        };

        let budget = self.services.settings.timeouts.for_profile(&kube.profile).provision();
        let deadline = Instant::now() + budget;
        let cancel = CancellationToken::new();
        let (provider, spec) = (&provider, &spec);
        let cloud = with_backoff("create cluster", deadline, &cancel, move || {
            provider.create_cluster(spec)
        })
        .await?;

        let stored = cloud.clone();
        cluster
            .update_kube(self.store(), move |kube| kube.cloud = stored)
            .await?;
        Ok(cloud)
    }

    /// Asks the discovery endpoint for a URL sized for `masters` members
    async fn discovery_url(&self, masters: usize) -> Result<Option<String>, ProvisionError> {
        let Some(base) = &self.services.settings.discovery_url else {
            return Ok(None);
        };

        let url = format!("{}/new?size={}", base.trim_end_matches('/'), masters);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProvisionError::Discovery(e.to_string()))?;
        let body = response
            .text()
            .await
            .map_err(|e| ProvisionError::Discovery(e.to_string()))?;

        let discovery = body.trim();
        if discovery.is_empty() {
            return Err(ProvisionError::Discovery(format!("{} returned an empty body", url)));
        }
        Ok(Some(discovery.to_string()))
    }
}

/// Cluster names end up in machine names and DNS labels
fn validate_name(name: &str) -> Result<(), ProvisionError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-');

    if valid {
        Ok(())
    } else {
        Err(ProvisionError::Validation(format!(
            "cluster name '{}' must be 1-{} lowercase letters, digits or dashes",
            name, MAX_NAME_LEN
        )))
    }
}
