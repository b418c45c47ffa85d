//! Cluster and node deletion

use futures::future::join_all;
use skiff_core::domain::kube::{Kube, KubeState, ROLE_DELETE, TaskIds};
use skiff_core::domain::machine::{Machine, Role};
use skiff_core::domain::task::{Status, TaskSnapshot};
use skiff_runner::TaskOutput;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::{Engine, ProvisionError, is_node_pipeline};
use crate::cluster::ClusterState;
use crate::config::Config;
use crate::repository::task_repository;
use crate::store::StoreError;
use crate::steps::StepContext;
use crate::task::{Task, TaskHandle, new_snapshot};
use crate::workflow::{DELETE_CLUSTER, DELETE_NODE, Pipeline};

struct TeardownPlan {
    cluster: Arc<ClusterState>,
    /// Node tasks whose machine may exist without being on the record
    orphans: Vec<TaskSnapshot<Config>>,
    /// Workers, then non-bootstrap masters, then the bootstrap master
    phases: Vec<Vec<TaskSnapshot<Config>>>,
    last: TaskSnapshot<Config>,
    delete_node: Pipeline,
    delete_cluster: Pipeline,
}

impl Engine {
    /// Deletes every machine of a cluster, then its provider scaffolding
    ///
    /// Once the last task succeeds the cluster record is removed. If a phase
    /// fails the cluster is marked failed; deleting again picks up the
    /// machines still on the record.
    pub async fn delete_cluster(&self, cluster_id: Uuid) -> Result<TaskIds, ProvisionError> {
        let kube = self.load_kube(cluster_id).await?;
        let snapshots: Vec<TaskSnapshot<Config>> =
            task_repository::find_by_cluster(self.store(), cluster_id).await?;

        if let Some(busy) = snapshots.iter().find(|s| self.is_running(s.id)) {
            return Err(ProvisionError::Conflict(format!(
                "task {} of cluster {} is still running",
                busy.id, cluster_id
            )));
        }

        let delete_node = self.pipeline(DELETE_NODE)?;
        let delete_cluster = self.pipeline(DELETE_CLUSTER)?;
        let cluster = self.cluster_state(&kube);

        let orphans: Vec<_> = snapshots
            .into_iter()
            .filter(|s| is_orphan(s, &kube))
            .collect();

        let (bootstrap, masters): (Vec<Machine>, Vec<Machine>) =
            kube.masters.values().cloned().partition(|m| m.is_bootstrap);
        let workers: Vec<Machine> = kube.workers.values().cloned().collect();

        let phases: Vec<Vec<TaskSnapshot<Config>>> = [workers, masters, bootstrap]
            .into_iter()
            .filter(|machines| !machines.is_empty())
            .map(|machines| {
                machines
                    .into_iter()
                    .map(|machine| {
                        let mut cfg = self.base_config(&kube);
                        cfg.is_master = machine.role == Role::Master;
                        cfg.is_bootstrap = machine.is_bootstrap;
                        cfg.node_name = machine.name.clone();
                        cfg.node = Some(machine);
                        new_snapshot(&delete_node, cfg)
                    })
                    .collect()
            })
            .collect();

        let mut cfg = self.base_config(&kube);
        cfg.node_name = kube.name.clone();
        let last = new_snapshot(&delete_cluster, cfg);

        let ids: Vec<Uuid> = phases
            .iter()
            .flatten()
            .chain([&last])
            .map(|s| s.id)
            .collect();
        self.reserve(&ids);
        let saved = async {
            for snapshot in phases.iter().flatten().chain([&last]) {
                task_repository::save(self.store(), snapshot).await?;
            }

            let recorded = ids.clone();
            cluster
                .update_kube(self.store(), move |kube| {
                    kube.state = KubeState::Deleting;
                    kube.add_tasks(ROLE_DELETE, recorded);
                })
                .await?;
            Ok::<(), StoreError>(())
        }
        .await;
        if let Err(e) = saved {
            self.release(&ids);
            return Err(e.into());
        }

        info!(
            "Deleting cluster {}: {} machines, {} orphaned task(s)",
            cluster_id,
            kube.masters.len() + kube.workers.len(),
            orphans.len()
        );

        let plan = TeardownPlan {
            cluster,
            orphans,
            phases,
            last,
            delete_node,
            delete_cluster,
        };
        let engine = self.clone();
        tokio::spawn(async move { engine.run_teardown(plan).await });

        Ok(TaskIds::from([(ROLE_DELETE.to_string(), ids)]))
    }

    async fn run_teardown(self, plan: TeardownPlan) {
        let TeardownPlan {
            cluster,
            orphans,
            phases,
            last,
            delete_node,
            delete_cluster,
        } = plan;
        let cluster_id = cluster.cluster_id;

        self.roll_back_orphans(&cluster, orphans).await;

        let mut phases = phases.into_iter();
        while let Some(phase) = phases.next() {
            let handles: Vec<TaskHandle> = phase
                .into_iter()
                .map(|snapshot| {
                    self.launch(Task::new(
                        self.services.clone(),
                        cluster.clone(),
                        delete_node.clone(),
                        snapshot,
                    ))
                })
                .collect();

            let failed = join_all(handles.into_iter().map(TaskHandle::wait))
                .await
                .iter()
                .filter(|r| !matches!(r, Ok(outcome) if outcome.is_success()))
                .count();

            if failed > 0 {
                warn!("{} node deletion(s) of cluster {} failed", failed, cluster_id);
                self.set_state(&cluster, KubeState::Failed).await;
                for snapshot in phases.by_ref().flatten().chain([last]) {
                    self.abandon(snapshot, Status::Cancelled, "an earlier deletion failed")
                        .await;
                }
                return;
            }
        }

        let handle = self.launch(Task::new(
            self.services.clone(),
            cluster,
            delete_cluster,
            last,
        ));
        if let Err(e) = handle.wait().await {
            warn!("Deletion of cluster {} aborted: {}", cluster_id, e);
        }
    }

    /// Deletes machines created by node tasks that never recorded them
    async fn roll_back_orphans(&self, cluster: &Arc<ClusterState>, orphans: Vec<TaskSnapshot<Config>>) {
        let Some(step) = self.steps.get("create_machine") else {
            return;
        };

        for mut snapshot in orphans {
            let ctx = StepContext {
                services: self.services.clone(),
                task_id: snapshot.id,
                step: step.name(),
                cancel: CancellationToken::new(),
                out: TaskOutput::new(self.services.settings.output_capacity),
                cluster: cluster.clone(),
                deadline: Instant::now() + snapshot.config.timeouts.provision(),
            };

            match step.rollback(&ctx, &mut snapshot.config).await {
                Ok(()) => info!("Rolled back machine of task {}", snapshot.id),
                Err(e) => warn!("Failed to roll back machine of task {}: {}", snapshot.id, e),
            }
        }
    }

    /// Evacuates a node from the cluster, deletes its machine and drops it
    /// from the record
    pub async fn delete_node(&self, cluster_id: Uuid, machine_id: &str) -> Result<TaskIds, ProvisionError> {
        let kube = self.load_kube(cluster_id).await?;
        if kube.state != KubeState::Operational {
            return Err(ProvisionError::Conflict(format!(
                "cluster {} is {:?}, not operational",
                cluster_id, kube.state
            )));
        }

        let machine = kube
            .masters
            .get(machine_id)
            .or_else(|| kube.workers.get(machine_id))
            .cloned()
            .ok_or_else(|| {
                ProvisionError::NotFound(format!("node {} of cluster {}", machine_id, cluster_id))
            })?;
        if machine.is_bootstrap {
            return Err(ProvisionError::Conflict(format!(
                "node {} is the bootstrap master; delete the cluster instead",
                machine_id
            )));
        }

        let pipeline = self.pipeline(DELETE_NODE)?;
        let cluster = self.cluster_state(&kube);

        let mut cfg = self.base_config(&kube);
        cfg.is_master = machine.role == Role::Master;
        cfg.node_name = machine.name.clone();
        cfg.control_plane = kube.bootstrap_master().cloned();
        cfg.node = Some(machine);

        let snapshot = new_snapshot(&pipeline, cfg);
        let id = snapshot.id;
        self.reserve(&[id]);
        let saved = async {
            task_repository::save(self.store(), &snapshot).await?;
            cluster
                .update_kube(self.store(), move |kube| kube.add_tasks(ROLE_DELETE, [id]))
                .await?;
            Ok::<(), StoreError>(())
        }
        .await;
        if let Err(e) = saved {
            self.release(&[id]);
            return Err(e.into());
        }

        info!("Deleting node {} of cluster {} (task {})", machine_id, cluster_id, id);
        self.launch(Task::new(self.services.clone(), cluster, pipeline, snapshot));

        Ok(TaskIds::from([(ROLE_DELETE.to_string(), vec![id])]))
    }
}

/// A node task that got past machine creation without its node landing on
/// the cluster record
fn is_orphan(snapshot: &TaskSnapshot<Config>, kube: &Kube) -> bool {
    if !is_node_pipeline(&snapshot.pipeline) {
        return false;
    }

    let attempted = snapshot
        .step("create_machine")
        .is_some_and(|s| !matches!(s.status, Status::Todo | Status::Skipped));
    let recorded = snapshot
        .config
        .node
        .as_ref()
        .is_some_and(|n| kube.masters.contains_key(&n.id) || kube.workers.contains_key(&n.id));

    attempted && !recorded
}
