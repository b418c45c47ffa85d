use skiff_core::domain::kube::{KubeState, ROLE_NODE, TaskIds};
use skiff_core::domain::profile::NodeSpec;
use tracing::info;
use uuid::Uuid;

use super::{Engine, ProvisionError};
use crate::repository::task_repository;
use crate::store::StoreError;
use crate::task::{Task, new_snapshot};
use crate::workflow::worker_pipeline;

impl Engine {
    /// Joins new workers to an operational cluster
    ///
    /// The workers take their join material from the cluster record, so the
    /// barrier in their `ssh` step opens immediately.
    pub async fn add_nodes(&self, cluster_id: Uuid, nodes: Vec<NodeSpec>) -> Result<TaskIds, ProvisionError> {
        if nodes.is_empty() {
            return Err(ProvisionError::Validation("at least one node is required".to_string()));
        }
        if let Some(bad) = nodes
            .iter()
            .find(|n| n.size.trim().is_empty() || n.image.trim().is_empty())
        {
            return Err(ProvisionError::Validation(format!(
                "node spec needs a size and an image, got '{}' / '{}'",
                bad.size, bad.image
            )));
        }

        let kube = self.load_kube(cluster_id).await?;
        if kube.state != KubeState::Operational {
            return Err(ProvisionError::Conflict(format!(
                "cluster {} is {:?}, not operational",
                cluster_id, kube.state
            )));
        }
        if kube.ca.is_none() || kube.bootstrap_address.is_none() {
            return Err(ProvisionError::Conflict(format!(
                "cluster {} has no join material",
                cluster_id
            )));
        }

        let pipeline = self.pipeline(&worker_pipeline(kube.provider))?;
        let cluster = self.cluster_state(&kube);
        cluster.workers.reserve(nodes.len());

        let offset = kube.tasks.get(ROLE_NODE).map_or(0, Vec::len);
        let snapshots: Vec<_> = nodes
            .into_iter()
            .enumerate()
            .map(|(i, spec)| {
                let mut cfg = self.base_config(&kube);
                cfg.node_spec = Some(spec);
                cfg.node_name = format!("{}-node-{}", kube.name, offset + i + 1);
                new_snapshot(&pipeline, cfg)
            })
            .collect();

        let ids: Vec<Uuid> = snapshots.iter().map(|s| s.id).collect();
        self.reserve(&ids);
        let saved = async {
            for snapshot in &snapshots {
                task_repository::save(self.store(), snapshot).await?;
            }

            let recorded = ids.clone();
            cluster
                .update_kube(self.store(), move |kube| kube.add_tasks(ROLE_NODE, recorded))
                .await?;
            Ok::<(), StoreError>(())
        }
        .await;
        if let Err(e) = saved {
            self.release(&ids);
            return Err(e.into());
        }

        info!("Adding {} worker(s) to cluster {}", ids.len(), cluster_id);
        for snapshot in snapshots {
            self.launch(Task::new(
                self.services.clone(),
                cluster.clone(),
                pipeline.clone(),
                snapshot,
            ));
        }

        Ok(TaskIds::from([(ROLE_NODE.to_string(), ids)]))
    }
}
