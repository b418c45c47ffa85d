//! Steps that call the cloud provider

use async_trait::async_trait;
use skiff_core::domain::machine::{Machine, MachineState};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

use super::{Step, StepContext, StepError};
use crate::cloud::{
    BOOTSTRAP_TAG, MachineRequest, Provider, ProviderError, SSH_KEY_ID, cluster_tag, role_tag, task_tag,
    with_backoff,
};
use crate::config::Config;

/// Creates the task's machine and waits until it is active
///
/// The machine is tagged with the task id, so a re-run finds the machine
/// of an earlier attempt instead of creating a second one.
pub struct CreateMachineStep;

impl CreateMachineStep {
    async fn find_or_create(
        &self,
        ctx: &StepContext,
        cfg: &Config,
        provider: &Provider,
    ) -> Result<Machine, StepError> {
        let region = cfg.region();
        let tag = task_tag(cfg.task_id);
        let tag = tag.as_str();

        let existing = with_backoff("find machine", ctx.deadline, &ctx.cancel, move || {
            provider.find_machine(region, tag)
        })
        .await?;

        if let Some(machine) = existing {
            info!(
                "Task {} found machine {} from an earlier attempt",
                ctx.task_id, machine.id
            );
            ctx.out.info(format!("reusing machine {}", machine.id));
            return Ok(machine);
        }

        let spec = cfg
            .node_spec
            .as_ref()
            .ok_or(StepError::MissingInput("node spec"))?;

        let mut tags = vec![
            tag.to_string(),
            cluster_tag(cfg.cluster_id),
            role_tag(cfg.role()),
        ];
        if cfg.is_bootstrap {
            tags.push(BOOTSTRAP_TAG.to_string());
        }

        let request = MachineRequest {
            name: cfg.node_name.clone(),
            role: cfg.role(),
            is_bootstrap: cfg.is_bootstrap,
            region: region.to_string(),
            size: spec.size.clone(),
            image: spec.image.clone(),
            tags,
            ssh_key_ids: cfg.cloud.get(SSH_KEY_ID).cloned().into_iter().collect(),
        };
        let request = &request;

        let what = format!("create machine {}", cfg.node_name);
        let machine = with_backoff(&what, ctx.deadline, &ctx.cancel, move || {
            provider.create_machine(request)
        })
        .await?;

        info!("Task {} created machine {} ({})", ctx.task_id, machine.id, machine.name);
        ctx.out.info(format!("created machine {}", machine.id));
        Ok(machine)
    }

    async fn wait_active(
        &self,
        ctx: &StepContext,
        cfg: &Config,
        provider: &Provider,
        mut machine: Machine,
    ) -> Result<Machine, StepError> {
        let interval = ctx.services.settings.poll_interval;
        let region = cfg.region();

        while !machine.is_active() {
            if machine.state == MachineState::Error {
                return Err(ProviderError::Permanent(format!(
                    "machine {} entered error state",
                    machine.id
                ))
                .into());
            }
            if Instant::now() + interval > ctx.deadline {
                return Err(StepError::ProvisionTimeout(cfg.timeouts.provision()));
            }

            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(StepError::Cancelled),
                _ = sleep(interval) => {}
            }

            let id = machine.id.as_str();
            machine = with_backoff("poll machine", ctx.deadline, &ctx.cancel, move || {
                provider.get_machine(region, id)
            })
            .await?;
        }

        Ok(machine)
    }
}

#[async_trait]
impl Step for CreateMachineStep {
    fn name(&self) -> &'static str {
        "create_machine"
    }

    fn applies(&self, cfg: &Config) -> bool {
        !cfg.is_import
    }

    fn timeout(&self, cfg: &Config) -> Duration {
        cfg.timeouts.provision()
    }

    async fn run(&self, ctx: &StepContext, cfg: &mut Config) -> Result<(), StepError> {
        let provider = ctx.provider(cfg).await?;

        let machine = self.find_or_create(ctx, cfg, &provider).await?;
        let mut machine = self.wait_active(ctx, cfg, &provider, machine).await?;
        machine.role = cfg.role();
        machine.is_bootstrap = cfg.is_bootstrap;

        let nodes = if cfg.is_master {
            &ctx.cluster.masters
        } else {
            &ctx.cluster.workers
        };
        if !nodes.add(machine.clone())? {
            info!("Machine {} was already known to cluster {}", machine.id, cfg.cluster_id);
        }

        ctx.out.info(format!(
            "machine {} is active at {}",
            machine.id,
            machine.ssh_address().unwrap_or("<no address>")
        ));
        cfg.node = Some(machine);
        Ok(())
    }

    /// Deletes the task's machine, whether or not it was recorded
    async fn rollback(&self, ctx: &StepContext, cfg: &mut Config) -> Result<(), StepError> {
        let provider = ctx.provider(cfg).await?;
        let region = cfg.region();

        let machine = match &cfg.node {
            Some(node) => Some(node.clone()),
            None => {
                let tag = task_tag(cfg.task_id);
                let tag = tag.as_str();
                let provider = &provider;
                with_backoff("find machine", ctx.deadline, &ctx.cancel, move || {
                    provider.find_machine(region, tag)
                })
                .await?
            }
        };

        let Some(machine) = machine else {
            return Ok(());
        };

        let id = machine.id.as_str();
        let provider = &provider;
        with_backoff("delete machine", ctx.deadline, &ctx.cancel, move || {
            provider.delete_machine(region, id)
        })
        .await?;

        warn!("Rolled back machine {} of task {}", machine.id, cfg.task_id);
        Ok(())
    }
}

/// Deletes the task's machine; a machine that is already gone counts as
/// deleted
pub struct DeleteMachineStep;

#[async_trait]
impl Step for DeleteMachineStep {
    fn name(&self) -> &'static str {
        "delete_machine"
    }

    fn timeout(&self, cfg: &Config) -> Duration {
        cfg.timeouts.provision()
    }

    async fn run(&self, ctx: &StepContext, cfg: &mut Config) -> Result<(), StepError> {
        let provider = ctx.provider(cfg).await?;
        let node = cfg.node()?;
        let region = node.region.as_str();
        let id = node.id.as_str();
        let provider = &provider;

        match with_backoff("delete machine", ctx.deadline, &ctx.cancel, move || {
            provider.delete_machine(region, id)
        })
        .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        info!("Task {} deleted machine {}", ctx.task_id, id);
        ctx.out.info(format!("deleted machine {}", id));
        Ok(())
    }
}

/// Removes the provider scaffolding of a cluster
pub struct DeleteClusterStep;

#[async_trait]
impl Step for DeleteClusterStep {
    fn name(&self) -> &'static str {
        "delete_cluster"
    }

    fn timeout(&self, cfg: &Config) -> Duration {
        cfg.timeouts.provision()
    }

    async fn run(&self, ctx: &StepContext, cfg: &mut Config) -> Result<(), StepError> {
        let provider = ctx.provider(cfg).await?;
        let provider = &provider;
        let cluster_id = cfg.cluster_id;
        let cloud = &cfg.cloud;

        with_backoff("delete cluster", ctx.deadline, &ctx.cancel, move || {
            provider.delete_cluster(cluster_id, cloud)
        })
        .await?;

        info!("Task {} removed scaffolding of cluster {}", ctx.task_id, cluster_id);
        ctx.out.info(format!("deleted cluster {}", cluster_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestEnv, sample_config};

    fn worker_config() -> Config {
        let mut cfg = sample_config(false, false);
        cfg.provider = skiff_core::domain::provider::ProviderKind::Fake;
        cfg
    }

    #[tokio::test]
    async fn test_create_machine_records_node() {
        let env = TestEnv::new();
        let mut cfg = worker_config();
        let ctx = env.context(&cfg);

        CreateMachineStep.run(&ctx, &mut cfg).await.unwrap();

        let node = cfg.node().unwrap();
        assert!(node.is_active());
        assert!(!node.is_bootstrap);
        assert_eq!(ctx.cluster.workers.get(&node.id).unwrap().id, node.id);
        assert_eq!(env.fake().creates(), 1);
    }

    #[tokio::test]
    async fn test_create_machine_is_idempotent() {
        let env = TestEnv::new();
        let mut cfg = worker_config();
        let ctx = env.context(&cfg);

        CreateMachineStep.run(&ctx, &mut cfg).await.unwrap();
        let first = cfg.node.clone().unwrap();

        // snapshot lost: the re-run starts from the original config
        cfg.node = None;
        CreateMachineStep.run(&ctx, &mut cfg).await.unwrap();

        assert_eq!(cfg.node().unwrap().id, first.id);
        assert_eq!(env.fake().creates(), 1);
        assert_eq!(ctx.cluster.workers.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_machine_retries_transient_errors() {
        let env = TestEnv::new();
        let mut cfg = worker_config();
        let ctx = env.context(&cfg);
        env.fake().inject_transient_failures(2);

        CreateMachineStep.run(&ctx, &mut cfg).await.unwrap();
        assert_eq!(env.fake().creates(), 1);
    }

    #[tokio::test]
    async fn test_create_machine_skipped_for_import() {
        let mut cfg = worker_config();
        cfg.is_import = true;
        assert!(!CreateMachineStep.applies(&cfg));
    }

    #[tokio::test]
    async fn test_create_machine_needs_account() {
        let env = TestEnv::new();
        let mut cfg = worker_config();
        cfg.account_name = "missing".to_string();
        let ctx = env.context(&cfg);

        let err = CreateMachineStep.run(&ctx, &mut cfg).await.unwrap_err();
        assert!(matches!(err, StepError::Provider(ProviderError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rollback_and_delete_are_idempotent() {
        let env = TestEnv::new();
        let mut cfg = worker_config();
        let ctx = env.context(&cfg);

        CreateMachineStep.run(&ctx, &mut cfg).await.unwrap();
        assert_eq!(env.fake().machines().len(), 1);

        CreateMachineStep.rollback(&ctx, &mut cfg).await.unwrap();
        assert!(env.fake().machines().is_empty());

        DeleteMachineStep.run(&ctx, &mut cfg).await.unwrap();
    }
}
