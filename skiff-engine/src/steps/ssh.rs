use async_trait::async_trait;
use skiff_runner::wait_for_port;
use std::time::Duration;
use tracing::{debug, info};

use super::{Step, StepContext, StepError};
use crate::config::Config;

/// Waits until the node accepts SSH and installs the task's runner
///
/// Tasks other than the bootstrap master first block on the bootstrap
/// signal, then copy the published join material into their config.
pub struct SshStep;

#[async_trait]
impl Step for SshStep {
    fn name(&self) -> &'static str {
        "ssh"
    }

    fn timeout(&self, cfg: &Config) -> Duration {
        if cfg.is_bootstrap {
            cfg.timeouts.ssh_wait()
        } else {
            cfg.timeouts.ssh_wait() + cfg.timeouts.barrier()
        }
    }

    async fn run(&self, ctx: &StepContext, cfg: &mut Config) -> Result<(), StepError> {
        if !cfg.is_bootstrap {
            debug!(
                "Task {} waiting for the bootstrap master of cluster {}",
                ctx.task_id, cfg.cluster_id
            );
            let material = ctx
                .cluster
                .bootstrap
                .wait(cfg.timeouts.barrier(), &ctx.cancel)
                .await?;
            cfg.adopt(&material);
            ctx.out.info("bootstrap master is ready");
        }

        let node = cfg.node()?;
        let host = node
            .ssh_address()
            .ok_or(StepError::MissingInput("node address"))?
            .to_string();

        if !ctx.is_dry_run() {
            let address = format!("{}:{}", host, cfg.profile.ssh.port);
            ctx.out.info(format!("waiting for {} to accept connections", address));
            wait_for_port(
                &address,
                ctx.services.settings.port_wait_interval,
                cfg.timeouts.ssh_wait(),
                &ctx.cancel,
            )
            .await?;
        }

        let runner = ctx.runner_for(cfg, &host)?;
        cfg.runner.set(runner);

        info!("Task {} reached {} over ssh", ctx.task_id, host);
        Ok(())
    }
}
