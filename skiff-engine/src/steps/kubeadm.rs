use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use super::{Step, StepContext, StepError};
use crate::cluster::BootstrapMaterial;
use crate::config::Config;

const ADMIN_KUBECONFIG: &str = "/etc/kubernetes/admin.conf";

#[derive(Serialize)]
struct Kubeadm<'a> {
    is_bootstrap: bool,
    is_master: bool,
    token: &'a str,
    private_ip: &'a str,
    k8s_version: &'a str,
    internal_dns: &'a str,
    external_dns: &'a str,
    pod_cidr: &'a str,
    service_cidr: &'a str,
    discovery_url: Option<&'a str>,
    bootstrap_address: &'a str,
}

/// `kubeadm init` on the bootstrap master, `kubeadm join` everywhere else
///
/// Once init succeeds the bootstrap master records the join material on
/// the cluster record and raises the bootstrap signal.
pub struct KubeadmStep;

#[async_trait]
impl Step for KubeadmStep {
    fn name(&self) -> &'static str {
        "kubeadm"
    }

    fn depends(&self) -> &'static [&'static str] {
        &["kubelet"]
    }

    async fn run(&self, ctx: &StepContext, cfg: &mut Config) -> Result<(), StepError> {
        let node = cfg.node()?;
        let private_ip = node
            .private_ip
            .clone()
            .or_else(|| node.public_ip.clone())
            .ok_or(StepError::MissingInput("node address"))?;

        if cfg.is_bootstrap {
            cfg.bootstrap_address = Some(private_ip.clone());
        }
        let bootstrap_address = cfg
            .bootstrap_address
            .clone()
            .ok_or(StepError::MissingInput("bootstrap address"))?;

        let script = ctx.render(
            self.name(),
            &Kubeadm {
                is_bootstrap: cfg.is_bootstrap,
                is_master: cfg.is_master,
                token: &cfg.bootstrap_token,
                private_ip: &private_ip,
                k8s_version: &cfg.profile.k8s_version,
                internal_dns: &cfg.internal_dns,
                external_dns: &cfg.external_dns,
                pod_cidr: &cfg.profile.networking.cidr,
                service_cidr: &cfg.profile.networking.service_cidr,
                discovery_url: cfg.discovery_url.as_deref(),
                bootstrap_address: &bootstrap_address,
            },
        )?;
        ctx.exec(cfg.runner()?.as_ref(), script).await?;

        if cfg.is_master {
            cfg.kubeconfig = Some(ADMIN_KUBECONFIG.to_string());
        }

        if cfg.is_bootstrap {
            let material = BootstrapMaterial {
                ca: cfg.ca()?.clone(),
                token: cfg.bootstrap_token.clone(),
                bootstrap_address,
            };

            let persisted = material.clone();
            let updated = ctx
                .update_kube(move |kube| {
                    kube.ca = Some(persisted.ca);
                    kube.bootstrap_address = Some(persisted.bootstrap_address);
                    kube.bootstrap_token = persisted.token;
                })
                .await?;
            if updated.is_none() {
                warn!("Cluster {} has no record to store join material on", cfg.cluster_id);
            }

            if ctx.cluster.bootstrap.publish(material) {
                info!("Cluster {} bootstrap master is ready", cfg.cluster_id);
                ctx.out.info("published join material");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::kube_repository;
    use crate::steps::generate_ca;
    use crate::testing::{TestEnv, machine, sample_config, sample_kube};
    use skiff_runner::DryRunner;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_bootstrap_master_publishes_material() {
        let env = TestEnv::new();
        let mut cfg = sample_config(true, true);
        cfg.node = Some(machine("m-1", true));
        cfg.certificates = Some(generate_ca("demo").unwrap());
        cfg.runner.set(Arc::new(DryRunner::new("203.0.113.1")));
        let ctx = env.context(&cfg);

        let mut kube = sample_kube(1, 0);
        kube.id = cfg.cluster_id;
        kube_repository::save(env.store(), &kube).await.unwrap();

        KubeadmStep.run(&ctx, &mut cfg).await.unwrap();

        let material = ctx.cluster.bootstrap.get().unwrap();
        assert_eq!(material.bootstrap_address, "10.0.0.2");
        assert_eq!(material.token, cfg.bootstrap_token);
        assert_eq!(cfg.kubeconfig.as_deref(), Some(ADMIN_KUBECONFIG));

        let stored = kube_repository::find_by_id(env.store(), cfg.cluster_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.ca, cfg.certificates);
        assert_eq!(stored.bootstrap_address.as_deref(), Some("10.0.0.2"));
    }

    #[tokio::test]
    async fn test_join_requires_bootstrap_address() {
        let env = TestEnv::new();
        let mut cfg = sample_config(false, false);
        cfg.node = Some(machine("w-1", false));
        cfg.runner.set(Arc::new(DryRunner::new("203.0.113.1")));
        let ctx = env.context(&cfg);

        let err = KubeadmStep.run(&ctx, &mut cfg).await.unwrap_err();
        assert!(matches!(err, StepError::MissingInput("bootstrap address")));
        assert!(!ctx.cluster.bootstrap.is_published());
    }
}
