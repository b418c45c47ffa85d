//! Templated provisioning steps
//!
//! Each entry derives a typed input from the shared config, renders the
//! template of the same name and runs it either on the task's own node or
//! on the cluster's bootstrap master.

use async_trait::async_trait;
use serde::Serialize;
use skiff_core::domain::profile::NetworkPlugin;
use skiff_core::domain::provider::ProviderKind;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use super::{Step, StepContext, StepError};
use crate::config::Config;
use crate::token::token_id;

const CNI_VERSION: &str = "0.8.5";

/// Host a script runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The task's own node, through the runner installed by `ssh`
    Node,
    /// The bootstrap master, for kubectl operations on other nodes
    ControlPlane,
}

/// Which configured budget bounds a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    Step,
    PostProvision,
}

type Input = fn(&Config) -> Result<serde_json::Value, StepError>;

pub struct ScriptStep {
    name: &'static str,
    depends: &'static [&'static str],
    template: Option<fn(&Config) -> &'static str>,
    input: Input,
    target: Target,
    budget: Budget,
    applies: fn(&Config) -> bool,
}

impl ScriptStep {
    pub fn new(name: &'static str, input: Input) -> Self {
        Self {
            name,
            depends: &[],
            template: None,
            input,
            target: Target::Node,
            budget: Budget::Step,
            applies: |_| true,
        }
    }

    pub fn depends(mut self, depends: &'static [&'static str]) -> Self {
        self.depends = depends;
        self
    }

    /// Picks the template per task instead of using the step name
    pub fn template(mut self, template: fn(&Config) -> &'static str) -> Self {
        self.template = Some(template);
        self
    }

    pub fn on(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    pub fn when(mut self, applies: fn(&Config) -> bool) -> Self {
        self.applies = applies;
        self
    }

    fn template_name(&self, cfg: &Config) -> &'static str {
        match self.template {
            Some(template) => template(cfg),
            None => self.name,
        }
    }

    /// Renders the script this step would run for `cfg`
    pub fn script(&self, ctx: &StepContext, cfg: &Config) -> Result<String, StepError> {
        let input = (self.input)(cfg)?;
        ctx.render(self.template_name(cfg), &input)
    }
}

#[async_trait]
impl Step for ScriptStep {
    fn name(&self) -> &'static str {
        self.name
    }

    fn depends(&self) -> &'static [&'static str] {
        self.depends
    }

    fn applies(&self, cfg: &Config) -> bool {
        (self.applies)(cfg)
    }

    fn timeout(&self, cfg: &Config) -> Duration {
        match self.budget {
            Budget::Step => cfg.timeouts.step(),
            Budget::PostProvision => cfg.timeouts.post_provision(),
        }
    }

    async fn run(&self, ctx: &StepContext, cfg: &mut Config) -> Result<(), StepError> {
        let script = self.script(ctx, cfg)?;

        let runner = match self.target {
            Target::Node => cfg.runner()?,
            Target::ControlPlane => {
                let host = cfg
                    .control_plane()?
                    .ssh_address()
                    .ok_or(StepError::MissingInput("control plane address"))?;
                ctx.runner_for(cfg, host)?
            }
        };

        ctx.exec(runner.as_ref(), script).await
    }
}

#[derive(Serialize)]
struct AuthorizedKeys<'a> {
    user: &'a str,
    public_key: &'a str,
}

#[derive(Serialize)]
struct Binaries<'a> {
    k8s_version: &'a str,
    arch: &'a str,
}

#[derive(Serialize)]
struct Docker<'a> {
    docker_version: &'a str,
    arch: &'a str,
}

#[derive(Serialize)]
struct Cni<'a> {
    cni_version: &'a str,
    arch: &'a str,
}

#[derive(Serialize)]
struct Manifest<'a> {
    k8s_version: &'a str,
    provider: ProviderKind,
    is_master: bool,
    private_ip: String,
    internal_dns: &'a str,
    external_dns: &'a str,
    pod_cidr: &'a str,
    service_cidr: &'a str,
    rbac_enabled: bool,
}

#[derive(Serialize)]
struct Kubelet<'a> {
    private_ip: String,
    node_name: &'a str,
    provider: ProviderKind,
    labels: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct BootstrapToken<'a> {
    token: &'a str,
    token_id: &'a str,
}

#[derive(Serialize)]
struct Network<'a> {
    pod_cidr: &'a str,
}

#[derive(Serialize)]
struct CloudControllerManager<'a> {
    provider: ProviderKind,
    node_name: &'a str,
    cluster_name: &'a str,
}

#[derive(Serialize)]
struct PostStart<'a> {
    timeout_secs: u64,
    node_name: &'a str,
    rbac_enabled: bool,
}

#[derive(Serialize)]
struct ClusterCheck {
    expected_masters: usize,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct ClusterServices<'a> {
    cluster_id: Uuid,
    cluster_name: &'a str,
    internal_dns: &'a str,
    external_dns: &'a str,
}

#[derive(Serialize)]
struct StorageClass {
    provider: ProviderKind,
}

#[derive(Serialize)]
struct Tiller<'a> {
    helm_version: &'a str,
    arch: &'a str,
    rbac_enabled: bool,
}

#[derive(Serialize)]
struct Prometheus {
    rbac_enabled: bool,
}

#[derive(Serialize)]
struct NodeOperation<'a> {
    node_name: &'a str,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct Uncordon<'a> {
    node_name: &'a str,
}

#[derive(Serialize)]
struct Upgrade<'a> {
    k8s_version: &'a str,
    arch: &'a str,
    is_master: bool,
}

fn private_ip(cfg: &Config) -> Result<String, StepError> {
    let node = cfg.node()?;
    node.private_ip
        .clone()
        .or_else(|| node.public_ip.clone())
        .ok_or(StepError::MissingInput("node address"))
}

/// Name of the node as known to Kubernetes
fn target_name(cfg: &Config) -> Result<&str, StepError> {
    Ok(cfg.node()?.name.as_str())
}

fn network_template(cfg: &Config) -> &'static str {
    match cfg.profile.networking.plugin {
        NetworkPlugin::Flannel => "flannel",
        NetworkPlugin::Calico => "calico",
        NetworkPlugin::Weave => "weave",
    }
}

fn value<S: Serialize>(input: S) -> Result<serde_json::Value, StepError> {
    Ok(serde_json::to_value(input)?)
}

/// The templated part of the step catalog
pub(super) fn catalog() -> Vec<ScriptStep> {
    vec![
        ScriptStep::new("authorized_keys", |cfg| {
            value(AuthorizedKeys {
                user: &cfg.profile.ssh.user,
                public_key: cfg
                    .profile
                    .ssh
                    .public_key
                    .as_deref()
                    .ok_or(StepError::MissingInput("public key"))?,
            })
        })
        .depends(&["ssh"])
        .when(|cfg| cfg.profile.ssh.public_key.is_some()),
        ScriptStep::new("download_binaries", |cfg| {
            value(Binaries {
                k8s_version: &cfg.profile.k8s_version,
                arch: &cfg.profile.arch,
            })
        })
        .depends(&["ssh"]),
        ScriptStep::new("docker", |cfg| {
            value(Docker {
                docker_version: &cfg.profile.docker_version,
                arch: &cfg.profile.arch,
            })
        })
        .depends(&["ssh"]),
        ScriptStep::new("cni", |cfg| {
            value(Cni {
                cni_version: CNI_VERSION,
                arch: &cfg.profile.arch,
            })
        })
        .depends(&["ssh"]),
        ScriptStep::new("manifest", |cfg| {
            value(Manifest {
                k8s_version: &cfg.profile.k8s_version,
                provider: cfg.provider,
                is_master: cfg.is_master,
                private_ip: private_ip(cfg)?,
                internal_dns: &cfg.internal_dns,
                external_dns: &cfg.external_dns,
                pod_cidr: &cfg.profile.networking.cidr,
                service_cidr: &cfg.profile.networking.service_cidr,
                rbac_enabled: cfg.profile.rbac_enabled,
            })
        })
        .depends(&["ssh"]),
        ScriptStep::new("kubelet", |cfg| {
            value(Kubelet {
                private_ip: private_ip(cfg)?,
                node_name: target_name(cfg)?,
                provider: cfg.provider,
                labels: cfg
                    .node_spec
                    .as_ref()
                    .map(|spec| spec.labels.clone())
                    .unwrap_or_default(),
            })
        })
        .depends(&["docker", "manifest"]),
        ScriptStep::new("bootstrap_token", |cfg| {
            value(BootstrapToken {
                token: &cfg.bootstrap_token,
                token_id: token_id(&cfg.bootstrap_token),
            })
        })
        .depends(&["kubeadm"]),
        ScriptStep::new("network", |cfg| {
            value(Network {
                pod_cidr: &cfg.profile.networking.cidr,
            })
        })
        .template(network_template)
        .depends(&["kubeadm"]),
        ScriptStep::new("cloud_controller_manager", |cfg| {
            value(CloudControllerManager {
                provider: cfg.provider,
                node_name: target_name(cfg)?,
                cluster_name: &cfg.cluster_name,
            })
        })
        .depends(&["kubeadm"]),
        ScriptStep::new("post_start", |cfg| {
            value(PostStart {
                timeout_secs: cfg.timeouts.step_secs / 2,
                node_name: target_name(cfg)?,
                rbac_enabled: cfg.profile.rbac_enabled,
            })
        })
        .depends(&["bootstrap_token", "network"]),
        ScriptStep::new("cluster_check", |cfg| {
            value(ClusterCheck {
                expected_masters: cfg.profile.master_count(),
                timeout_secs: cfg.timeouts.post_provision_secs / 2,
            })
        })
        .budget(Budget::PostProvision),
        ScriptStep::new("cluster_services", |cfg| {
            value(ClusterServices {
                cluster_id: cfg.cluster_id,
                cluster_name: &cfg.cluster_name,
                internal_dns: &cfg.internal_dns,
                external_dns: &cfg.external_dns,
            })
        })
        .depends(&["cluster_check"])
        .budget(Budget::PostProvision),
        ScriptStep::new("storage_class", |cfg| {
            value(StorageClass {
                provider: cfg.provider,
            })
        })
        .budget(Budget::PostProvision),
        ScriptStep::new("tiller", |cfg| {
            value(Tiller {
                helm_version: &cfg.profile.helm_version,
                arch: &cfg.profile.arch,
                rbac_enabled: cfg.profile.rbac_enabled,
            })
        })
        .budget(Budget::PostProvision),
        ScriptStep::new("prometheus", |cfg| {
            value(Prometheus {
                rbac_enabled: cfg.profile.rbac_enabled,
            })
        })
        .budget(Budget::PostProvision)
        .when(|cfg| cfg.profile.prometheus_enabled),
        ScriptStep::new("drain", |cfg| {
            value(NodeOperation {
                node_name: target_name(cfg)?,
                timeout_secs: cfg.timeouts.step_secs / 2,
            })
        })
        .on(Target::ControlPlane),
        ScriptStep::new("evacuate", |cfg| {
            value(NodeOperation {
                node_name: target_name(cfg)?,
                timeout_secs: cfg.timeouts.step_secs / 2,
            })
        })
        .on(Target::ControlPlane)
        .when(|cfg| match (&cfg.control_plane, &cfg.node) {
            (Some(control_plane), Some(node)) => control_plane.id != node.id,
            _ => false,
        }),
        ScriptStep::new("uncordon", |cfg| {
            value(Uncordon {
                node_name: target_name(cfg)?,
            })
        })
        .depends(&["drain"])
        .on(Target::ControlPlane),
        ScriptStep::new("upgrade", |cfg| {
            value(Upgrade {
                k8s_version: &cfg.profile.k8s_version,
                arch: &cfg.profile.arch,
                is_master: cfg.is_master,
            })
        })
        .depends(&["drain"]),
    ]
}
