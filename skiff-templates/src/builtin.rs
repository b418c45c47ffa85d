//! Built-in script templates
//!
//! Used for every name the template directory does not provide.

pub const BUILTIN: &[(&str, &str)] = &[
    ("authorized_keys", include_str!("../templates/authorized_keys.sh")),
    ("bootstrap_token", include_str!("../templates/bootstrap_token.sh")),
    ("calico", include_str!("../templates/calico.sh")),
    ("certificates", include_str!("../templates/certificates.sh")),
    ("cloud_controller_manager", include_str!("../templates/cloud_controller_manager.sh")),
    ("cluster_check", include_str!("../templates/cluster_check.sh")),
    ("cluster_services", include_str!("../templates/cluster_services.sh")),
    ("cni", include_str!("../templates/cni.sh")),
    ("docker", include_str!("../templates/docker.sh")),
    ("download_binaries", include_str!("../templates/download_binaries.sh")),
    ("drain", include_str!("../templates/drain.sh")),
    ("evacuate", include_str!("../templates/evacuate.sh")),
    ("flannel", include_str!("../templates/flannel.sh")),
    ("kubeadm", include_str!("../templates/kubeadm.sh")),
    ("kubelet", include_str!("../templates/kubelet.sh")),
    ("manifest", include_str!("../templates/manifest.sh")),
    ("post_start", include_str!("../templates/post_start.sh")),
    ("prometheus", include_str!("../templates/prometheus.sh")),
    ("storage_class", include_str!("../templates/storage_class.sh")),
    ("tiller", include_str!("../templates/tiller.sh")),
    ("uncordon", include_str!("../templates/uncordon.sh")),
    ("upgrade", include_str!("../templates/upgrade.sh")),
    ("weave", include_str!("../templates/weave.sh")),
];
