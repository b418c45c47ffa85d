use async_trait::async_trait;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose};
use serde::Serialize;
use skiff_core::domain::kube::CaBundle;
use tracing::info;

use super::{Step, StepContext, StepError};
use crate::config::Config;

#[derive(Serialize)]
struct Certificates<'a> {
    ca_cert: &'a str,
    ca_key: &'a str,
    is_master: bool,
}

/// Generates a self-signed cluster CA
pub fn generate_ca(cluster_name: &str) -> Result<CaBundle, StepError> {
    let err = |e: rcgen::Error| StepError::Certificate(e.to_string());

    let mut params = CertificateParams::new(Vec::<String>::new()).map_err(err)?;
    params
        .distinguished_name
        .push(DnType::CommonName, format!("{}-ca", cluster_name));
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];

    let key = KeyPair::generate().map_err(err)?;
    let cert = params.self_signed(&key).map_err(err)?;

    Ok(CaBundle {
        cert: cert.pem(),
        key: key.serialize_pem(),
    })
}

/// Writes the cluster CA to the node
///
/// The bootstrap master creates the CA on its first run; every other task
/// received it through the bootstrap signal. Only masters get the key.
pub struct CertificatesStep;

#[async_trait]
impl Step for CertificatesStep {
    fn name(&self) -> &'static str {
        "certificates"
    }

    fn depends(&self) -> &'static [&'static str] {
        &["ssh"]
    }

    async fn run(&self, ctx: &StepContext, cfg: &mut Config) -> Result<(), StepError> {
        if cfg.is_bootstrap && cfg.certificates.is_none() {
            cfg.certificates = Some(generate_ca(&cfg.cluster_name)?);
            info!("Task {} generated the CA of cluster {}", ctx.task_id, cfg.cluster_id);
        }

        let ca = cfg.ca()?;
        let script = ctx.render(
            self.name(),
            &Certificates {
                ca_cert: &ca.cert,
                ca_key: if cfg.is_master { &ca.key } else { "" },
                is_master: cfg.is_master,
            },
        )?;

        ctx.exec(cfg.runner()?.as_ref(), script).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestEnv, machine, sample_config};
    use skiff_runner::DryRunner;
    use std::sync::Arc;

    #[test]
    fn test_generate_ca_pem() {
        let ca = generate_ca("demo").unwrap();
        assert!(ca.cert.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(ca.key.contains("PRIVATE KEY"));
    }

    #[tokio::test]
    async fn test_bootstrap_master_generates_ca_once() {
        let env = TestEnv::new();
        let mut cfg = sample_config(true, true);
        cfg.node = Some(machine("m-1", true));
        cfg.runner.set(Arc::new(DryRunner::new("203.0.113.1")));
        let ctx = env.context(&cfg);

        CertificatesStep.run(&ctx, &mut cfg).await.unwrap();
        let first = cfg.ca().unwrap().clone();

        CertificatesStep.run(&ctx, &mut cfg).await.unwrap();
        assert_eq!(cfg.ca().unwrap(), &first);
    }

    #[tokio::test]
    async fn test_worker_without_ca_fails() {
        let env = TestEnv::new();
        let mut cfg = sample_config(false, false);
        cfg.node = Some(machine("w-1", false));
        cfg.runner.set(Arc::new(DryRunner::new("203.0.113.1")));
        let ctx = env.context(&cfg);

        let err = CertificatesStep.run(&ctx, &mut cfg).await.unwrap_err();
        assert!(matches!(err, StepError::MissingInput("certificates")));
    }

    #[tokio::test]
    async fn test_worker_does_not_receive_key() {
        let env = TestEnv::new();
        let mut cfg = sample_config(false, false);
        cfg.node = Some(machine("w-1", false));
        cfg.certificates = Some(CaBundle {
            cert: "CERT".to_string(),
            key: "SECRET".to_string(),
        });
        cfg.runner.set(Arc::new(DryRunner::new("203.0.113.1")));
        let ctx = env.context(&cfg);

        CertificatesStep.run(&ctx, &mut cfg).await.unwrap();
        let logged: String = ctx.out.entries().into_iter().map(|e| e.message).collect();
        assert!(logged.contains("CERT"));
        assert!(!logged.contains("SECRET"));
    }
}
