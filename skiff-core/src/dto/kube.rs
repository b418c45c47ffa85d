//! Kube and registry DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::kube::{Kube, KubeState};
use crate::domain::provider::ProviderKind;

/// Lightweight cluster summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeSummary {
    pub id: Uuid,
    pub name: String,
    pub provider: ProviderKind,
    pub region: String,
    pub version: String,
    pub state: KubeState,
    pub masters: usize,
    pub workers: usize,
}

impl From<Kube> for KubeSummary {
    fn from(kube: Kube) -> Self {
        Self {
            id: kube.id,
            name: kube.name,
            provider: kube.provider,
            region: kube.region,
            version: kube.version,
            state: kube.state,
            masters: kube.masters.len(),
            workers: kube.workers.len(),
        }
    }
}

/// A registered pipeline and its ordered steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub name: String,
    pub steps: Vec<String>,
}
