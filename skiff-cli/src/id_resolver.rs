//! ID resolver module
//!
//! Lets users name a cluster by its name or a short id prefix instead of
//! the full UUID.

use anyhow::{Context, Result, anyhow};
use skiff_client::SkiffClient;
use skiff_core::dto::kube::KubeSummary;
use uuid::Uuid;

use crate::types::KubeRef;

/// Resolve a cluster reference to its UUID
///
/// A full UUID is returned as is; anything else is looked up in the cluster
/// list.
pub async fn resolve_kube_id(client: &SkiffClient, input: &str) -> Result<Uuid> {
    let reference = KubeRef::parse(input);
    if let KubeRef::Id(id) = reference {
        return Ok(id);
    }

    let kubes = client
        .list_kubes()
        .await
        .context("Failed to fetch clusters for ID resolution")?;

    match_kube(&kubes, &reference)
}

/// Picks the cluster whose name equals, or whose id starts with, the
/// reference. An exact name wins over id prefixes.
pub fn match_kube(kubes: &[KubeSummary], reference: &KubeRef) -> Result<Uuid> {
    let partial = match reference {
        KubeRef::Id(id) => return Ok(*id),
        KubeRef::Partial(partial) => partial,
    };

    let by_name: Vec<_> = kubes.iter().filter(|k| k.name == *partial).collect();
    if let [kube] = by_name.as_slice() {
        return Ok(kube.id);
    }

    let prefix = partial.to_lowercase();
    let matches: Vec<_> = if by_name.is_empty() {
        kubes
            .iter()
            .filter(|k| k.id.to_string().starts_with(&prefix))
            .collect()
    } else {
        by_name
    };

    match matches.as_slice() {
        [] => Err(anyhow!("No cluster named or with ID starting with '{}'", partial)),
        [kube] => Ok(kube.id),
        _ => {
            let ids: Vec<String> = matches
                .iter()
                .map(|k| format!("{} ({})", k.id, k.name))
                .collect();
            Err(anyhow!(
                "Ambiguous reference '{}' matches multiple clusters: {}",
                partial,
                ids.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_core::domain::kube::KubeState;
    use skiff_core::domain::provider::ProviderKind;

    fn summary(id: &str, name: &str) -> KubeSummary {
        KubeSummary {
            id: Uuid::parse_str(id).unwrap(),
            name: name.to_string(),
            provider: ProviderKind::Fake,
            region: "fake-1".to_string(),
            version: "1.18.0".to_string(),
            state: KubeState::Operational,
            masters: 1,
            workers: 0,
        }
    }

    fn kubes() -> Vec<KubeSummary> {
        vec![
            summary("1a2b3c4d-0000-4000-8000-000000000001", "demo"),
            summary("1a2b9999-0000-4000-8000-000000000002", "prod"),
            summary("77777777-0000-4000-8000-000000000003", "staging"),
        ]
    }

    #[test]
    fn test_match_by_name_and_prefix() {
        let kubes = kubes();
        assert_eq!(match_kube(&kubes, &KubeRef::parse("prod")).unwrap(), kubes[1].id);
        assert_eq!(match_kube(&kubes, &KubeRef::parse("7777")).unwrap(), kubes[2].id);
        assert_eq!(match_kube(&kubes, &KubeRef::parse("1A2B3C")).unwrap(), kubes[0].id);
    }

    #[test]
    fn test_ambiguous_and_missing() {
        let kubes = kubes();
        let err = match_kube(&kubes, &KubeRef::parse("1a2b")).unwrap_err();
        assert!(err.to_string().contains("Ambiguous"));
        assert!(match_kube(&kubes, &KubeRef::parse("nothing")).is_err());
    }

    #[test]
    fn test_full_id_is_not_looked_up() {
        let id = Uuid::new_v4();
        assert_eq!(match_kube(&[], &KubeRef::Id(id)).unwrap(), id);
    }
}
