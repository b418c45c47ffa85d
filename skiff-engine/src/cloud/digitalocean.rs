//! DigitalOcean adapter over the public REST API

use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use skiff_core::domain::machine::{Machine, MachineState, Role};
use skiff_core::domain::provider::ProviderKind;
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

use super::{BOOTSTRAP_TAG, ClusterSpec, MachineRequest, ProviderError, SSH_KEY_ID, cluster_tag, role_tag};

const SSH_KEY_CREATED: &str = "sshKeyCreated";

pub struct DigitalOcean {
    http: Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct Droplet {
    id: u64,
    name: String,
    status: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    networks: Networks,
    region: Region,
    size_slug: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Networks {
    #[serde(default)]
    v4: Vec<NetworkV4>,
}

#[derive(Debug, Deserialize)]
struct NetworkV4 {
    ip_address: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct Region {
    slug: String,
}

#[derive(Debug, Deserialize)]
struct DropletBody {
    droplet: Droplet,
}

#[derive(Debug, Deserialize)]
struct DropletsBody {
    droplets: Vec<Droplet>,
}

#[derive(Debug, Serialize)]
struct CreateDroplet<'a> {
    name: &'a str,
    region: &'a str,
    size: &'a str,
    image: &'a str,
    ssh_keys: &'a [String],
    tags: &'a [String],
    private_networking: bool,
}

#[derive(Debug, Deserialize)]
struct SshKey {
    id: u64,
    fingerprint: String,
    public_key: String,
}

#[derive(Debug, Deserialize)]
struct SshKeyBody {
    ssh_key: SshKey,
}

#[derive(Debug, Deserialize)]
struct SshKeysBody {
    ssh_keys: Vec<SshKey>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl Droplet {
    fn into_machine(self) -> Machine {
        let address = |kind: &str| {
            self.networks
                .v4
                .iter()
                .find(|n| n.kind == kind)
                .map(|n| n.ip_address.clone())
        };
        let private_ip = address("private");
        let public_ip = address("public");

        let state = match self.status.as_str() {
            "new" => MachineState::Creating,
            "active" => MachineState::Active,
            "archive" => MachineState::Deleted,
            _ => MachineState::Error,
        };
        let role = if self.tags.contains(&role_tag(Role::Master)) {
            Role::Master
        } else {
            Role::Worker
        };

        Machine {
            id: self.id.to_string(),
            name: self.name,
            role,
            is_bootstrap: self.tags.iter().any(|t| t == BOOTSTRAP_TAG),
            provider: ProviderKind::DigitalOcean,
            region: self.region.slug,
            size: self.size_slug,
            private_ip,
            public_ip,
            state,
            created_at: self.created_at,
        }
    }
}

impl DigitalOcean {
    pub fn new(http: Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2/{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<Response, ProviderError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ProviderError::Transient(format!("{}: {}", what, e))
                } else {
                    ProviderError::Permanent(format!("{}: {}", what, e))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or(body);

        Err(match status {
            StatusCode::NOT_FOUND => ProviderError::NotFound(what.to_string()),
            StatusCode::TOO_MANY_REQUESTS => ProviderError::Transient(format!("{}: rate limited", what)),
            s if s.is_server_error() => ProviderError::Transient(format!("{}: {} {}", what, s, message)),
            s => ProviderError::Permanent(format!("{}: {} {}", what, s, message)),
        })
    }

    async fn json<T: for<'de> Deserialize<'de>>(response: Response, what: &str) -> Result<T, ProviderError> {
        response
            .json()
            .await
            .map_err(|e| ProviderError::Permanent(format!("{}: invalid response: {}", what, e)))
    }

    pub(super) async fn create_machine(&self, req: &MachineRequest) -> Result<Machine, ProviderError> {
        let body = CreateDroplet {
            name: &req.name,
            region: &req.region,
            size: &req.size,
            image: &req.image,
            ssh_keys: &req.ssh_key_ids,
            tags: &req.tags,
            private_networking: true,
        };

        let what = format!("create droplet {}", req.name);
        let response = self.send(self.http.post(self.url("droplets")).json(&body), &what).await?;
        let created: DropletBody = Self::json(response, &what).await?;

        info!("Created droplet {} ({})", created.droplet.id, req.name);
        Ok(created.droplet.into_machine())
    }

    pub(super) async fn get_machine(&self, _region: &str, id: &str) -> Result<Machine, ProviderError> {
        let what = format!("droplet {}", id);
        let response = self
            .send(self.http.get(self.url(&format!("droplets/{}", id))), &what)
            .await?;
        let body: DropletBody = Self::json(response, &what).await?;
        Ok(body.droplet.into_machine())
    }

    pub(super) async fn find_machine(&self, _region: &str, tag: &str) -> Result<Option<Machine>, ProviderError> {
        let what = format!("droplets tagged {}", tag);
        let response = self
            .send(
                self.http.get(self.url("droplets")).query(&[("tag_name", tag)]),
                &what,
            )
            .await?;
        let body: DropletsBody = Self::json(response, &what).await?;
        Ok(body.droplets.into_iter().next().map(Droplet::into_machine))
    }

    pub(super) async fn delete_machine(&self, _region: &str, id: &str) -> Result<(), ProviderError> {
        let what = format!("droplet {}", id);
        match self
            .send(self.http.delete(self.url(&format!("droplets/{}", id))), &what)
            .await
        {
            Ok(_) => {
                info!("Deleted droplet {}", id);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("Droplet {} already gone", id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Registers the cluster's bootstrap key, reusing an identical key
    /// already on the account
    pub(super) async fn create_cluster(
        &self,
        spec: &ClusterSpec,
    ) -> Result<BTreeMap<String, String>, ProviderError> {
        let what = format!("register ssh key for {}", spec.name);
        let body = serde_json::json!({
            "name": format!("skiff-{}", spec.cluster_id),
            "public_key": spec.ssh_public_key,
        });

        let mut cloud = BTreeMap::new();
        match self
            .send(self.http.post(self.url("account/keys")).json(&body), &what)
            .await
        {
            Ok(response) => {
                let created: SshKeyBody = Self::json(response, &what).await?;
                info!("Registered ssh key {} for cluster {}", created.ssh_key.fingerprint, spec.cluster_id);
                cloud.insert(SSH_KEY_ID.to_string(), created.ssh_key.id.to_string());
                cloud.insert(SSH_KEY_CREATED.to_string(), "true".to_string());
            }
            Err(ProviderError::Permanent(message)) if message.contains("422") => {
                let existing = self.find_key(&spec.ssh_public_key).await?.ok_or_else(|| {
                    ProviderError::Permanent(format!("{}: {}", what, message))
                })?;
                debug!("Reusing ssh key {} for cluster {}", existing.fingerprint, spec.cluster_id);
                cloud.insert(SSH_KEY_ID.to_string(), existing.id.to_string());
            }
            Err(e) => return Err(e),
        }

        Ok(cloud)
    }

    async fn find_key(&self, public_key: &str) -> Result<Option<SshKey>, ProviderError> {
        let what = "list ssh keys";
        let response = self
            .send(
                self.http.get(self.url("account/keys")).query(&[("per_page", "200")]),
                what,
            )
            .await?;
        let body: SshKeysBody = Self::json(response, what).await?;
        Ok(body
            .ssh_keys
            .into_iter()
            .find(|k| k.public_key.trim() == public_key.trim()))
    }

    /// Removes droplets left behind by the cluster and the ssh key it
    /// registered
    pub(super) async fn delete_cluster(
        &self,
        cluster_id: Uuid,
        cloud: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError> {
        let tag = cluster_tag(cluster_id);
        match self
            .send(
                self.http.delete(self.url("droplets")).query(&[("tag_name", tag.as_str())]),
                "delete cluster droplets",
            )
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        if cloud.get(SSH_KEY_CREATED).map(String::as_str) == Some("true") {
            if let Some(key_id) = cloud.get(SSH_KEY_ID) {
                match self
                    .send(
                        self.http.delete(self.url(&format!("account/keys/{}", key_id))),
                        "delete ssh key",
                    )
                    .await
                {
                    Ok(_) => info!("Deleted ssh key {} of cluster {}", key_id, cluster_id),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(())
    }
}
