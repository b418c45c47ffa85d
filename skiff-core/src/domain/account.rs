//! Cloud account domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::provider::ProviderKind;

/// Credentials for one IaaS account
///
/// Stored under `accounts/<name>`; the engine only reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudAccount {
    pub name: String,
    pub provider: ProviderKind,
    /// Provider specific credentials (e.g. `accessToken` for DigitalOcean)
    pub credentials: BTreeMap<String, String>,
}

impl CloudAccount {
    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials.get(key).map(String::as_str)
    }

    /// Copy of the account with every credential value masked
    pub fn redacted(&self) -> Self {
        Self {
            name: self.name.clone(),
            provider: self.provider,
            credentials: self
                .credentials
                .keys()
                .map(|k| (k.clone(), "********".to_string()))
                .collect(),
        }
    }
}
