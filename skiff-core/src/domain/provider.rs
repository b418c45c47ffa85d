//! Cloud provider identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of an IaaS provider
///
/// The set is closed: every pipeline name is derived from it
/// (`<provider>-master`, `<provider>-worker`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    DigitalOcean,
    Aws,
    /// In-memory provider used for dry runs and tests
    Fake,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::DigitalOcean, ProviderKind::Aws, ProviderKind::Fake];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::DigitalOcean => "digitalocean",
            ProviderKind::Aws => "aws",
            ProviderKind::Fake => "fake",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown provider '{}'", s))
    }
}
