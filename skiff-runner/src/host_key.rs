//! Host key verification policy

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// How the SSH runner treats the server's host key
#[derive(Clone)]
pub enum HostKeyPolicy {
    /// Accept any key, logging its fingerprint
    AcceptAny,
    /// Remember the first fingerprint seen per host and reject changes
    TrustOnFirstUse(KnownHosts),
    /// Accept only the listed SHA-256 fingerprints
    Pinned(Vec<String>),
}

/// Process-wide host → fingerprint memory for [`HostKeyPolicy::TrustOnFirstUse`]
#[derive(Clone, Default)]
pub struct KnownHosts {
    hosts: Arc<Mutex<HashMap<String, String>>>,
}

impl KnownHosts {
    pub fn fingerprint(&self, host: &str) -> Option<String> {
        self.hosts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(host)
            .cloned()
    }

    /// Records `fingerprint` for `host` if unknown; returns whether it matches
    fn check_or_insert(&self, host: &str, fingerprint: &str) -> bool {
        let mut hosts = self.hosts.lock().unwrap_or_else(|e| e.into_inner());
        match hosts.get(host) {
            Some(known) => known == fingerprint,
            None => {
                hosts.insert(host.to_string(), fingerprint.to_string());
                true
            }
        }
    }
}

impl HostKeyPolicy {
    pub fn verify(&self, host: &str, fingerprint: &str) -> bool {
        match self {
            HostKeyPolicy::AcceptAny => {
                info!("Accepting host key of {} (SHA256:{})", host, fingerprint);
                true
            }
            HostKeyPolicy::TrustOnFirstUse(known) => {
                let ok = known.check_or_insert(host, fingerprint);
                if !ok {
                    warn!("Host key of {} changed (SHA256:{}), rejecting", host, fingerprint);
                }
                ok
            }
            HostKeyPolicy::Pinned(fingerprints) => {
                let ok = fingerprints
                    .iter()
                    .any(|f| f.trim_start_matches("SHA256:") == fingerprint);
                if !ok {
                    warn!("Host key of {} (SHA256:{}) is not pinned, rejecting", host, fingerprint);
                }
                ok
            }
        }
    }
}

impl Default for HostKeyPolicy {
    fn default() -> Self {
        HostKeyPolicy::TrustOnFirstUse(KnownHosts::default())
    }
}

impl fmt::Debug for HostKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostKeyPolicy::AcceptAny => f.write_str("AcceptAny"),
            HostKeyPolicy::TrustOnFirstUse(_) => f.write_str("TrustOnFirstUse"),
            HostKeyPolicy::Pinned(fps) => f.debug_tuple("Pinned").field(fps).finish(),
        }
    }
}

impl FromStr for HostKeyPolicy {
    type Err = String;

    /// Parses `tofu`, `accept-any` or `pinned:<fp>,<fp>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tofu" => Ok(HostKeyPolicy::default()),
            "accept-any" => Ok(HostKeyPolicy::AcceptAny),
            _ => {
                let list = s
                    .strip_prefix("pinned:")
                    .ok_or_else(|| format!("unknown host key policy '{}'", s))?;
                let fingerprints: Vec<String> = list
                    .split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(String::from)
                    .collect();
                if fingerprints.is_empty() {
                    return Err("pinned host key policy needs at least one fingerprint".to_string());
                }
                Ok(HostKeyPolicy::Pinned(fingerprints))
            }
        }
    }
}
