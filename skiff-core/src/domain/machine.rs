//! Machine domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::provider::ProviderKind;

/// A provisioned virtual machine
///
/// Created by the `create_machine` step and mutated only by the task that
/// owns it. Once published to a cluster's node map a machine record is never
/// modified in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    /// Provider machine id
    pub id: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub is_bootstrap: bool,
    pub provider: ProviderKind,
    pub region: String,
    pub size: String,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
    pub state: MachineState,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Master,
    Worker,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Worker => "worker",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    Requested,
    Creating,
    Active,
    Deleting,
    Deleted,
    Error,
}

impl Machine {
    /// Address used to reach the machine over SSH
    ///
    /// Falls back to the private address for providers that do not assign
    /// public ones.
    pub fn ssh_address(&self) -> Option<&str> {
        self.public_ip.as_deref().or(self.private_ip.as_deref())
    }

    pub fn is_active(&self) -> bool {
        self.state == MachineState::Active
    }
}
