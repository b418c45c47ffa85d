//! In-memory IaaS
//!
//! Backs the `fake` provider used by dry runs and tests. Machines start in
//! `creating` and turn `active` on their first poll.

use chrono::Utc;
use skiff_core::domain::machine::{Machine, MachineState};
use skiff_core::domain::provider::ProviderKind;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::{BOOTSTRAP_TAG, ClusterSpec, MachineRequest, ProviderError, SSH_KEY_ID};

#[derive(Debug, Default)]
struct FakeState {
    machines: BTreeMap<String, (Machine, Vec<String>)>,
    next_id: u32,
    creates: usize,
    transient_failures: usize,
    clusters: BTreeSet<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeCloud {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCloud {
    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(super) fn create_machine(&self, req: &MachineRequest) -> Result<Machine, ProviderError> {
        let mut state = self.lock();

        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(ProviderError::Transient("fake rate limit".to_string()));
        }

        state.next_id += 1;
        state.creates += 1;
        let n = state.next_id;

        let machine = Machine {
            id: format!("fake-{}", n),
            name: req.name.clone(),
            role: req.role,
            is_bootstrap: req.is_bootstrap || req.tags.iter().any(|t| t == BOOTSTRAP_TAG),
            provider: ProviderKind::Fake,
            region: req.region.clone(),
            size: req.size.clone(),
            private_ip: Some(format!("10.0.{}.{}", n / 250, n % 250 + 2)),
            public_ip: Some(format!("203.0.{}.{}", n / 250 + 113, n % 250 + 2)),
            state: MachineState::Creating,
            created_at: Utc::now(),
        };

        state
            .machines
            .insert(machine.id.clone(), (machine.clone(), req.tags.clone()));
        Ok(machine)
    }

    pub(super) fn get_machine(&self, id: &str) -> Result<Machine, ProviderError> {
        let mut state = self.lock();
        let (machine, _) = state
            .machines
            .get_mut(id)
            .ok_or_else(|| ProviderError::NotFound(format!("machine {}", id)))?;

        if machine.state == MachineState::Creating {
            machine.state = MachineState::Active;
        }
        Ok(machine.clone())
    }

    pub(super) fn find_machine(&self, tag: &str) -> Option<Machine> {
        self.lock()
            .machines
            .values()
            .find(|(_, tags)| tags.iter().any(|t| t == tag))
            .map(|(machine, _)| machine.clone())
    }

    pub(super) fn delete_machine(&self, id: &str) {
        self.lock().machines.remove(id);
    }

    pub(super) fn create_cluster(&self, spec: &ClusterSpec) -> BTreeMap<String, String> {
        self.lock().clusters.insert(spec.cluster_id);
        BTreeMap::from([(SSH_KEY_ID.to_string(), format!("fake-key-{}", spec.cluster_id))])
    }

    pub(super) fn delete_cluster(&self, cluster_id: Uuid) {
        self.lock().clusters.remove(&cluster_id);
    }

    /// Number of successful machine creations so far
    pub fn creates(&self) -> usize {
        self.lock().creates
    }

    /// Makes the next `n` machine creations fail with a transient error
    pub fn inject_transient_failures(&self, n: usize) {
        self.lock().transient_failures = n;
    }

    pub fn machines(&self) -> Vec<Machine> {
        self.lock().machines.values().map(|(m, _)| m.clone()).collect()
    }

    pub fn has_cluster(&self, cluster_id: Uuid) -> bool {
        self.lock().clusters.contains(&cluster_id)
    }
}
