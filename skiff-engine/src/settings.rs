//! Engine settings
//!
//! Process-wide knobs filled from the orchestrator configuration. Step
//! budgets can be overridden per profile; the result is copied into each
//! task's config as [`Timeouts`] so a restarted task keeps its budgets.

use serde::{Deserialize, Serialize};
use skiff_core::domain::profile::Profile;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub timeouts: Timeouts,
    /// Interval between provider polls while waiting on a machine
    pub poll_interval: Duration,
    /// Interval between SSH port probes
    pub port_wait_interval: Duration,
    /// Interval of the task output flusher
    pub log_flush_interval: Duration,
    /// Lines of output retained per task
    pub output_capacity: usize,
    /// Suffix of generated cluster DNS names
    pub dns_domain: String,
    /// etcd discovery endpoint queried once per cluster
    pub discovery_url: Option<String>,
    /// Time a cancelled step gets to wind down before it is dropped
    pub cancel_grace: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            poll_interval: Duration::from_secs(5),
            port_wait_interval: Duration::from_secs(5),
            log_flush_interval: Duration::from_secs(5),
            output_capacity: skiff_runner::output::DEFAULT_CAPACITY,
            dns_domain: "skiff.local".to_string(),
            discovery_url: None,
            cancel_grace: Duration::from_secs(5),
        }
    }
}

/// Step budgets of one task, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeouts {
    pub ssh_wait_secs: u64,
    pub provision_secs: u64,
    pub post_provision_secs: u64,
    pub step_secs: u64,
    pub barrier_secs: u64,
    pub max_task_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            ssh_wait_secs: 600,
            provision_secs: 1200,
            post_provision_secs: 1800,
            step_secs: 600,
            barrier_secs: 1800,
            max_task_secs: 7200,
        }
    }
}

impl Timeouts {
    /// Applies the profile's overrides on top of `self`
    pub fn for_profile(&self, profile: &Profile) -> Self {
        let overrides = &profile.timeouts;
        Self {
            ssh_wait_secs: overrides.ssh_wait_secs.unwrap_or(self.ssh_wait_secs),
            provision_secs: overrides.provision_secs.unwrap_or(self.provision_secs),
            post_provision_secs: overrides
                .post_provision_secs
                .unwrap_or(self.post_provision_secs),
            step_secs: overrides.step_secs.unwrap_or(self.step_secs),
            barrier_secs: profile.barrier_timeout_secs.unwrap_or(self.barrier_secs),
            max_task_secs: self.max_task_secs,
        }
    }

    pub fn ssh_wait(&self) -> Duration {
        Duration::from_secs(self.ssh_wait_secs)
    }

    pub fn provision(&self) -> Duration {
        Duration::from_secs(self.provision_secs)
    }

    pub fn post_provision(&self) -> Duration {
        Duration::from_secs(self.post_provision_secs)
    }

    pub fn step(&self) -> Duration {
        Duration::from_secs(self.step_secs)
    }

    pub fn barrier(&self) -> Duration {
        Duration::from_secs(self.barrier_secs)
    }

    pub fn max_task(&self) -> Duration {
        Duration::from_secs(self.max_task_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_profile;

    #[test]
    fn test_profile_overrides() {
        let mut profile = sample_profile(1, 0);
        profile.barrier_timeout_secs = Some(1);
        profile.timeouts.step_secs = Some(30);

        let timeouts = Timeouts::default().for_profile(&profile);
        assert_eq!(timeouts.barrier(), Duration::from_secs(1));
        assert_eq!(timeouts.step(), Duration::from_secs(30));
        assert_eq!(timeouts.ssh_wait(), Duration::from_secs(600));
        assert_eq!(timeouts.max_task(), Duration::from_secs(7200));
    }
}
