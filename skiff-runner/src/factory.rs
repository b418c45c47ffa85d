use skiff_core::domain::profile::SshConfig;
use std::sync::Arc;
use std::time::Duration;

use crate::{DryRunner, HostKeyPolicy, Runner, RunnerError, SshRunner};

/// Source of runners for provisioning steps
///
/// Target addresses differ between steps (own node vs bootstrap master), so
/// a fresh runner is built for each step invocation and never cached.
pub trait RunnerSource: Send + Sync {
    /// Runner targeting `host` with the cluster's SSH settings
    fn runner(&self, host: &str, ssh: &SshConfig) -> Result<Arc<dyn Runner>, RunnerError>;

    /// Whether produced runners skip execution entirely
    fn is_dry_run(&self) -> bool;
}

/// Builds SSH runners, or dry runners when dry-run mode is on
#[derive(Debug, Clone)]
pub struct RunnerFactory {
    dry_run: bool,
    policy: HostKeyPolicy,
    io_timeout: Duration,
}

impl RunnerFactory {
    pub fn new(dry_run: bool, policy: HostKeyPolicy, io_timeout: Duration) -> Self {
        Self {
            dry_run,
            policy,
            io_timeout,
        }
    }

    pub fn dry_run() -> Self {
        Self::new(true, HostKeyPolicy::AcceptAny, Duration::from_secs(1))
    }
}

impl RunnerSource for RunnerFactory {
    fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn runner(&self, host: &str, ssh: &SshConfig) -> Result<Arc<dyn Runner>, RunnerError> {
        if self.dry_run {
            return Ok(Arc::new(DryRunner::new(host)));
        }

        let io_timeout = self.io_timeout.max(Duration::from_secs(ssh.timeout_secs));
        let runner = SshRunner::new(
            host,
            ssh.port,
            ssh.user.clone(),
            &ssh.bootstrap_private_key,
            self.policy.clone(),
            io_timeout,
        )?;
        Ok(Arc::new(runner))
    }
}
