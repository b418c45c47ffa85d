use async_trait::async_trait;
use skiff_core::domain::log::LogLevel;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Command, Runner, RunnerError};

/// Runner that records scripts instead of executing them
#[derive(Debug, Clone)]
pub struct DryRunner {
    host: String,
}

impl DryRunner {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

#[async_trait]
impl Runner for DryRunner {
    async fn run(&self, cancel: &CancellationToken, cmd: Command) -> Result<(), RunnerError> {
        if cancel.is_cancelled() {
            return Err(RunnerError::Cancelled);
        }

        debug!("Dry run of {} on {} ({} bytes)", cmd.name, self.host, cmd.script.len());
        cmd.out.write(LogLevel::Debug, cmd.script.as_bytes());
        cmd.out.flush();
        Ok(())
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}
