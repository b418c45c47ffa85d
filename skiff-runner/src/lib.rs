//! Skiff Runner
//!
//! Executes rendered shell scripts on provisioned machines.
//!
//! Two implementations share the [`Runner`] trait:
//! - [`SshRunner`]: pipes the script into `bash -s` over an SSH session
//! - [`DryRunner`]: copies the script into the task output without running it
//!
//! Output of every command is streamed into a [`TaskOutput`], the bounded
//! line buffer owned by the task that issued it.

pub mod dry_run;
pub mod error;
pub mod factory;
pub mod host_key;
pub mod output;
pub mod port;
pub mod ssh;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use dry_run::DryRunner;
pub use error::RunnerError;
pub use factory::{RunnerFactory, RunnerSource};
pub use host_key::HostKeyPolicy;
pub use output::TaskOutput;
pub use port::wait_for_port;
pub use ssh::SshRunner;

/// A script to execute and the sink receiving its output
#[derive(Debug, Clone)]
pub struct Command {
    /// Short label for logs, usually the step name
    pub name: String,
    pub script: String,
    pub out: TaskOutput,
}

impl Command {
    pub fn new(name: impl Into<String>, script: impl Into<String>, out: TaskOutput) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            out,
        }
    }
}

/// Executes a shell script on a target host
///
/// Output is written to `cmd.out` in order and before `run` returns.
/// Cancelling `cancel` closes the session and makes `run` return
/// [`RunnerError::Cancelled`] promptly.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, cancel: &CancellationToken, cmd: Command) -> Result<(), RunnerError>;

    /// Host this runner targets, for logging
    fn host(&self) -> &str;

    /// Dry runners never touch a host, so callers can skip waits on it
    fn is_dry_run(&self) -> bool {
        false
    }
}
