use thiserror::Error;

/// Bytes of the script kept on an error for diagnostics
pub const SCRIPT_EXCERPT_LEN: usize = 2048;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to connect to {host}: {message}")]
    Connect {
        host: String,
        message: String,
        script: String,
    },

    #[error("authentication as {user}@{host} failed: {message}")]
    Auth {
        user: String,
        host: String,
        message: String,
        script: String,
    },

    #[error("ssh transport error on {host}: {message}")]
    Transport {
        host: String,
        message: String,
        script: String,
    },

    #[error("script exited with status {code} on {host}: {stderr}")]
    RemoteExit {
        host: String,
        code: u32,
        stderr: String,
        script: String,
    },

    #[error("timed out waiting for {address} after {waited_secs}s")]
    Timeout { address: String, waited_secs: u64 },

    #[error("cancelled")]
    Cancelled,
}

impl RunnerError {
    /// Leading part of the script that was running, if any
    pub fn script(&self) -> Option<&str> {
        match self {
            RunnerError::Connect { script, .. }
            | RunnerError::Auth { script, .. }
            | RunnerError::Transport { script, .. }
            | RunnerError::RemoteExit { script, .. } => Some(script),
            RunnerError::Timeout { .. } | RunnerError::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunnerError::Cancelled)
    }
}

/// First [`SCRIPT_EXCERPT_LEN`] bytes of `script`, cut on a char boundary
pub fn excerpt(script: &str) -> String {
    if script.len() <= SCRIPT_EXCERPT_LEN {
        return script.to_string();
    }

    let mut end = SCRIPT_EXCERPT_LEN;
    while !script.is_char_boundary(end) {
        end -= 1;
    }
    script[..end].to_string()
}
