//! SSH runner
//!
//! Opens one session per command, authenticates with the cluster's bootstrap
//! key and pipes the script into `bash -s`. The session is closed on every
//! exit path, including cancellation.

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};
use skiff_core::domain::log::LogLevel;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::excerpt;
use crate::{Command, HostKeyPolicy, Runner, RunnerError};

/// Bytes of stderr kept for a [`RunnerError::RemoteExit`]
const STDERR_TAIL_LEN: usize = 1024;

struct ClientHandler {
    host: String,
    policy: HostKeyPolicy,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(self.policy.verify(&self.host, &server_public_key.fingerprint()))
    }
}

pub struct SshRunner {
    host: String,
    port: u16,
    user: String,
    key: Arc<KeyPair>,
    policy: HostKeyPolicy,
    io_timeout: Duration,
}

impl SshRunner {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        private_key: &str,
        policy: HostKeyPolicy,
        io_timeout: Duration,
    ) -> Result<Self, RunnerError> {
        let host = host.into();
        let user = user.into();
        let key = russh_keys::decode_secret_key(private_key, None).map_err(|e| RunnerError::Auth {
            user: user.clone(),
            host: host.clone(),
            message: format!("invalid private key: {}", e),
            script: String::new(),
        })?;

        Ok(Self {
            host,
            port,
            user,
            key: Arc::new(key),
            policy,
            io_timeout,
        })
    }

    async fn connect(&self, script: &str) -> Result<Handle<ClientHandler>, RunnerError> {
        let config = Arc::new(client::Config::default());
        let handler = ClientHandler {
            host: self.host.clone(),
            policy: self.policy.clone(),
        };

        let connect_err = |message: String| RunnerError::Connect {
            host: self.host.clone(),
            message,
            script: excerpt(script),
        };

        debug!("Connecting to {}@{}:{}", self.user, self.host, self.port);
        let mut session = timeout(
            self.io_timeout,
            client::connect(config, (self.host.as_str(), self.port), handler),
        )
        .await
        .map_err(|_| connect_err(format!("handshake timed out after {:?}", self.io_timeout)))?
        .map_err(|e| connect_err(e.to_string()))?;

        let authenticated = timeout(
            self.io_timeout,
            session.authenticate_publickey(self.user.clone(), self.key.clone()),
        )
        .await
        .map_err(|_| connect_err(format!("authentication timed out after {:?}", self.io_timeout)))?
        .map_err(|e| connect_err(e.to_string()))?;

        if !authenticated {
            return Err(RunnerError::Auth {
                user: self.user.clone(),
                host: self.host.clone(),
                message: "public key rejected".to_string(),
                script: excerpt(script),
            });
        }

        Ok(session)
    }

    async fn close(&self, session: &Handle<ClientHandler>) {
        let closing = session.disconnect(Disconnect::ByApplication, "", "en");
        match timeout(self.io_timeout, closing).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Error closing session to {}: {}", self.host, e),
            Err(_) => warn!("Timed out closing session to {}", self.host),
        }
    }

    async fn execute(
        &self,
        session: &Handle<ClientHandler>,
        cancel: &CancellationToken,
        cmd: &Command,
    ) -> Result<(), RunnerError> {
        let transport_err = |e: russh::Error| RunnerError::Transport {
            host: self.host.clone(),
            message: e.to_string(),
            script: excerpt(&cmd.script),
        };

        let mut channel = session.channel_open_session().await.map_err(transport_err)?;
        channel.exec(true, "bash -s").await.map_err(transport_err)?;
        channel.data(cmd.script.as_bytes()).await.map_err(transport_err)?;
        channel.eof().await.map_err(transport_err)?;

        let mut exit_status = None;
        let mut stderr = String::new();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => None,
                msg = channel.wait() => Some(msg),
            };

            let Some(msg) = next else {
                info!("Cancelling {} on {}", cmd.name, self.host);
                let _ = channel.close().await;
                return Err(RunnerError::Cancelled);
            };

            match msg {
                Some(ChannelMsg::Data { ref data }) => cmd.out.write(LogLevel::Info, data),
                Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                    cmd.out.write(LogLevel::Error, data);
                    stderr.push_str(&String::from_utf8_lossy(data));
                    if stderr.len() > STDERR_TAIL_LEN * 2 {
                        stderr = tail(&stderr, STDERR_TAIL_LEN).to_string();
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status: code }) => exit_status = Some(code),
                Some(_) => {}
                None => break,
            }
        }
        cmd.out.flush();

        match exit_status {
            Some(0) => Ok(()),
            Some(code) => Err(RunnerError::RemoteExit {
                host: self.host.clone(),
                code,
                stderr: tail(&stderr, STDERR_TAIL_LEN).trim().to_string(),
                script: excerpt(&cmd.script),
            }),
            None => Err(RunnerError::Transport {
                host: self.host.clone(),
                message: "channel closed without exit status".to_string(),
                script: excerpt(&cmd.script),
            }),
        }
    }
}

#[async_trait]
impl Runner for SshRunner {
    async fn run(&self, cancel: &CancellationToken, cmd: Command) -> Result<(), RunnerError> {
        if cancel.is_cancelled() {
            return Err(RunnerError::Cancelled);
        }

        let session = tokio::select! {
            _ = cancel.cancelled() => return Err(RunnerError::Cancelled),
            session = self.connect(&cmd.script) => session?,
        };

        info!("Running {} on {}", cmd.name, self.host);
        let result = self.execute(&session, cancel, &cmd).await;
        self.close(&session).await;
        result
    }

    fn host(&self) -> &str {
        &self.host
    }
}

/// Last `len` bytes of `s`, cut on a char boundary
fn tail(s: &str, len: usize) -> &str {
    if s.len() <= len {
        return s;
    }
    let mut start = s.len() - len;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
