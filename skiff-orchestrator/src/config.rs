//! Orchestrator configuration
//!
//! Everything is read from `SKIFF_*` environment variables. Step budgets set
//! here are process-wide defaults; a profile may override them per cluster.

use anyhow::Context;
use skiff_engine::{EngineSettings, Timeouts};
use skiff_runner::HostKeyPolicy;
use std::path::PathBuf;
use std::time::Duration;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address (e.g., "0.0.0.0:8080")
    pub bind_addr: String,

    /// Postgres URL; state is kept in memory when unset
    pub database_url: Option<String>,

    /// Directory of `*.sh` templates overriding the built-in ones
    pub templates_dir: Option<PathBuf>,

    /// Render scripts without running them and skip port waits
    pub dry_run: bool,

    /// `tofu`, `accept-any` or `pinned:<fp>,<fp>`
    pub host_key_policy: String,

    /// SSH connect, handshake and close timeout
    pub ssh_io_timeout: Duration,

    pub timeouts: Timeouts,

    /// How often task output is flushed to the store
    pub log_flush_interval: Duration,

    /// etcd discovery endpoint
    pub discovery_url: Option<String>,

    /// Suffix of generated cluster DNS names
    pub dns_domain: String,

    /// DigitalOcean API base URL
    pub digitalocean_api: String,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(bind_addr: String) -> Self {
        Self {
            bind_addr,
            database_url: None,
            templates_dir: None,
            dry_run: false,
            host_key_policy: "tofu".to_string(),
            ssh_io_timeout: Duration::from_secs(30),
            timeouts: Timeouts::default(),
            log_flush_interval: Duration::from_secs(5),
            discovery_url: None,
            dns_domain: "skiff.local".to_string(),
            digitalocean_api: "https://api.digitalocean.com".to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Every variable is optional:
    /// - SKIFF_BIND_ADDR (default: 0.0.0.0:8080)
    /// - DATABASE_URL
    /// - SKIFF_TEMPLATES_DIR
    /// - SKIFF_DRY_RUN (default: false)
    /// - SKIFF_HOST_KEY_POLICY (default: tofu)
    /// - SKIFF_SSH_IO_TIMEOUT, SKIFF_SSH_WAIT_TIMEOUT, SKIFF_PROVISION_TIMEOUT,
    ///   SKIFF_POST_PROVISION_TIMEOUT, SKIFF_STEP_TIMEOUT, SKIFF_BARRIER_TIMEOUT,
    ///   SKIFF_MAX_TASK_DURATION, SKIFF_LOG_FLUSH_INTERVAL (seconds)
    /// - SKIFF_DISCOVERY_URL
    /// - SKIFF_DNS_DOMAIN (default: skiff.local)
    /// - SKIFF_DIGITALOCEAN_API (default: https://api.digitalocean.com)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        let secs = |key: &str, default: u64| -> anyhow::Result<u64> {
            match lookup(key) {
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("{} must be a number of seconds, got '{}'", key, value)),
                None => Ok(default),
            }
        };

        if let Some(addr) = lookup("SKIFF_BIND_ADDR") {
            config.bind_addr = addr;
        }
        config.database_url = lookup("DATABASE_URL").filter(|url| !url.is_empty());
        config.templates_dir = lookup("SKIFF_TEMPLATES_DIR").map(PathBuf::from);
        if let Some(value) = lookup("SKIFF_DRY_RUN") {
            config.dry_run = parse_bool(&value)
                .with_context(|| format!("SKIFF_DRY_RUN must be true or false, got '{}'", value))?;
        }
        if let Some(policy) = lookup("SKIFF_HOST_KEY_POLICY") {
            config.host_key_policy = policy;
        }

        config.ssh_io_timeout = Duration::from_secs(secs("SKIFF_SSH_IO_TIMEOUT", 30)?);
        let defaults = Timeouts::default();
        config.timeouts = Timeouts {
            ssh_wait_secs: secs("SKIFF_SSH_WAIT_TIMEOUT", defaults.ssh_wait_secs)?,
            provision_secs: secs("SKIFF_PROVISION_TIMEOUT", defaults.provision_secs)?,
            post_provision_secs: secs("SKIFF_POST_PROVISION_TIMEOUT", defaults.post_provision_secs)?,
            step_secs: secs("SKIFF_STEP_TIMEOUT", defaults.step_secs)?,
            barrier_secs: secs("SKIFF_BARRIER_TIMEOUT", defaults.barrier_secs)?,
            max_task_secs: secs("SKIFF_MAX_TASK_DURATION", defaults.max_task_secs)?,
        };
        config.log_flush_interval = Duration::from_secs(secs("SKIFF_LOG_FLUSH_INTERVAL", 5)?);

        config.discovery_url = lookup("SKIFF_DISCOVERY_URL").filter(|url| !url.is_empty());
        if let Some(domain) = lookup("SKIFF_DNS_DOMAIN") {
            config.dns_domain = domain;
        }
        if let Some(api) = lookup("SKIFF_DIGITALOCEAN_API") {
            config.digitalocean_api = api;
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        self.host_key_policy()?;

        for (name, url) in [
            ("discovery_url", self.discovery_url.as_deref()),
            ("digitalocean_api", Some(self.digitalocean_api.as_str())),
        ] {
            if let Some(url) = url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    anyhow::bail!("{} must start with http:// or https://", name);
                }
            }
        }

        if self.dns_domain.is_empty() || self.dns_domain.starts_with('.') {
            anyhow::bail!("dns_domain must be a domain name");
        }

        if self.ssh_io_timeout.is_zero() || self.log_flush_interval.is_zero() {
            anyhow::bail!("ssh_io_timeout and log_flush_interval must be greater than 0");
        }

        let t = &self.timeouts;
        if [t.ssh_wait_secs, t.provision_secs, t.post_provision_secs, t.step_secs, t.barrier_secs]
            .contains(&0)
        {
            anyhow::bail!("step timeouts must be greater than 0");
        }
        if t.max_task_secs < t.step_secs {
            anyhow::bail!("max task duration must not be shorter than the step timeout");
        }

        Ok(())
    }

    pub fn host_key_policy(&self) -> anyhow::Result<HostKeyPolicy> {
        self.host_key_policy
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("invalid SKIFF_HOST_KEY_POLICY")
    }

    /// Engine knobs derived from this configuration
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            timeouts: self.timeouts.clone(),
            log_flush_interval: self.log_flush_interval,
            dns_domain: self.dns_domain.clone(),
            discovery_url: self.discovery_url.clone(),
            ..EngineSettings::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("0.0.0.0:8080".to_string())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" | "" => Some(false),
        _ => None,
    }
}
