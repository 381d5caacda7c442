//! Service configuration loaded from `PROVISIONER_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::application::services::orchestrator::OrchestratorSettings;
use crate::domain::validation::{MAX_CPU, MAX_MEMORY_MB, MIN_CPU, MIN_MEMORY_MB, SourceDefaults};
use crate::infra::ssh::SshTimeouts;

pub const ENV_PREFIX: &str = "PROVISIONER_";

/// Each field maps to `PROVISIONER_<FIELD>`.
#[derive(Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Expected value of the `X-API-Key` header on protected routes.
    pub api_key: String,

    /// Jobs are kept in memory when unset.
    #[serde(default)]
    pub valkey_url: Option<String>,

    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    #[serde(default = "default_ssh_connect_timeout_secs")]
    pub ssh_connect_timeout_secs: u64,
    #[serde(default = "default_ssh_command_timeout_secs")]
    pub ssh_command_timeout_secs: u64,
    #[serde(default = "default_ssh_max_retries")]
    pub ssh_max_retries: u32,
    #[serde(default = "default_install_timeout_secs")]
    pub install_timeout_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: u64,

    #[serde(default = "default_max_job_age_hours")]
    pub max_job_age_hours: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    #[serde(default = "default_max_memory_mb")]
    pub default_max_memory_mb: u64,
    #[serde(default = "default_max_cpu")]
    pub default_max_cpu: f64,
}

fn default_listen_addr() -> String {
    "0.0.0.0:5001".to_string()
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_ssh_connect_timeout_secs() -> u64 {
    10
}

fn default_ssh_command_timeout_secs() -> u64 {
    30
}

fn default_ssh_max_retries() -> u32 {
    15
}

fn default_install_timeout_secs() -> u64 {
    900
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_settle_delay_secs() -> u64 {
    5
}

fn default_max_job_age_hours() -> u64 {
    24
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

fn default_max_memory_mb() -> u64 {
    2048
}

fn default_max_cpu() -> f64 {
    2.0
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen_addr", &self.listen_addr)
            .field("api_key", &"<redacted>")
            .field("valkey_url", &self.valkey_url.as_ref().map(|_| "<set>"))
            .field("scripts_dir", &self.scripts_dir)
            .field("ssh_max_retries", &self.ssh_max_retries)
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    /// Load and validate from the process environment.
    pub fn from_env() -> Result<Self> {
        let config: Self = envy::prefixed(ENV_PREFIX).from_env().context(
            "failed to load config from PROVISIONER_* env vars \
             (PROVISIONER_API_KEY is required)",
        )?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate from explicit key/value pairs (names include the prefix).
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::prefixed(ENV_PREFIX)
            .from_iter(vars)
            .context("failed to parse PROVISIONER_* settings")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            bail!("PROVISIONER_API_KEY must not be empty");
        }
        self.socket_addr()?;
        for (name, value) in [
            ("SSH_CONNECT_TIMEOUT_SECS", self.ssh_connect_timeout_secs),
            ("SSH_COMMAND_TIMEOUT_SECS", self.ssh_command_timeout_secs),
            ("INSTALL_TIMEOUT_SECS", self.install_timeout_secs),
            ("FETCH_TIMEOUT_SECS", self.fetch_timeout_secs),
            ("CLEANUP_INTERVAL_SECS", self.cleanup_interval_secs),
            ("MAX_JOB_AGE_HOURS", self.max_job_age_hours),
            ("SSH_MAX_RETRIES", u64::from(self.ssh_max_retries)),
        ] {
            if value == 0 {
                bail!("{ENV_PREFIX}{name} must be greater than zero");
            }
        }
        let memory_ok = i64::try_from(self.default_max_memory_mb)
            .is_ok_and(|mb| (MIN_MEMORY_MB..=MAX_MEMORY_MB).contains(&mb));
        if !memory_ok {
            bail!(
                "{ENV_PREFIX}DEFAULT_MAX_MEMORY_MB must be between {MIN_MEMORY_MB} and {MAX_MEMORY_MB}"
            );
        }
        if !(MIN_CPU..=MAX_CPU).contains(&self.default_max_cpu) {
            bail!("{ENV_PREFIX}DEFAULT_MAX_CPU must be between {MIN_CPU} and {MAX_CPU}");
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .with_context(|| format!("invalid listen address '{}'", self.listen_addr))
    }

    #[must_use]
    pub fn ssh_timeouts(&self) -> SshTimeouts {
        SshTimeouts {
            connect: Duration::from_secs(self.ssh_connect_timeout_secs),
            command: Duration::from_secs(self.ssh_command_timeout_secs),
            install: Duration::from_secs(self.install_timeout_secs),
        }
    }

    #[must_use]
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            max_ssh_attempts: self.ssh_max_retries,
            ssh_attempt_timeout: Duration::from_secs(self.ssh_connect_timeout_secs),
            settle_delay: Duration::from_secs(self.settle_delay_secs),
        }
    }

    #[must_use]
    pub fn source_defaults(&self) -> SourceDefaults {
        SourceDefaults {
            max_memory_mb: self.default_max_memory_mb,
            max_cpu: self.default_max_cpu,
        }
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    #[must_use]
    pub fn max_job_age(&self) -> Duration {
        Duration::from_secs(self.max_job_age_hours * 3600)
    }

    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}
