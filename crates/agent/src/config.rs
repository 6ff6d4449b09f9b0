//! Agent configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use usage_engine::SourceConfig;

/// Environment variable naming an optional config file
pub const CONFIG_PATH_ENV: &str = "USAGE_AGENT_CONFIG";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Value of the `service.name` attribute on exported gauges
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Snapshot refresh interval in seconds
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Fall back to host-wide /proc/stat when no cgroup counters are readable
    #[serde(default = "default_proc_stat_fallback")]
    pub proc_stat_fallback: bool,

    #[serde(default = "default_cgroup_root")]
    pub cgroup_root: PathBuf,

    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,

    /// Process to report on; defaults to the agent itself
    #[serde(default)]
    pub pid: Option<u32>,
}

fn default_service_name() -> String {
    "usage-agent".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_refresh_interval() -> u64 {
    5
}

fn default_proc_stat_fallback() -> bool {
    true
}

fn default_cgroup_root() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup")
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            api_port: default_api_port(),
            refresh_interval_secs: default_refresh_interval(),
            proc_stat_fallback: default_proc_stat_fallback(),
            cgroup_root: default_cgroup_root(),
            proc_root: default_proc_root(),
            pid: None,
        }
    }
}

impl AgentConfig {
    /// Load configuration from the optional config file and `USAGE_*` environment variables
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        Self::load_from(path.as_deref(), config::Environment::with_prefix("USAGE"))
    }

    /// Load from an explicit file and environment source; environment wins
    pub fn load_from(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: Self = builder
            .add_source(env.try_parsing(true))
            .build()
            .context("Failed to read agent configuration")?
            .try_deserialize()
            .context("Invalid agent configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval_secs < 1 {
            anyhow::bail!(
                "refresh_interval_secs must be at least 1, got {}",
                self.refresh_interval_secs
            );
        }
        if self.service_name.trim().is_empty() {
            anyhow::bail!("service_name must not be empty");
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            cgroup_root: self.cgroup_root.clone(),
            proc_root: self.proc_root.clone(),
            enable_proc_stat_fallback: self.proc_stat_fallback,
            host_cpus: None,
        }
    }

    pub fn target_pid(&self) -> u32 {
        self.pid.unwrap_or_else(std::process::id)
    }
}
