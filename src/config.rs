use std::time::Duration;

use anyhow::{anyhow, bail};
use serde::Deserialize;

use crate::backoff::Backoff;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub health: HealthConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    /// Health endpoint, e.g. "http://localhost:8000/api/health".
    /// Supports ${ENV_VAR} substitution
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Passive polling interval while connected
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Probe immediately at startup instead of waiting one interval
    #[serde(default = "default_probe_on_start")]
    pub probe_on_start: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StatusConfig {
    #[serde(default)]
    pub format: StatusFormat,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StatusFormat {
    /// Human-readable status lines
    #[default]
    Text,
    /// One JSON object per status update
    Json,
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    3
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_probe_on_start() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl HealthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        // Expand environment variables like ${HEALTH_URL}
        let expanded = shellexpand::env(content)?;
        let config: Config = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the monitor cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = url::Url::parse(&self.health.url)
            .map_err(|e| anyhow!("invalid health url '{}': {e}", self.health.url))?;
        match url.scheme() {
            "http" | "https" => {}
            other => bail!("unsupported health url scheme: {other}"),
        }

        if self.health.timeout_secs == 0 {
            bail!("health.timeout_secs must be greater than 0");
        }
        if self.health.poll_interval_secs == 0 {
            bail!("health.poll_interval_secs must be greater than 0");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be greater than 0");
        }
        if self.retry.base_delay_ms == 0 {
            bail!("retry.base_delay_ms must be greater than 0");
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            bail!(
                "retry.max_delay_ms ({}) is lower than retry.base_delay_ms ({})",
                self.retry.max_delay_ms,
                self.retry.base_delay_ms
            );
        }
        Ok(())
    }
}
