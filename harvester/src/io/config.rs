//! Harvester configuration stored under `.harvester/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::identity::DEFAULT_IDENTITY_FIELDS;
use crate::io::atomic::write_atomic;

/// Harvester configuration (TOML).
///
/// Edited by humans and read once per cycle. Missing fields fall back to the
/// defaults below, so an empty file is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct HarvesterConfig {
    pub agent: AgentConfig,
    pub retry: RetryConfig,
    pub records: RecordsConfig,
}

/// How to launch the external scraping agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Executable name (looked up on `PATH`) or path.
    pub program: String,
    /// Arguments; `{config}` and `{output}` are substituted per attempt.
    pub args: Vec<String>,
    /// Configuration document handed to the agent, relative to the root.
    pub config_path: PathBuf,
    /// Keep at most this many bytes of agent stdout/stderr per attempt.
    pub output_limit_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "scrape-agent".to_string(),
            args: vec![
                "--config".to_string(),
                "{config}".to_string(),
                "--output".to_string(),
                "{output}".to_string(),
            ],
            config_path: PathBuf::from("config/agent.json"),
            output_limit_bytes: 100_000,
        }
    }
}

/// Attempt-level retry policy for agent invocations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    /// Wall-clock limit per attempt; the agent is killed when it is exceeded.
    pub attempt_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_secs: 5,
            max_delay_secs: 60,
            attempt_timeout_secs: 120,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

/// Record store tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RecordsConfig {
    /// Immutable item fields hashed into the record identity, in order.
    pub identity_fields: Vec<String>,
    /// Run history entries kept in the snapshot document.
    pub history_limit: usize,
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            identity_fields: DEFAULT_IDENTITY_FIELDS
                .iter()
                .map(|field| field.to_string())
                .collect(),
            history_limit: 100,
        }
    }
}

impl HarvesterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.agent.program.trim().is_empty() {
            return Err(anyhow!("agent.program must be non-empty"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be > 0"));
        }
        if self.retry.attempt_timeout_secs == 0 {
            return Err(anyhow!("retry.attempt_timeout_secs must be > 0"));
        }
        if self.retry.max_delay_secs < self.retry.initial_delay_secs {
            return Err(anyhow!(
                "retry.max_delay_secs must be >= retry.initial_delay_secs"
            ));
        }
        if self.records.identity_fields.is_empty()
            || self
                .records
                .identity_fields
                .iter()
                .any(|field| field.trim().is_empty())
        {
            return Err(anyhow!(
                "records.identity_fields must be a non-empty array of field names"
            ));
        }
        if self.records.history_limit == 0 {
            return Err(anyhow!("records.history_limit must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `HarvesterConfig::default()`.
pub fn load_config(path: &Path) -> Result<HarvesterConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = HarvesterConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: HarvesterConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk.
pub fn write_config(path: &Path, cfg: &HarvesterConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}
