//! Placement engine configuration (`offerpack.toml`).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for `{field}`: {value:?}")]
    Duration { field: &'static str, value: String },

    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),

    #[error("`{field}` of {value:?} exceeds the 24h ceiling")]
    TooLong { field: &'static str, value: String },
}

/// Longest accepted value for any duration setting.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlacementConfig {
    /// Max tasks pulled from the resource manager per round.
    pub task_dequeue_limit: u32,
    /// How long the resource manager may wait for tasks to appear.
    pub task_dequeue_timeout: String,
    /// Deadline for placing one task group.
    pub max_placement_duration: String,
    /// Max hosts requested in one offer acquisition.
    pub offer_dequeue_limit: u32,
    /// Timeout applied to every remote call.
    pub rpc_timeout: String,
    /// Sleep after starvation or a failed call.
    pub backoff_interval: String,
    /// Ceiling on concurrently running group workers.
    pub max_concurrent_groups: usize,
    pub resource_manager_url: String,
    pub host_manager_url: String,
    pub metrics_port: u16,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            task_dequeue_limit: 100,
            task_dequeue_timeout: "1s".to_string(),
            max_placement_duration: "30s".to_string(),
            offer_dequeue_limit: 10,
            rpc_timeout: "10s".to_string(),
            backoff_interval: "1s".to_string(),
            max_concurrent_groups: 64,
            resource_manager_url: "http://127.0.0.1:5290".to_string(),
            host_manager_url: "http://127.0.0.1:5291".to_string(),
            metrics_port: 9090,
        }
    }
}

impl PlacementConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: PlacementConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check limits are non-zero and every duration parses.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.task_dequeue_limit == 0 {
            return Err(ConfigError::Zero("task_dequeue_limit"));
        }
        if self.offer_dequeue_limit == 0 {
            return Err(ConfigError::Zero("offer_dequeue_limit"));
        }
        if self.max_concurrent_groups == 0 {
            return Err(ConfigError::Zero("max_concurrent_groups"));
        }
        self.task_dequeue_timeout()?;
        self.max_placement_duration()?;
        self.rpc_timeout()?;
        self.backoff_interval()?;
        Ok(())
    }

    pub fn task_dequeue_timeout(&self) -> Result<Duration, ConfigError> {
        field_duration("task_dequeue_timeout", &self.task_dequeue_timeout)
    }

    pub fn max_placement_duration(&self) -> Result<Duration, ConfigError> {
        field_duration("max_placement_duration", &self.max_placement_duration)
    }

    pub fn rpc_timeout(&self) -> Result<Duration, ConfigError> {
        field_duration("rpc_timeout", &self.rpc_timeout)
    }

    pub fn backoff_interval(&self) -> Result<Duration, ConfigError> {
        field_duration("backoff_interval", &self.backoff_interval)
    }
}

fn field_duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match parse_duration(value) {
        Some(d) if d.is_zero() => Err(ConfigError::Zero(field)),
        Some(d) if d > MAX_DURATION => Err(ConfigError::TooLong {
            field,
            value: value.to_string(),
        }),
        Some(d) => Ok(d),
        None => Err(ConfigError::Duration {
            field,
            value: value.to_string(),
        }),
    }
}

/// Parse a duration string like "5s", "500ms", "2m". Bare numbers are seconds.
///
/// Returns `None` for unparseable or overflowing input.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
