//! Run configuration
//!
//! Values come from, in increasing precedence: built-in defaults, an
//! optional TOML file, `SHARD_TOPK_*` environment variables, and finally
//! explicit command-line flags applied by the binary.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};

pub mod loader;

pub use loader::{load_config, ConfigLoader};

pub const ENV_K: &str = "SHARD_TOPK_K";
pub const ENV_FAN_IN_TIMEOUT: &str = "SHARD_TOPK_FAN_IN_TIMEOUT";
pub const ENV_MAX_RETRIES: &str = "SHARD_TOPK_MAX_RETRIES";
pub const ENV_MAX_PARALLEL_JOBS: &str = "SHARD_TOPK_MAX_PARALLEL_JOBS";

/// Settings of a top-K run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopKConfig {
    /// Number of ranked entries to produce
    pub k: usize,

    /// Deadline for collecting all partition jobs
    #[serde(with = "humantime_serde")]
    pub fan_in_timeout: Duration,

    /// Resubmissions of a failed partition job
    pub max_retries: u32,

    /// Pause between resubmissions
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,

    /// Upper bound on concurrently running jobs; unbounded when unset
    pub max_parallel_jobs: Option<usize>,

    /// Label of sentinel attributes for entities missing from the attribute store
    pub unknown_label: String,
}

impl Default for TopKConfig {
    fn default() -> Self {
        Self {
            k: 5,
            fan_in_timeout: Duration::from_secs(30),
            max_retries: 1,
            retry_backoff: Duration::from_millis(100),
            max_parallel_jobs: None,
            unknown_label: crate::mapreduce::enricher::UNKNOWN_LABEL.to_string(),
        }
    }
}

impl TopKConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `SHARD_TOPK_*` overrides from the process environment
    pub fn merge_env_vars(&mut self) {
        self.merge_env_with(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn merge_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_K) {
            match value.parse() {
                Ok(k) => self.k = k,
                Err(_) => warn!("Ignoring {}={:?}: not a number", ENV_K, value),
            }
        }

        if let Some(value) = lookup(ENV_FAN_IN_TIMEOUT) {
            match humantime_serde::re::humantime::parse_duration(&value) {
                Ok(timeout) => self.fan_in_timeout = timeout,
                Err(e) => warn!("Ignoring {}={:?}: {}", ENV_FAN_IN_TIMEOUT, value, e),
            }
        }

        if let Some(value) = lookup(ENV_MAX_RETRIES) {
            match value.parse() {
                Ok(retries) => self.max_retries = retries,
                Err(_) => warn!("Ignoring {}={:?}: not a number", ENV_MAX_RETRIES, value),
            }
        }

        if let Some(value) = lookup(ENV_MAX_PARALLEL_JOBS) {
            match value.parse() {
                Ok(limit) => self.max_parallel_jobs = Some(limit),
                Err(_) => warn!("Ignoring {}={:?}: not a number", ENV_MAX_PARALLEL_JOBS, value),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(Error::Config("k must be at least 1".to_string()));
        }
        if self.fan_in_timeout.is_zero() {
            return Err(Error::Config("fan_in_timeout must be positive".to_string()));
        }
        if self.max_parallel_jobs == Some(0) {
            return Err(Error::Config(
                "max_parallel_jobs must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}
