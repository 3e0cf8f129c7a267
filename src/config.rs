use serde::Deserialize;
use std::path::Path;

use crate::error::{Error, Result};

/// Sizing and waiting behaviour shared by every Left-Right variant.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Capacity of per-thread read-indicators, of bounded slot registries
    /// and of the flat-combining request array.
    #[serde(default = "defaults::max_threads")]
    pub max_threads: usize,
    /// Number of buckets of the hashed counter-array read-indicator. Must
    /// be a power of two.
    #[serde(default = "defaults::counter_buckets")]
    pub counter_buckets: usize,
    #[serde(default)]
    pub wait: WaitPolicy,
}

/// What a thread does between two checks of a condition it is waiting on.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WaitPolicy {
    /// Give the processor back to the scheduler.
    #[default]
    Yield,
    /// Busy-spin with a processor hint.
    Spin,
}

mod defaults {
    pub fn max_threads() -> usize {
        128
    }

    pub fn counter_buckets() -> usize {
        64
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_threads: defaults::max_threads(),
            counter_buckets: defaults::counter_buckets(),
            wait: WaitPolicy::default(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| Error::ConfigRead {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml(&toml_to_str)
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_threads == 0 {
            return Err(Error::InvalidConfig("max_threads must be at least 1".into()));
        }
        if !self.counter_buckets.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "counter_buckets={} is not a power of two",
                self.counter_buckets
            )));
        }
        Ok(())
    }
}
