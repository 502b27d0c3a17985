//! Runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Configuration for one process worth of topologies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Root directory for state store data.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// High-water mark for the queues between processors.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Records a sink may have in flight at its producer before it stops
    /// pulling from upstream.
    #[serde(default = "default_max_outstanding")]
    pub max_outstanding: usize,

    /// Capacity of the bounded queue between a background fetch thread and
    /// the topology thread.
    #[serde(default = "default_fetch_queue_capacity")]
    pub fetch_queue_capacity: usize,

    /// Driver sleep when a full pass over the graph processed nothing.
    #[serde(default = "default_tick_interval", with = "humantime_serde")]
    pub tick_interval: Duration,

    /// How often the driver loop writes back consumer positions.
    #[serde(default = "default_commit_interval", with = "humantime_serde")]
    pub commit_interval: Duration,

    /// Deadline for producer flushes.
    #[serde(default = "default_flush_timeout", with = "humantime_serde")]
    pub flush_timeout: Duration,
}

fn default_storage_root() -> PathBuf {
    rill_paths::data_dir().join("state")
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_outstanding() -> usize {
    100
}

fn default_fetch_queue_capacity() -> usize {
    1000
}

fn default_tick_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_commit_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_flush_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            queue_capacity: default_queue_capacity(),
            max_outstanding: default_max_outstanding(),
            fetch_queue_capacity: default_fetch_queue_capacity(),
            tick_interval: default_tick_interval(),
            commit_interval: default_commit_interval(),
            flush_timeout: default_flush_timeout(),
        }
    }
}

impl RuntimeConfig {
    /// Parse from TOML text; missing fields take their defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| crate::error::Error::Config(e.to_string()))
    }

    /// Load from a TOML file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| crate::error::Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }
}
