use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CodectxError, Result};
use crate::index::cache::DEFAULT_CACHE_DIR;

pub const CONFIG_FILE_NAME: &str = ".codectx.toml";

/// Project configuration, read from `.codectx.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub analysis: AnalysisConfig,
    pub cache: CacheConfig,
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Extra gitignore-syntax patterns, anchored at the project root
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Cache directory name, relative to the project root
    pub directory: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: DEFAULT_CACHE_DIR.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// How often the watcher and worker threads wake up to check for shutdown
    pub poll_interval_ms: u64,
    /// Upper bound on joining each background thread when stopping
    pub stop_timeout_ms: u64,
    /// Pending events before the backlog collapses into a full re-scan
    pub queue_capacity: usize,
    /// Maximum dependency hops a modification is propagated
    pub max_propagation_hops: u32,
    /// Persist the store to the disk cache whenever the queue drains
    pub persist_on_idle: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            stop_timeout_ms: 2000,
            queue_capacity: 4096,
            max_propagation_hops: 8,
            persist_on_idle: true,
        }
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Config {
    /// Loads configuration for a project.
    ///
    /// An explicit path must exist. Otherwise `.codectx.toml` is looked up
    /// from `root` upward; no file means defaults.
    pub fn load(root: &Path, explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) if p.is_file() => p.to_path_buf(),
            Some(p) => {
                return Err(CodectxError::Config(format!(
                    "config file not found: {}",
                    p.display()
                )))
            }
            None => match Self::discover(root) {
                Some(p) => p,
                None => {
                    tracing::debug!("No {} found, using defaults", CONFIG_FILE_NAME);
                    return Ok(Self::default());
                }
            },
        };

        let text = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| CodectxError::Config(format!("{}: {}", path.display(), e)))?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// First `.codectx.toml` found walking from `root` to the filesystem root.
    pub fn discover(root: &Path) -> Option<PathBuf> {
        root.ancestors()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .find(|candidate| candidate.is_file())
    }
}
