use anyhow::{Context, Result};
use arena_vision::ConsensusConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Runtime settings for the tracker. Every field has a default, so a partial (or
/// absent) config file is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Holds `cards.json`, `hashes.json` and `templates/`.
    pub data_dir: PathBuf,
    pub log_path: Option<PathBuf>,
    /// Defaults to `<data_dir>/regions.json`.
    pub geometry_path: Option<PathBuf>,
    /// Reference image for the region locator; heuristic layout when absent.
    pub locator_template: Option<PathBuf>,
    pub screen_index: usize,
    pub poll_interval_ms: u64,
    pub debounce_ms: u64,
    pub max_backoff_ms: u64,
    pub cache_ttl_ms: u64,
    pub cache_capacity: usize,
    pub capture_timeout_ms: u64,
    pub match_timeout_ms: u64,
    pub shown_group_window_ms: u64,
    pub max_unconfirmed_cycles: u32,
    pub log_poll_ms: u64,
    pub consensus: ConsensusConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            log_path: None,
            geometry_path: None,
            locator_template: None,
            screen_index: 0,
            poll_interval_ms: 1200,
            debounce_ms: 300,
            max_backoff_ms: 5000,
            cache_ttl_ms: 500,
            cache_capacity: 16,
            capture_timeout_ms: 2000,
            match_timeout_ms: 3000,
            shown_group_window_ms: 2000,
            max_unconfirmed_cycles: 5,
            log_poll_ms: 250,
            consensus: ConsensusConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Read a JSON config. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn geometry_path(&self) -> PathBuf {
        self.geometry_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("regions.json"))
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn match_timeout(&self) -> Duration {
        Duration::from_millis(self.match_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn log_poll(&self) -> Duration {
        Duration::from_millis(self.log_poll_ms.max(1))
    }
}
