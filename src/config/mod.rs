//! Configuration module for itemflow
//!
//! Engine-wide settings: pacing of item execution contexts, the host event
//! channel bound and the default log filter. Item parameters are not
//! persisted here; they live in each item's parameter store.
//!
//! # Data Location
//!
//! The default config file lives in the platform-appropriate data directory:
//! - **Linux**: `~/.local/share/dev.itemflow/`
//! - **macOS**: `~/Library/Application Support/dev.itemflow/`
//! - **Windows**: `%APPDATA%\dev.itemflow\`
//!
//! # Example
//!
//! ```ignore
//! use itemflow::config::EngineConfig;
//!
//! let config = EngineConfig::load_or_default(EngineConfig::default_path()?);
//! let (graph, bridge) = ItemGraph::new(registry, config.item_options(), config.event_channel_capacity);
//! ```

use crate::error::{ItemFlowError, Result};
use crate::pipeline::item::ItemOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for data directories
pub const APP_ID: &str = "dev.itemflow";

/// Engine config filename
pub const ENGINE_CONFIG_FILE: &str = "engine.json";

/// Default wait for new input before an idle iteration, in milliseconds
pub const DEFAULT_IDLE_INTERVAL_MS: u64 = 10;

/// Default cadence of items without inputs, in milliseconds (~30 fps)
pub const DEFAULT_SOURCE_PERIOD_MS: u64 = 33;

/// Default bound of the host event channel
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

// ==================== Config Directory ====================

/// Get the application config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Longest wait for new input before an idle iteration; bounds `stop()` latency
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,

    /// Cadence of items that have neither inputs nor their own period
    #[serde(default = "default_source_period_ms")]
    pub source_period_ms: u64,

    /// Prefix of execution-context thread names
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,

    /// Bound of the host event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// `tracing` filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_idle_interval_ms() -> u64 {
    DEFAULT_IDLE_INTERVAL_MS
}

fn default_source_period_ms() -> u64 {
    DEFAULT_SOURCE_PERIOD_MS
}

fn default_thread_name_prefix() -> String {
    "item".to_string()
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

fn default_log_filter() -> String {
    "info,itemflow=debug".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_interval_ms: default_idle_interval_ms(),
            source_period_ms: default_source_period_ms(),
            thread_name_prefix: default_thread_name_prefix(),
            event_channel_capacity: default_event_channel_capacity(),
            log_filter: default_log_filter(),
        }
    }
}

impl EngineConfig {
    /// Path of the config file in the platform data directory
    pub fn default_path() -> Result<PathBuf> {
        config_dir()
            .map(|dir| dir.join(ENGINE_CONFIG_FILE))
            .ok_or_else(|| ItemFlowError::Config("Could not determine config directory".to_string()))
    }

    /// Load config from `path`; a missing file yields the defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ItemFlowError::Config(format!("Failed to read engine config {:?}: {}", path, e))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            ItemFlowError::Config(format!("Failed to parse engine config {:?}: {}", path, e))
        })
    }

    /// Load config, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load engine config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save config to `path` as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ItemFlowError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .map_err(|e| ItemFlowError::Config(format!("Failed to write engine config: {}", e)))
    }

    /// Execution-context settings derived from this config
    pub fn item_options(&self) -> ItemOptions {
        ItemOptions {
            idle_interval: Duration::from_millis(self.idle_interval_ms.max(1)),
            source_period: Duration::from_millis(self.source_period_ms.max(1)),
            thread_name_prefix: self.thread_name_prefix.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.idle_interval_ms, 10);
        assert_eq!(config.source_period_ms, 33);
        assert_eq!(config.event_channel_capacity, 1024);
        assert_eq!(config.item_options().idle_interval, Duration::from_millis(10));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(ENGINE_CONFIG_FILE);

        let config = EngineConfig {
            idle_interval_ms: 5,
            thread_name_prefix: "cam".to_string(),
            ..EngineConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(ENGINE_CONFIG_FILE);
        std::fs::write(&path, r#"{ "source_period_ms": 100 }"#).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.source_period_ms, 100);
        assert_eq!(loaded.idle_interval_ms, DEFAULT_IDLE_INTERVAL_MS);
        assert_eq!(loaded.log_filter, "info,itemflow=debug");
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let loaded = EngineConfig::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, EngineConfig::default());
    }

    #[test]
    fn test_corrupt_file_falls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(ENGINE_CONFIG_FILE);
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(EngineConfig::load(&path), Err(ItemFlowError::Config(_))));
        assert_eq!(EngineConfig::load_or_default(&path), EngineConfig::default());
    }

    #[test]
    fn test_zero_intervals_are_clamped() {
        let config = EngineConfig {
            idle_interval_ms: 0,
            source_period_ms: 0,
            ..EngineConfig::default()
        };
        let options = config.item_options();
        assert_eq!(options.idle_interval, Duration::from_millis(1));
        assert_eq!(options.source_period, Duration::from_millis(1));
    }
}
