//! Process-wide configuration, set at init.
//!
//! Loads/saves a TOML config at `~/.cnav/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{CnavError, SystemHeaderPolicy};

/// Recognised configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CnavConfig {
    /// Max simultaneous parse jobs. 0 means the logical core count.
    pub parallelism: usize,
    /// Window in which dirty notifications are batched and deduplicated
    /// before scheduling reindex jobs.
    pub dirty_coalesce_window_ms: u64,
    /// Treatment of headers outside the project root.
    pub system_header_policy: SystemHeaderPolicy,
    /// Cursor nesting depth past which the walk aborts and the unit is
    /// marked partial.
    pub max_cursor_depth: usize,
    /// Collect fix-it hints from diagnostics.
    pub fix_its_enabled: bool,
    /// Capacity of the parsed translation-unit cache.
    pub unit_cache_capacity: usize,
}

impl Default for CnavConfig {
    fn default() -> Self {
        Self {
            parallelism: 0,
            dirty_coalesce_window_ms: 250,
            system_header_policy: SystemHeaderPolicy::IndexOnce,
            max_cursor_depth: 256,
            fix_its_enabled: true,
            unit_cache_capacity: 5,
        }
    }
}

impl CnavConfig {
    /// Load configuration from the given path.
    pub fn load(path: &Path) -> Result<Self, CnavError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CnavError::Config(e.to_string()))
    }

    /// Save configuration to the given path.
    pub fn save(&self, path: &Path) -> Result<(), CnavError> {
        let content = toml::to_string_pretty(self).map_err(|e| CnavError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from the default path, or return defaults if the file doesn't exist.
    pub fn load_or_default() -> Self {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path).unwrap_or_default()
        } else {
            Self::default()
        }
    }

    /// Default config path: `~/.cnav/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cnav")
            .join("config.toml")
    }

    /// Worker pool size after resolving the 0 = auto default.
    pub fn effective_parallelism(&self) -> usize {
        if self.parallelism > 0 {
            self.parallelism
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrips_through_toml() {
        let config = CnavConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("default config should serialize");
        let parsed: CnavConfig = toml::from_str(&toml_str).expect("serialized config should parse");
        assert_eq!(parsed.dirty_coalesce_window_ms, 250);
        assert_eq!(parsed.system_header_policy, SystemHeaderPolicy::IndexOnce);
        assert_eq!(parsed.unit_cache_capacity, 5);
        assert!(parsed.fix_its_enabled);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let parsed: CnavConfig = toml::from_str("parallelism = 2\n").unwrap();
        assert_eq!(parsed.parallelism, 2);
        assert_eq!(parsed.max_cursor_depth, 256);
    }

    #[test]
    fn effective_parallelism_never_zero() {
        let config = CnavConfig::default();
        assert!(config.effective_parallelism() >= 1);
        let fixed = CnavConfig {
            parallelism: 3,
            ..Default::default()
        };
        assert_eq!(fixed.effective_parallelism(), 3);
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = CnavConfig {
            parallelism: 4,
            fix_its_enabled: false,
            ..Default::default()
        };
        config.save(&path).unwrap();
        let loaded = CnavConfig::load(&path).unwrap();
        assert_eq!(loaded.parallelism, 4);
        assert!(!loaded.fix_its_enabled);
    }
}
