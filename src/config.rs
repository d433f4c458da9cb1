//! Application configuration, read from `config.toml`.
//!
//! Every field has a default so a missing file or a partial file is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::{RetryPolicy, SyncConfig};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Could not determine config directory")]
    NoConfigDir,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub sync: SyncSection,
    pub time_window: TimeWindowSection,
    pub filters: FiltersSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/v1".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncSection {
    /// Idle time before a burst of edits is flushed
    pub debounce_ms: u64,
    /// How long the "saved" indicator stays visible
    pub saved_indicator_ms: u64,
    pub retry: RetrySection,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            debounce_ms: 10_000,
            saved_indicator_ms: 2_000,
            retry: RetrySection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySection {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// 0 disables automatic retries
    pub max_attempts: u32,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 2_000,
            max_backoff_ms: 60_000,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeWindowSection {
    /// How often rolling windows are re-resolved
    pub poll_secs: u64,
}

impl Default for TimeWindowSection {
    fn default() -> Self {
        Self { poll_secs: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FiltersSection {
    /// Grace period before an empty draft filter is pruned
    pub draft_grace_ms: u64,
}

impl Default for FiltersSection {
    fn default() -> Self {
        Self {
            draft_grace_ms: 5_000,
        }
    }
}

impl AppConfig {
    /// `<config dir>/dashfrog/config.toml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("dashfrog").join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("Config: {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let config = toml::from_str(&data)?;
        log::info!("Config: loaded {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = toml::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            debounce: Duration::from_millis(self.sync.debounce_ms),
            saved_indicator: Duration::from_millis(self.sync.saved_indicator_ms),
            retry: RetryPolicy {
                initial_backoff: Duration::from_millis(self.sync.retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.sync.retry.max_backoff_ms),
                max_attempts: self.sync.retry.max_attempts,
            },
            time_window_poll: self.time_window_poll(),
            draft_grace: self.draft_grace(),
        }
    }

    pub fn time_window_poll(&self) -> Duration {
        Duration::from_secs(self.time_window.poll_secs)
    }

    pub fn draft_grace(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.filters.draft_grace_ms as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.sync_config().debounce, Duration::from_secs(10));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[api]\nbase_url = \"https://frog.example.com/api\"\n\n[sync]\ndebounce_ms = 500\n",
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.api.base_url, "https://frog.example.com/api");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.sync.debounce_ms, 500);
        assert_eq!(config.sync.retry.max_attempts, 5);
        assert_eq!(config.time_window.poll_secs, 30);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = AppConfig::default();
        config.filters.draft_grace_ms = 1_500;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.draft_grace(), chrono::Duration::milliseconds(1_500));
        assert_eq!(loaded.sync_config().draft_grace, chrono::Duration::milliseconds(1_500));
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sync\n").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Toml(_))));
    }
}
