//! Server configuration loaded from a YAML file

use hub_shading::ControllerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Json,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Database or document path
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("homehub.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
        }
    }
}

/// Top-level hub configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub shading: ControllerConfig,
}

impl HubConfig {
    /// Load configuration from a YAML file; a missing file yields defaults
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.shading.interval_secs, 1800);
        assert_eq!(config.shading.debounce_secs, 5);
        assert_eq!(config.shading.override_duration_secs, 4 * 3600);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: HubConfig = serde_yaml::from_str(
            "storage:\n  backend: json\n  path: states.json\nshading:\n  debounce_secs: 1\n",
        )
        .unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Json);
        assert_eq!(config.shading.debounce_secs, 1);
        assert_eq!(config.shading.interval_secs, 1800);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = HubConfig::load(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
    }
}
