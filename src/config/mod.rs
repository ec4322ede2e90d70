pub mod central_config;
pub mod peripheral_config;

use std::io;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

use crate::config::central_config::CentralConfig;
use crate::config::peripheral_config::PeripheralConfig;
use crate::core::bluetooth::constants::EXPLICIT_BLUETOOTH_GRANTS_API_LEVEL;
use crate::utils::ensure_directory_exists;

const CONFIG_FILE_NAME: &str = "ble_playground_config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Platform the permission model is evaluated against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub api_level: u32,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        PlatformConfig {
            api_level: EXPLICIT_BLUETOOTH_GRANTS_API_LEVEL,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub central: CentralConfig,
    pub peripheral: PeripheralConfig,
    pub platform: PlatformConfig,
}

impl AppConfig {
    pub fn file_path(config_dir: &Path) -> PathBuf {
        config_dir.join(CONFIG_FILE_NAME)
    }

    /// Loads the config from `config_dir`, falling back to defaults when no
    /// file exists yet.
    pub async fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let file_path = Self::file_path(config_dir);

        let config_json = match fs::read_to_string(&file_path).await {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("Config file not found at {:?}, using default.", file_path);
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: file_path,
                    source,
                });
            }
        };

        let config: Self = serde_json::from_str(&config_json).map_err(|source| {
            error!("Failed to parse config at {:?}: {}", file_path, source);
            ConfigError::Parse {
                path: file_path.clone(),
                source,
            }
        })?;

        info!("Config loaded from {:?}", file_path);
        Ok(config)
    }

    /// Saves the config into `config_dir`, creating the directory if needed.
    pub async fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        ensure_directory_exists(config_dir)
            .await
            .map_err(|source| ConfigError::Io {
                path: config_dir.to_path_buf(),
                source,
            })?;

        let file_path = Self::file_path(config_dir);
        let config_json = serde_json::to_string_pretty(self).map_err(|source| {
            error!("Failed to serialize config to JSON: {}", source);
            ConfigError::Parse {
                path: file_path.clone(),
                source,
            }
        })?;

        fs::write(&file_path, config_json)
            .await
            .map_err(|source| ConfigError::Io {
                path: file_path.clone(),
                source,
            })?;

        info!("Config saved to {:?}.", file_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("ble-playground-config-{}", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = scratch_dir();
        let config = AppConfig::load(&dir).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.central.scan_period_secs, 60);
        assert_eq!(config.peripheral.initial_value, "22");
    }

    #[tokio::test]
    async fn save_then_load_keeps_changes() {
        let dir = scratch_dir();
        let mut config = AppConfig::default();
        config.central.connect_timeout_secs = 5;
        config.platform.api_level = 29;

        config.save(&dir).await.unwrap();
        let loaded = AppConfig::load(&dir).await.unwrap();
        assert_eq!(loaded, config);

        fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn partial_file_fills_in_defaults() {
        let dir = scratch_dir();
        ensure_directory_exists(&dir).await.unwrap();
        fs::write(
            AppConfig::file_path(&dir),
            r#"{ "central": { "scan_period_secs": 10 } }"#,
        )
        .await
        .unwrap();

        let loaded = AppConfig::load(&dir).await.unwrap();
        assert_eq!(loaded.central.scan_period_secs, 10);
        assert_eq!(loaded.central.connect_timeout_secs, 30);
        assert_eq!(loaded.peripheral, PeripheralConfig::default());

        fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn malformed_file_is_a_parse_error() {
        let dir = scratch_dir();
        ensure_directory_exists(&dir).await.unwrap();
        fs::write(AppConfig::file_path(&dir), "not json").await.unwrap();

        let result = AppConfig::load(&dir).await;
        assert!(matches!(result, Err(ConfigError::Parse { .. })));

        fs::remove_dir_all(&dir).await.unwrap();
    }
}
