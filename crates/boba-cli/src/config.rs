//! Persistent CLI configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "cli-config.json";
const STORE_FILE_NAME: &str = "records.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    /// Base URL of the boba-server API.
    #[serde(default)]
    pub api_base_url: Option<String>,
}

const fn default_config_version() -> u32 {
    1
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| panic!("Failed to resolve CLI config directory"))
        .join("boba")
        .join(CONFIG_FILE_NAME)
}

/// Where the offline record store and session live.
pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| panic!("Failed to resolve CLI data directory"))
        .join("boba")
        .join(STORE_FILE_NAME)
}

pub fn load(path: &Path) -> Result<CliConfig, boba_core::Error> {
    if !path.exists() {
        return Ok(CliConfig {
            version: default_config_version(),
            api_base_url: None,
        });
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

pub fn save(path: &Path, config: &CliConfig) -> Result<(), boba_core::Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let payload = serde_json::to_string_pretty(config)?;
    std::fs::write(path, payload)?;
    Ok(())
}

pub fn is_http_url(value: &str) -> bool {
    let value = value.trim();
    value.starts_with("https://") || value.starts_with("http://")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_config_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cli-config.json");

        let config = load(&path).unwrap();
        assert_eq!(config.version, 1);
        assert!(config.api_base_url.is_none());
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cli-config.json");

        let config = CliConfig {
            version: 1,
            api_base_url: Some("https://boba.example.com".to_string()),
        };
        save(&path, &config).unwrap();

        assert_eq!(load(&path).unwrap(), config);
    }

    #[test]
    fn url_validation() {
        assert!(is_http_url("https://boba.example.com"));
        assert!(is_http_url(" http://127.0.0.1:8080 "));
        assert!(!is_http_url("boba.example.com"));
    }
}
