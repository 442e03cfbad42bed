//! Application configuration management.
//!
//! This module handles loading and saving the configuration: the API base
//! URL, request and refresh timeouts, where the session is persisted, the
//! last used username, and the route access table.
//!
//! Configuration is stored at `~/.config/tokenflow/config.json`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::api::client::DEFAULT_REFRESH_TIMEOUT_SECS;
use crate::guard::RouteTable;
use crate::storage::{FileStore, KeyValueStore, KeyringStore};

/// Application name used for config/cache directory paths and the keychain service
const APP_NAME: &str = "tokenflow";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable that overrides the configured base URL
pub const BASE_URL_ENV: &str = "TOKENFLOW_BASE_URL";

const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// `session.json` in the cache directory
    #[default]
    File,
    /// OS keychain
    Keyring,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub refresh_timeout_secs: u64,
    pub storage: StorageBackend,
    pub last_username: Option<String>,
    pub routes: RouteTable,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_timeout_secs: DEFAULT_REFRESH_TIMEOUT_SECS,
            storage: StorageBackend::default(),
            last_username: None,
            routes: RouteTable::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Base URL, with the environment override applied
    pub fn base_url(&self) -> Result<Url> {
        let raw = std::env::var(BASE_URL_ENV).unwrap_or_else(|_| self.base_url.clone());
        Self::parse_base_url(&raw)
    }

    fn parse_base_url(raw: &str) -> Result<Url> {
        let url = Url::parse(raw.trim()).with_context(|| format!("Invalid base URL: {}", raw))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("Base URL must be http or https: {}", raw);
        }
        Ok(url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    /// Open the configured session storage backend
    pub fn open_storage(&self) -> Result<Arc<dyn KeyValueStore>> {
        Ok(match self.storage {
            StorageBackend::File => Arc::new(FileStore::in_dir(&self.cache_dir()?)),
            StorageBackend::Keyring => Arc::new(KeyringStore::new(APP_NAME)),
        })
    }

    /// HTTP client with the configured request timeout
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.request_timeout())
            .build()
            .context("Failed to build HTTP client")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::RouteAccess;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"base_url": "https://api.example.com", "storage": "keyring"}"#)
                .unwrap();
        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.storage, StorageBackend::Keyring);
        assert_eq!(config.refresh_timeout(), Duration::from_secs(10));
        assert_eq!(config.routes.access_for("/admin"), RouteAccess::Admin);
    }

    #[test]
    fn test_parse_base_url() {
        assert!(Config::parse_base_url("http://localhost:3000").is_ok());
        assert!(Config::parse_base_url(" https://api.example.com/v1 ").is_ok());
        assert!(Config::parse_base_url("ftp://example.com").is_err());
        assert!(Config::parse_base_url("not a url").is_err());
    }
}
