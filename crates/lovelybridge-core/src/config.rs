//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the
//! backend address, the refresh and profile endpoints, the request timeout
//! and which store keeps the session.
//!
//! Configuration is stored at `~/.config/lovelybridge/config.json`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::{
    ApiClient, ReqwestTransport, DEFAULT_BASE_URL, DEFAULT_PROFILE_PATH,
    DEFAULT_REQUEST_TIMEOUT_SECS,
};
use crate::auth::DEFAULT_REFRESH_PATH;
use crate::storage::{FileStore, KeyValueStore, KeyringStore, MemoryStore};

/// Application name used for config/data directory paths
const APP_NAME: &str = "lovelybridge";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_API_URL: &str = "LOVELYBRIDGE_API_URL";
pub const ENV_STORAGE: &str = "LOVELYBRIDGE_STORAGE";

/// Where the session keys live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    /// Process memory only; nothing survives exit
    Memory,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::File => "file",
            StorageBackend::Keyring => "keyring",
            StorageBackend::Memory => "memory",
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StorageBackend::File),
            "keyring" | "keychain" => Ok(StorageBackend::Keyring),
            "memory" => Ok(StorageBackend::Memory),
            other => anyhow::bail!("Unknown storage backend '{}'", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub refresh_path: String,
    pub profile_path: String,
    pub request_timeout_secs: u64,
    pub storage: StorageBackend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_BASE_URL.to_string(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            profile_path: DEFAULT_PROFILE_PATH.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            storage: StorageBackend::default(),
        }
    }
}

impl Config {
    /// Load the config file (defaults when absent) and apply environment
    /// overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
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

    /// Apply `LOVELYBRIDGE_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(backend) = lookup(ENV_STORAGE).filter(|v| !v.trim().is_empty()) {
            self.storage = backend
                .parse()
                .with_context(|| format!("Invalid {}", ENV_STORAGE))?;
        }
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the storage file and logs
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Open the configured session store.
    pub fn open_store(&self) -> Result<Arc<dyn KeyValueStore>> {
        let store: Arc<dyn KeyValueStore> = match self.storage {
            StorageBackend::File => {
                let dir = Self::data_dir()?;
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
                Arc::new(FileStore::open(&dir).context("Failed to open session storage")?)
            }
            StorageBackend::Keyring => Arc::new(KeyringStore::new()),
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(store)
    }

    /// Build the shared API client over the real HTTP transport.
    pub fn build_client(&self) -> Result<ApiClient> {
        let transport = ReqwestTransport::new(self.request_timeout())
            .context("Failed to create HTTP client")?;
        let client = ApiClient::new(&self.api_base_url, Arc::new(transport));
        client.set_profile_path(&self.profile_path);
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: Config = serde_json::from_str(r#"{"storage": "keyring"}"#).unwrap();
        assert_eq!(config.storage, StorageBackend::Keyring);
        assert_eq!(config.api_base_url, "http://127.0.0.1:8000");
        assert_eq!(config.refresh_path, "/api/auth/token/refresh/");
        assert_eq!(config.request_timeout_secs, 10);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_API_URL, " https://lovelybridge.example "),
            (ENV_STORAGE, "Keychain"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.api_base_url, "https://lovelybridge.example");
        assert_eq!(config.storage, StorageBackend::Keyring);
    }

    #[test]
    fn test_bad_storage_override_is_an_error() {
        let mut config = Config::default();
        let result = config.apply_overrides(|key| (key == ENV_STORAGE).then(|| "floppy".to_string()));
        assert!(result.is_err());
        assert_eq!(config.storage, StorageBackend::File);
    }

    #[test]
    fn test_zero_timeout_is_raised() {
        let config = Config {
            request_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.request_timeout(), Duration::from_secs(1));
    }
}
