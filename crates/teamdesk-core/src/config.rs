//! Application configuration management.
//!
//! Holds the backend URL, which storage backend keeps the session, the last
//! email used to log in, and the route policy. Stored at
//! `~/.config/teamdesk/config.json`; environment variables override the
//! backend URL.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::DEFAULT_API_URL;
use crate::auth::{FileStorage, KeyringStorage, MemoryStorage, SessionStorage};
use crate::routes::RoutePolicy;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "teamdesk";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the backend URL
pub const API_URL_ENV: &str = "TEAMDESK_API_URL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    File,
    Keyring,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub api_url: Option<String>,
    pub storage: StorageKind,
    pub last_email: Option<String>,
    pub routes: RoutePolicy,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
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

    /// Directory for the file-backed session record.
    pub fn session_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Backend URL: environment first, then config, then the local default.
    pub fn api_url(&self) -> String {
        std::env::var(API_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    /// Build the configured session storage backend.
    pub fn session_storage(&self) -> Box<dyn SessionStorage> {
        match self.storage {
            StorageKind::File => {
                let dir = self.session_dir().unwrap_or_else(|e| {
                    warn!(error = %e, "No cache directory, using ./cache");
                    PathBuf::from("./cache")
                });
                Box::new(FileStorage::new(dir))
            }
            StorageKind::Keyring => Box::new(KeyringStorage::new()),
            StorageKind::Memory => Box::new(MemoryStorage::new()),
        }
    }
}
