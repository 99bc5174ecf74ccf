//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! where the backend lives, timeouts, cache and audit retention settings,
//! and the current user.
//!
//! Configuration is stored at `~/.config/clinicdesk/config.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::{resolve_base_url, DEFAULT_FALLBACK_DELAY_MS, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::audit::{Actor, DEFAULT_RETENTION_DAYS};
use crate::cache::DEFAULT_STALE_MINUTES;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "clinicdesk";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Key-value settings file inside the data directory
const SETTINGS_FILE: &str = "settings.json";

/// Object store directory inside the data directory
const STORE_DIR: &str = "store";

const DEFAULT_ORIGIN: &str = "http://localhost:5173";

pub const ENV_ORIGIN: &str = "CLINICDESK_ORIGIN";
pub const ENV_API_URL: &str = "CLINICDESK_API_URL";
pub const ENV_USER_EMAIL: &str = "CLINICDESK_USER_EMAIL";

fn default_origin() -> String {
    DEFAULT_ORIGIN.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_fallback_delay_ms() -> u64 {
    DEFAULT_FALLBACK_DELAY_MS
}

fn default_cache_stale_minutes() -> i64 {
    DEFAULT_STALE_MINUTES
}

fn default_audit_retention_days() -> i64 {
    DEFAULT_RETENTION_DAYS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Origin the front end is served from; drives base URL resolution.
    #[serde(default = "default_origin")]
    pub origin: String,
    /// Explicit API base URL, overriding origin-based resolution.
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_fallback_delay_ms")]
    pub fallback_delay_ms: u64,
    #[serde(default = "default_cache_stale_minutes")]
    pub cache_stale_minutes: i64,
    #[serde(default = "default_audit_retention_days")]
    pub audit_retention_days: i64,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub user_role: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            api_base_url: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            fallback_delay_ms: DEFAULT_FALLBACK_DELAY_MS,
            cache_stale_minutes: DEFAULT_STALE_MINUTES,
            audit_retention_days: DEFAULT_RETENTION_DAYS,
            data_dir: None,
            user_email: None,
            user_name: None,
            user_role: None,
            user_id: None,
        }
    }
}

impl Config {
    /// Load from the default location and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Override fields from `CLINICDESK_*` variables. Empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(origin) = lookup(ENV_ORIGIN) {
            self.origin = origin;
        }
        if let Some(url) = lookup(ENV_API_URL) {
            self.api_base_url = Some(url);
        }
        if let Some(email) = lookup(ENV_USER_EMAIL) {
            self.user_email = Some(email);
        }
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn store_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(STORE_DIR))
    }

    pub fn settings_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(SETTINGS_FILE))
    }

    pub fn base_url(&self) -> String {
        resolve_base_url(&self.origin, self.api_base_url.as_deref())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn fallback_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_delay_ms)
    }

    /// The configured user, or the system actor when none is set.
    pub fn actor(&self) -> Actor {
        let Some(ref email) = self.user_email else {
            return Actor::system();
        };
        Actor {
            id: self.user_id.clone().unwrap_or_else(|| email.clone()),
            name: self.user_name.clone().unwrap_or_else(|| email.clone()),
            role: self.user_role.clone().unwrap_or_else(|| "staff".to_string()),
            email: Some(email.clone()),
        }
    }

    /// Replace the configured user. A stale `user_id` is dropped with it.
    pub fn set_user(&mut self, email: Option<&str>, name: Option<&str>, role: Option<&str>) {
        self.user_email = email.filter(|e| !e.is_empty()).map(str::to_string);
        self.user_name = name.map(str::to_string);
        self.user_role = role.map(str::to_string);
        self.user_id = None;
    }
}
