//! Client configuration management.
//!
//! This module handles loading and saving the client configuration: API
//! location, timeout and retry settings, where the session is kept, and the
//! last email used to sign in.
//!
//! Configuration is stored at `~/.config/reelsense/config.json`. The API URL
//! can be overridden with `REELSENSE_API_URL`; the token signing secret is
//! only ever read from `REELSENSE_SECRET_KEY`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::client::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_TIMEOUT_SECS};
use crate::api::RetryPolicy;
use crate::auth::{Session, TokenService};

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "reelsense";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const API_URL_ENV: &str = "REELSENSE_API_URL";
pub const SECRET_KEY_ENV: &str = "REELSENSE_SECRET_KEY";

const DEFAULT_API_URL: &str = "http://localhost:8099";
const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;

/// Where the durable copy of the session token lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub token_ttl_hours: i64,
    pub storage: StorageBackend,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            token_ttl_hours: DEFAULT_TOKEN_TTL_HOURS,
            storage: StorageBackend::default(),
            last_email: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Ok(serde_json::from_str(&contents).context("Failed to parse config file")?)
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

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the durable session file.
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Environment first, then the config file, then the default.
    pub fn api_url(&self) -> String {
        std::env::var(API_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    pub fn open_session(&self) -> Result<Session> {
        Ok(match self.storage {
            StorageBackend::File => Session::with_file(&self.data_dir()?),
            StorageBackend::Keyring => Session::with_keyring(APP_NAME),
        })
    }

    /// Token service keyed by `REELSENSE_SECRET_KEY`.
    pub fn token_service(&self) -> Result<TokenService> {
        let secret = std::env::var(SECRET_KEY_ENV)
            .with_context(|| format!("{} is not set", SECRET_KEY_ENV))?;
        let service = TokenService::new(secret.trim())
            .with_context(|| format!("{} is not a usable signing key", SECRET_KEY_ENV))?;
        service
            .with_ttl(self.token_ttl()?)
            .context("Invalid token_ttl_hours in config")
    }

    /// Configured token lifetime; must be a positive, representable number of hours.
    pub fn token_ttl(&self) -> Result<chrono::Duration> {
        let hours = self.token_ttl_hours;
        if hours <= 0 {
            bail!("token_ttl_hours must be positive, got {}", hours);
        }
        chrono::Duration::try_hours(hours)
            .with_context(|| format!("token_ttl_hours is out of range: {}", hours))
    }
}
