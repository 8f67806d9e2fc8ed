use anyhow::{Context, Result};
use keyring::Entry;

use super::store::StorageArea;

pub const DEFAULT_SERVICE_NAME: &str = "reelsense";

/// Durable storage in the OS keychain, one entry per key under a service name.
pub struct KeyringArea {
    service: String,
}

impl KeyringArea {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).context("Failed to create keyring entry")
    }
}

impl Default for KeyringArea {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_NAME)
    }
}

impl StorageArea for KeyringArea {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve token from keychain"),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .context("Failed to store token in keychain")
    }

    fn remove(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        }
    }
}
