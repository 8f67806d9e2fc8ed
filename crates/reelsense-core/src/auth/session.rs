use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::credentials::KeyringArea;
use super::store::{FileArea, MemoryArea, StorageArea};
use super::token::Claims;

/// Current storage key for the access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Deprecated alias still written so older readers keep working.
pub const LEGACY_TOKEN_KEY: &str = "authToken";

/// Read and cleared, never written.
const RETIRED_TOKEN_KEY: &str = "token";

/// Lookup order for reads.
const READ_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, LEGACY_TOKEN_KEY, RETIRED_TOKEN_KEY];

/// Keys written on `set`.
const WRITE_KEYS: [&str; 2] = [ACCESS_TOKEN_KEY, LEGACY_TOKEN_KEY];

/// Session file name in the data directory
pub const SESSION_FILE: &str = "session.json";

/// Injectable holder of the client's single active token.
///
/// Implementations must make `clear` idempotent: concurrent requests may all
/// observe a 401 and clear the same session.
pub trait SessionStore: Send + Sync {
    fn get(&self) -> Option<String>;
    fn set(&self, token: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;

    /// Returns the stored token, clearing it first if its `exp` has passed.
    ///
    /// Opaque tokens without a readable payload are returned as-is.
    fn current_token_at(&self, now: DateTime<Utc>) -> Option<String> {
        let token = self.get()?;
        let expired = Claims::peek(&token)
            .map(|claims| claims.is_expired_at(now))
            .unwrap_or(false);
        if expired {
            debug!("Stored token expired, clearing session");
            if let Err(e) = self.clear() {
                warn!(error = %e, "Failed to clear expired session");
            }
            return None;
        }
        Some(token)
    }

    fn current_token(&self) -> Option<String> {
        self.current_token_at(Utc::now())
    }
}

/// Token storage spread over a durable and an ephemeral area.
///
/// `set` writes the token under every current key in both areas; `clear`
/// removes every known key from both, so no stale copy survives.
pub struct Session {
    durable: Box<dyn StorageArea>,
    ephemeral: Box<dyn StorageArea>,
}

impl Session {
    pub fn new(durable: Box<dyn StorageArea>, ephemeral: Box<dyn StorageArea>) -> Self {
        Self { durable, ephemeral }
    }

    /// Nothing survives the process.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryArea::new()), Box::new(MemoryArea::new()))
    }

    /// Durable copy in `<dir>/session.json`.
    pub fn with_file(dir: &Path) -> Self {
        Self::new(
            Box::new(FileArea::new(dir.join(SESSION_FILE))),
            Box::new(MemoryArea::new()),
        )
    }

    /// Durable copy in the OS keychain.
    pub fn with_keyring(service: &str) -> Self {
        Self::new(Box::new(KeyringArea::new(service)), Box::new(MemoryArea::new()))
    }

    /// Claims of the stored token, unverified.
    pub fn claims(&self) -> Option<Claims> {
        self.get().as_deref().and_then(Claims::peek)
    }

    pub fn is_authenticated(&self) -> bool {
        self.get().is_some()
    }

    fn lookup(area: &dyn StorageArea, name: &str) -> Option<String> {
        for key in READ_KEYS {
            match area.get(key) {
                Ok(Some(token)) if !token.is_empty() => return Some(token),
                Ok(_) => {}
                Err(e) => {
                    warn!(area = name, key, error = %e, "Failed to read session storage");
                }
            }
        }
        None
    }
}

impl SessionStore for Session {
    fn get(&self) -> Option<String> {
        Self::lookup(self.durable.as_ref(), "durable")
            .or_else(|| Self::lookup(self.ephemeral.as_ref(), "ephemeral"))
    }

    fn set(&self, token: &str) -> Result<()> {
        if token.is_empty() {
            return self.clear();
        }
        // Drop the retired key so a stale copy cannot shadow the new token
        self.durable.remove(RETIRED_TOKEN_KEY)?;
        self.ephemeral.remove(RETIRED_TOKEN_KEY)?;
        for key in WRITE_KEYS {
            self.durable.set(key, token)?;
            self.ephemeral.set(key, token)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut first_error = None;
        for key in READ_KEYS {
            for area in [&self.durable, &self.ephemeral] {
                if let Err(e) = area.remove(key) {
                    warn!(key, error = %e, "Failed to remove token from session storage");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use tempfile::tempdir;

    use super::*;
    use crate::auth::TokenService;

    /// Memory areas shared with the test so it can inspect them directly.
    fn observed_session() -> (Session, Arc<MemoryArea>, Arc<MemoryArea>) {
        struct Shared(Arc<MemoryArea>);
        impl StorageArea for Shared {
            fn get(&self, key: &str) -> Result<Option<String>> {
                self.0.get(key)
            }
            fn set(&self, key: &str, value: &str) -> Result<()> {
                self.0.set(key, value)
            }
            fn remove(&self, key: &str) -> Result<()> {
                self.0.remove(key)
            }
        }

        let durable = Arc::new(MemoryArea::new());
        let ephemeral = Arc::new(MemoryArea::new());
        let session = Session::new(
            Box::new(Shared(durable.clone())),
            Box::new(Shared(ephemeral.clone())),
        );
        (session, durable, ephemeral)
    }

    #[test]
    fn test_set_writes_every_key_in_both_areas() {
        let (session, durable, ephemeral) = observed_session();
        session.set("T").unwrap();

        for area in [&durable, &ephemeral] {
            assert_eq!(area.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("T"));
            assert_eq!(area.get(LEGACY_TOKEN_KEY).unwrap().as_deref(), Some("T"));
        }
        assert_eq!(session.get().as_deref(), Some("T"));
    }

    #[test]
    fn test_set_replaces_previous_token() {
        let (session, durable, _) = observed_session();
        durable.set(RETIRED_TOKEN_KEY, "old").unwrap();
        session.set("first").unwrap();
        session.set("second").unwrap();

        assert_eq!(session.get().as_deref(), Some("second"));
        assert_eq!(durable.get(RETIRED_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_clear_leaves_no_orphans() {
        let (session, durable, ephemeral) = observed_session();
        session.set("T").unwrap();
        durable.set(RETIRED_TOKEN_KEY, "T").unwrap();
        ephemeral.set(RETIRED_TOKEN_KEY, "T").unwrap();

        session.clear().unwrap();
        session.clear().unwrap();

        for area in [&durable, &ephemeral] {
            for key in READ_KEYS {
                assert_eq!(area.get(key).unwrap(), None);
            }
        }
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_reads_legacy_keys() {
        let (session, durable, ephemeral) = observed_session();
        ephemeral.set(LEGACY_TOKEN_KEY, "from-session-scope").unwrap();
        assert_eq!(session.get().as_deref(), Some("from-session-scope"));

        durable.set(RETIRED_TOKEN_KEY, "from-retired-key").unwrap();
        assert_eq!(session.get().as_deref(), Some("from-retired-key"));

        durable.set(ACCESS_TOKEN_KEY, "current").unwrap();
        assert_eq!(session.get().as_deref(), Some("current"));
    }

    #[test]
    fn test_empty_token_clears() {
        let session = Session::in_memory();
        session.set("T").unwrap();
        session.set("").unwrap();
        assert_eq!(session.get(), None);
    }

    #[test]
    fn test_expired_token_is_cleared_locally() {
        let tokens = TokenService::new("k").unwrap();
        let session = Session::in_memory();
        let now = Utc::now();
        session.set(&tokens.issue_at(1, "a@b.com", now).unwrap()).unwrap();

        assert!(session.current_token_at(now).is_some());
        assert_eq!(session.claims().map(|c| c.email).as_deref(), Some("a@b.com"));

        assert!(session.current_token_at(now + Duration::hours(24)).is_none());
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_opaque_token_is_kept() {
        let session = Session::in_memory();
        session.set("opaque").unwrap();
        assert_eq!(session.current_token().as_deref(), Some("opaque"));
    }

    #[test]
    fn test_file_session_survives_restart() {
        let dir = tempdir().expect("tempdir");
        Session::with_file(dir.path()).set("T").unwrap();

        let restarted = Session::with_file(dir.path());
        assert_eq!(restarted.get().as_deref(), Some("T"));
        restarted.clear().unwrap();
        assert!(!dir.path().join(SESSION_FILE).exists());
    }
}
