use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::auth::SubjectId;
use crate::models::{Role, User};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("User with this email already exists")]
    EmailTaken,

    #[error("Failed to hash password: {0}")]
    Hashing(String),
}

/// Stored account. `password_hash` is an argon2id PHC string.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn to_user(&self) -> User {
        User {
            id: SubjectId::Number(self.id),
            email: self.email.clone(),
            role: self.role,
        }
    }
}

/// In-memory account table keyed by normalized email.
pub struct UserDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
    next_id: AtomicI64,
    params: Params,
}

impl Default for UserDirectory {
    fn default() -> Self {
        Self::with_params(Params::default())
    }
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Custom argon2 cost parameters.
    pub fn with_params(params: Params) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            params,
        }
    }

    fn hasher(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    fn normalize(email: &str) -> String {
        email.trim().to_lowercase()
    }

    pub fn create(&self, email: &str, password: &str, role: Role) -> Result<UserRecord, DirectoryError> {
        let email = Self::normalize(email);
        if self.find_by_email(&email).is_some() {
            return Err(DirectoryError::EmailTaken);
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = self
            .hasher()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| DirectoryError::Hashing(e.to_string()))?
            .to_string();

        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        // Re-check under the write lock; hashing ran unlocked
        if users.contains_key(&email) {
            return Err(DirectoryError::EmailTaken);
        }
        let record = UserRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            email: email.clone(),
            password_hash,
            role,
            created_at: Utc::now(),
        };
        users.insert(email, record.clone());
        Ok(record)
    }

    pub fn find_by_email(&self, email: &str) -> Option<UserRecord> {
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        users.get(&Self::normalize(email)).cloned()
    }

    /// Accepts numeric ids and their string form.
    pub fn find_by_id(&self, id: &SubjectId) -> Option<UserRecord> {
        let id = match id {
            SubjectId::Number(id) => *id,
            SubjectId::Text(text) => text.trim().parse().ok()?,
        };
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        users.values().find(|record| record.id == id).cloned()
    }

    /// Record for `email` if `password` matches its hash.
    pub fn authenticate(&self, email: &str, password: &str) -> Option<UserRecord> {
        let record = self.find_by_email(email)?;
        let parsed = PasswordHash::new(&record.password_hash).ok()?;
        self.hasher()
            .verify_password(password.as_bytes(), &parsed)
            .ok()
            .map(|_| record)
    }

    pub fn len(&self) -> usize {
        self.users.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub(crate) fn fast_params() -> Params {
    Params::new(Params::MIN_M_COST, 1, 1, None).expect("argon2 params")
}
