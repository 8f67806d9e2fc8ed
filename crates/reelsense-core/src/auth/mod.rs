//! Authentication: signed tokens and the client-side session that holds them.
//!
//! This module provides:
//! - `TokenService`: HS256 token issuance and stateless verification
//! - `Session`: the `SessionStore` used by the client, spread over a durable
//!   area (file or OS keychain) and an ephemeral in-memory area
//!
//! Tokens expire 24 hours after issuance and are never renewed in place.

pub mod credentials;
pub mod session;
pub mod store;
pub mod token;

pub use credentials::KeyringArea;
pub use session::{Session, SessionStore};
pub use store::{FileArea, MemoryArea, StorageArea};
pub use token::{Claims, SubjectId, TokenError, TokenService};
