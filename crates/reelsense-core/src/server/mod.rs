//! Reference authentication backend.
//!
//! `AuthService` owns the account table and the `TokenService`: it registers
//! and signs users in, and resolves bearer tokens back to users. Every token
//! failure is reported as the same 401 so callers cannot tell an expired
//! token from a forged one. `LocalTransport` serves it to a `SessionClient`
//! in-process.

pub mod directory;
pub mod router;
pub mod service;

pub use directory::{DirectoryError, UserDirectory, UserRecord};
pub use router::LocalTransport;
pub use service::{AuthFailure, AuthService};
