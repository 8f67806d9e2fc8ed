//! Wire models shared by the session client and the auth service.
//!
//! - `User`, `Role`: the identity returned by login/registration
//! - `LoginRequest`, `RegisterRequest`: request bodies for `/auth/*`
//! - `AuthResponse`: token plus user, tolerant of the older `token` field name

pub mod user;

pub use user::{AuthResponse, LoginRequest, RegisterRequest, Role, User};
