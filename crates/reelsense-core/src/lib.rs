//! Core library for reelsense.
//!
//! - `auth`: signed token issuance/verification and client-side session storage
//! - `api`: the `SessionClient` that attaches credentials, retries and classifies errors
//! - `server`: the reference `AuthService` (user directory, login, bearer checks)
//! - `models`: wire types shared by client and service
//! - `config`: persisted client configuration

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod server;

pub use api::{ApiError, ApiRequest, ApiResponse, ResponseBody, RetryPolicy, SessionClient};
pub use auth::{Claims, Session, SessionStore, SubjectId, TokenError, TokenService};
pub use config::Config;
pub use server::AuthService;
