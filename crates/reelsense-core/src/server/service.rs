use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::auth::TokenService;
use crate::models::{AuthResponse, LoginRequest, RegisterRequest, User};

use super::directory::{DirectoryError, UserDirectory};

/// Shortest password accepted at registration.
const MIN_PASSWORD_LENGTH: usize = 6;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("{field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("User with this email already exists")]
    EmailTaken,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Token not provided")]
    MissingToken,

    /// Shape, signature, expiry and unknown-subject failures all look alike.
    #[error("Invalid token")]
    InvalidToken,

    #[error("Access denied")]
    AccessDenied,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthFailure {
    fn validation(field: &'static str, message: impl Into<String>) -> Self {
        AuthFailure::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            AuthFailure::Validation { .. } => 422,
            AuthFailure::EmailTaken => 400,
            AuthFailure::InvalidCredentials
            | AuthFailure::MissingToken
            | AuthFailure::InvalidToken
            | AuthFailure::AccessDenied => 401,
            AuthFailure::Internal(_) => 500,
        }
    }

    /// JSON error body in the shapes the client understands.
    pub fn envelope(&self) -> Value {
        match self {
            AuthFailure::Validation { field, message } => json!({
                "detail": [{"loc": ["body", field], "msg": message, "type": "value_error"}]
            }),
            AuthFailure::EmailTaken => json!({"detail": self.to_string()}),
            _ => json!({"success": false, "message": self.to_string()}),
        }
    }
}

impl From<DirectoryError> for AuthFailure {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::EmailTaken => AuthFailure::EmailTaken,
            DirectoryError::Hashing(msg) => AuthFailure::Internal(msg),
        }
    }
}

/// Registration, login and bearer-token checks over a `UserDirectory`.
pub struct AuthService {
    directory: UserDirectory,
    tokens: TokenService,
}

impl AuthService {
    pub fn new(tokens: TokenService) -> Self {
        Self::with_directory(UserDirectory::new(), tokens)
    }

    pub fn with_directory(directory: UserDirectory, tokens: TokenService) -> Self {
        Self { directory, tokens }
    }

    pub fn directory(&self) -> &UserDirectory {
        &self.directory
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, AuthFailure> {
        let email = request.email.trim();
        if !is_plausible_email(email) {
            return Err(AuthFailure::validation("email", "value is not a valid email address"));
        }
        if request.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthFailure::validation(
                "password",
                format!("password must be at least {} characters", MIN_PASSWORD_LENGTH),
            ));
        }

        let record = self
            .directory
            .create(email, &request.password, request.role.unwrap_or_default())?;
        info!(user_id = record.id, role = record.role.as_str(), "User registered");

        let user = record.to_user();
        let token = self.issue(&user)?;
        Ok(AuthResponse::bearer(token, user))
    }

    pub fn login(&self, request: &LoginRequest) -> Result<AuthResponse, AuthFailure> {
        if request.email.trim().is_empty() {
            return Err(AuthFailure::validation("email", "field required"));
        }
        if request.password.is_empty() {
            return Err(AuthFailure::validation("password", "field required"));
        }

        let Some(record) = self.directory.authenticate(&request.email, &request.password) else {
            debug!("Login rejected");
            return Err(AuthFailure::InvalidCredentials);
        };

        let user = record.to_user();
        let token = self.issue(&user)?;
        info!(user_id = record.id, "User logged in");
        Ok(AuthResponse::bearer(token, user))
    }

    /// Resolve a token to its user.
    pub fn verify(&self, token: &str) -> Result<User, AuthFailure> {
        let claims = self.tokens.verify(token).map_err(|e| {
            // The reason stays in the server log only
            debug!(reason = %e, "Token rejected");
            AuthFailure::InvalidToken
        })?;
        self.directory
            .find_by_id(&claims.user_id)
            .map(|record| record.to_user())
            .ok_or_else(|| {
                debug!(user_id = %claims.user_id, "Token subject no longer exists");
                AuthFailure::InvalidToken
            })
    }

    /// Bearer check for an `Authorization` header value.
    pub fn check_auth(&self, authorization: Option<&str>) -> Result<User, AuthFailure> {
        let token = authorization
            .map(str::trim)
            .and_then(|value| {
                let (scheme, token) = value.split_once(' ')?;
                scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
            })
            .filter(|token| !token.is_empty())
            .ok_or(AuthFailure::MissingToken)?;
        self.verify(token)
    }

    /// Profile of the bearer. Any credential problem reads as access denied.
    pub fn profile(&self, authorization: Option<&str>) -> Result<User, AuthFailure> {
        self.check_auth(authorization).map_err(|e| match e {
            AuthFailure::Internal(_) => e,
            _ => AuthFailure::AccessDenied,
        })
    }

    fn issue(&self, user: &User) -> Result<String, AuthFailure> {
        self.tokens.issue(user.id.clone(), &user.email).map_err(|e| {
            warn!(error = %e, "Failed to issue token");
            AuthFailure::Internal(e.to_string())
        })
    }
}

/// One `@`, non-empty local part, dotted domain, no whitespace.
fn is_plausible_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}
