//! Compact signed credentials in the JWT HS256 wire format.
//!
//! A token is `b64url(header) "." b64url(payload) "." b64url(hmac)`, where the
//! HMAC-SHA256 covers the first two segments joined by a dot. Verification is
//! stateless: the signature is checked before any payload field is read.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Fixed header, serialized in this exact field order.
const HEADER_JSON: &str = r#"{"typ":"JWT","alg":"HS256"}"#;

/// Tokens are valid for 24 hours unless configured otherwise.
const DEFAULT_TTL_HOURS: i64 = 24;

/// Length of secrets produced by `TokenService::generate_secret`.
const GENERATED_SECRET_BYTES: usize = 32;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("Signing key must not be empty")]
    InvalidKey,

    #[error("Failed to encode token payload")]
    Encoding,

    /// Non-positive lifetime, or an expiry past the representable range.
    #[error("Token lifetime out of range")]
    InvalidTtl,

    /// Bad shape, bad signature or undecodable payload.
    #[error("Malformed token")]
    Malformed,

    #[error("Token expired")]
    Expired,
}

/// Opaque user identifier: numeric ids from SQL backends, string ids elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubjectId {
    Number(i64),
    Text(String),
}

impl From<i64> for SubjectId {
    fn from(id: i64) -> Self {
        SubjectId::Number(id)
    }
}

impl From<&str> for SubjectId {
    fn from(id: &str) -> Self {
        SubjectId::Text(id.to_string())
    }
}

impl From<String> for SubjectId {
    fn from(id: String) -> Self {
        SubjectId::Text(id)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectId::Number(id) => write!(f, "{}", id),
            SubjectId::Text(id) => f.write_str(id),
        }
    }
}

/// Token payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: SubjectId,
    pub email: String,
    /// Expiry as unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl Claims {
    /// Decode the payload segment WITHOUT checking the signature.
    ///
    /// Only for client-side hints such as local expiry detection; a server must
    /// use `TokenService::verify`.
    pub fn peek(token: &str) -> Option<Claims> {
        let (_, payload, _) = split_segments(token)?;
        decode_payload(payload)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }

    /// A token expires at the exact second of `exp`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp.map(|exp| exp <= now.timestamp()).unwrap_or(false)
    }
}

/// Issues and verifies tokens with a server-held secret.
#[derive(Clone)]
pub struct TokenService {
    mac: HmacSha256,
    ttl: Duration,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, TokenError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(TokenError::InvalidKey);
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| TokenError::InvalidKey)?;
        Ok(Self {
            mac,
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
        })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Result<Self, TokenError> {
        if ttl <= Duration::zero() {
            return Err(TokenError::InvalidTtl);
        }
        self.ttl = ttl;
        Ok(self)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Random 256-bit secret, base64url encoded, for provisioning a new deployment.
    pub fn generate_secret() -> String {
        let mut bytes = [0u8; GENERATED_SECRET_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    pub fn issue(&self, subject_id: impl Into<SubjectId>, email: &str) -> Result<String, TokenError> {
        self.issue_at(subject_id, email, Utc::now())
    }

    pub fn issue_at(
        &self,
        subject_id: impl Into<SubjectId>,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or(TokenError::InvalidTtl)?;
        let claims = Claims {
            user_id: subject_id.into(),
            email: email.to_string(),
            exp: Some(expires_at.timestamp()),
        };
        let payload_json = serde_json::to_vec(&claims).map_err(|_| TokenError::Encoding)?;

        let header_part = URL_SAFE_NO_PAD.encode(HEADER_JSON);
        let payload_part = URL_SAFE_NO_PAD.encode(payload_json);
        let signature_part = URL_SAFE_NO_PAD.encode(self.sign(&header_part, &payload_part));

        Ok(format!("{}.{}.{}", header_part, payload_part, signature_part))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let (header_part, payload_part, signature_part) =
            split_segments(token).ok_or(TokenError::Malformed)?;

        let provided = URL_SAFE_NO_PAD
            .decode(signature_part)
            .map_err(|_| TokenError::Malformed)?;

        // verify_slice compares in constant time
        let mut mac = self.mac.clone();
        mac.update(header_part.as_bytes());
        mac.update(b".");
        mac.update(payload_part.as_bytes());
        mac.verify_slice(&provided)
            .map_err(|_| TokenError::Malformed)?;

        let claims = decode_payload(payload_part).ok_or(TokenError::Malformed)?;
        if claims.is_expired_at(now) {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    /// Collapses every failure into `false`.
    pub fn is_valid(&self, token: &str) -> bool {
        self.verify(token).is_ok()
    }

    fn sign(&self, header_part: &str, payload_part: &str) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(header_part.as_bytes());
        mac.update(b".");
        mac.update(payload_part.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

/// Exactly three non-empty dot-separated segments.
fn split_segments(token: &str) -> Option<(&str, &str, &str)> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None)
            if !header.is_empty() && !payload.is_empty() && !signature.is_empty() =>
        {
            Some((header, payload, signature))
        }
        _ => None,
    }
}

fn decode_payload(payload_part: &str) -> Option<Claims> {
    let bytes = URL_SAFE_NO_PAD.decode(payload_part).ok()?;
    serde_json::from_slice(&bytes).ok()
}
