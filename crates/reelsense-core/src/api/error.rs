use serde_json::Value;
use thiserror::Error;

/// Shown for a 401 when the server gives no message of its own.
pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired, please sign in again";

/// Fallback when a 400/422 body carries nothing readable.
const VALIDATION_FALLBACK_MESSAGE: &str = "Validation failed";

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Maximum length of body excerpts in parse errors
const MAX_PARSE_EXCERPT_LENGTH: usize = 100;

/// Every failure a `SessionClient` call can end in.
///
/// `status()` is the HTTP status of the last response, or 0 when none arrived.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Validation error: {message}")]
    Validation {
        status: u16,
        message: String,
        details: Value,
    },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Invalid response: {message}")]
    Parse { status: u16, message: String },

    #[error("{message}")]
    Unknown { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Unauthorized,
    Validation,
    Http,
    Server,
    Parse,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Validation => "validation",
            ErrorKind::Http => "http",
            ErrorKind::Server => "server",
            ErrorKind::Parse => "parse",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl ApiError {
    pub fn network(message: impl Into<String>) -> Self {
        ApiError::Network {
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        ApiError::Unknown {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Network { .. } => ErrorKind::Network,
            ApiError::Unauthorized { .. } => ErrorKind::Unauthorized,
            ApiError::Validation { .. } => ErrorKind::Validation,
            ApiError::Http { .. } => ErrorKind::Http,
            ApiError::Server { .. } => ErrorKind::Server,
            ApiError::Parse { .. } => ErrorKind::Parse,
            ApiError::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            ApiError::Network { .. } | ApiError::Unknown { .. } => 0,
            ApiError::Unauthorized { .. } => 401,
            ApiError::Validation { status, .. }
            | ApiError::Http { status, .. }
            | ApiError::Server { status, .. }
            | ApiError::Parse { status, .. } => *status,
        }
    }

    /// Human-readable message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            ApiError::Network { message }
            | ApiError::Unauthorized { message }
            | ApiError::Validation { message, .. }
            | ApiError::Http { message, .. }
            | ApiError::Server { message, .. }
            | ApiError::Parse { message, .. }
            | ApiError::Unknown { message } => message,
        }
    }

    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Classify a non-2xx response.
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        let raw = String::from_utf8_lossy(body);
        let data: Option<Value> = serde_json::from_str(&raw).ok();
        let message = error_message(data.as_ref(), &raw);

        match status {
            401 => ApiError::Unauthorized {
                message: message.unwrap_or_else(|| SESSION_EXPIRED_MESSAGE.to_string()),
            },
            400 | 422 if !raw.trim().is_empty() => {
                let details = match &data {
                    Some(Value::Object(map)) => map
                        .get("detail")
                        .cloned()
                        .unwrap_or_else(|| Value::Object(map.clone())),
                    Some(other) => other.clone(),
                    None => Value::String(Self::truncate_body(raw.trim())),
                };
                ApiError::Validation {
                    status,
                    message: message.unwrap_or_else(|| VALIDATION_FALLBACK_MESSAGE.to_string()),
                    details,
                }
            }
            500..=599 => ApiError::Server {
                status,
                message: message.unwrap_or_else(|| format!("Server error: {}", status)),
            },
            _ => ApiError::Http {
                status,
                message: message.unwrap_or_else(|| format!("Request failed with status {}", status)),
            },
        }
    }

    /// A 2xx body that is neither empty, binary nor JSON.
    pub fn unparseable(status: u16, text: &str) -> Self {
        let trimmed = text.trim_start();
        let lower = trimmed.get(..15).unwrap_or(trimmed).to_ascii_lowercase();
        let message = if lower.starts_with("<!doctype") || lower.starts_with("<html") {
            "Server returned an HTML page; check the API URL".to_string()
        } else {
            let excerpt: String = trimmed.chars().take(MAX_PARSE_EXCERPT_LENGTH).collect();
            format!("Unexpected response body: {}", excerpt)
        };
        ApiError::Parse { status, message }
    }
}

/// Pull a readable message out of any error envelope the backends produce.
///
/// Precedence: `detail` array > `detail` string > `detail` object > `message`
/// > `error` > a bare string body.
pub fn error_message(data: Option<&Value>, raw: &str) -> Option<String> {
    match data {
        Some(Value::Object(map)) => {
            match map.get("detail") {
                Some(Value::Array(items)) if !items.is_empty() => {
                    let parts: Vec<String> = items.iter().map(format_detail_item).collect();
                    return Some(parts.join(", "));
                }
                Some(Value::String(detail)) if !detail.is_empty() => {
                    return Some(detail.clone());
                }
                Some(Value::Object(detail)) => {
                    let text = ["message", "msg"]
                        .iter()
                        .find_map(|key| detail.get(*key).and_then(Value::as_str))
                        .map(str::to_string)
                        .unwrap_or_else(|| Value::Object(detail.clone()).to_string());
                    return Some(text);
                }
                _ => {}
            }
            ["message", "error"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        }
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(_) => None,
        None => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(ApiError::truncate_body(trimmed))
            }
        }
    }
}

/// `{"loc":["body","email"],"msg":"invalid"}` renders as `email: invalid`.
fn format_detail_item(item: &Value) -> String {
    let Value::Object(map) = item else {
        return match item {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
    };

    let msg = map
        .get("msg")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| item.to_string());

    let field = match map.get("loc") {
        Some(Value::Array(loc)) => loc
            .iter()
            .skip(1)
            .map(|segment| match segment {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("."),
        _ => "unknown".to_string(),
    };

    if field.is_empty() {
        msg
    } else {
        format!("{}: {}", field, msg)
    }
}
