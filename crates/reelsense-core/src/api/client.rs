//! Session-aware HTTP client.
//!
//! `SessionClient` attaches the stored bearer token to every call, retries
//! transient failures with linear backoff, clears the session on 401 and
//! normalizes every failure into an `ApiError`.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::SessionStore;
use crate::config::Config;
use crate::models::{AuthResponse, LoginRequest, RegisterRequest, Role, User};

use super::request::{has_header, ApiRequest, MultipartPart, RequestBody};
use super::transport::{HttpBody, HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds, applied to each attempt.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Backoff unit in milliseconds; attempt `n` waits `(n + 1)` units.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;

/// Content types handed to the caller as raw bytes.
const BINARY_CONTENT_TYPES: [&str; 7] = [
    "application/octet-stream",
    "application/pdf",
    "application/zip",
    "video/",
    "audio/",
    "image/",
    "multipart/",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Wait before retry `attempt + 1`: `base_delay * (attempt + 1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.saturating_add(1))
    }

    /// Upper bound on how long one `execute` call can stay pending:
    /// every backoff plus a full timeout for each of the `max_retries + 1` attempts.
    pub fn worst_case_latency(&self, timeout: Duration) -> Duration {
        let waits: Duration = (0..self.max_retries).map(|n| self.backoff(n)).sum();
        waits.saturating_add(timeout.saturating_mul(self.max_retries.saturating_add(1)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// 204 or an empty body.
    Empty,
    Json(Value),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: ResponseBody,
    /// Retries performed before this response, i.e. backoff waits taken.
    pub retries: u32,
}

impl ApiResponse {
    /// Decode a JSON body. An empty body decodes as JSON `null`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        let value = match &self.body {
            ResponseBody::Empty => Value::Null,
            ResponseBody::Json(value) => value.clone(),
            ResponseBody::Binary(_) => {
                return Err(ApiError::Parse {
                    status: self.status,
                    message: "Expected JSON but received binary content".to_string(),
                })
            }
        };
        serde_json::from_value(value).map_err(|e| ApiError::Parse {
            status: self.status,
            message: format!("Unexpected response shape: {}", e),
        })
    }
}

/// How one attempt ended.
enum Attempt {
    Finished(Result<ApiResponse, ApiError>),
    Retryable(ApiError),
}

/// Session-aware API client.
/// Clone is cheap - transport and session are shared.
#[derive(Clone)]
pub struct SessionClient {
    base_url: String,
    transport: Arc<dyn Transport>,
    session: Arc<dyn SessionStore>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl SessionClient {
    /// Create a client backed by reqwest.
    pub fn new(base_url: impl Into<String>, session: Arc<dyn SessionStore>) -> Result<Self, ApiError> {
        let transport = ReqwestTransport::new()
            .map_err(|e| ApiError::unknown(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_transport(base_url, Arc::new(transport), session))
    }

    pub fn with_transport(
        base_url: impl Into<String>,
        transport: Arc<dyn Transport>,
        session: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            transport,
            session,
            policy: RetryPolicy::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn from_config(config: &Config, session: Arc<dyn SessionStore>) -> Result<Self, ApiError> {
        Ok(Self::new(config.api_url(), session)?
            .with_retry_policy(config.retry_policy())
            .with_timeout(config.request_timeout()))
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<dyn SessionStore> {
        &self.session
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Add `Authorization: Bearer <token>` when the request is authenticated
    /// and a live token is stored. A locally expired token is cleared instead.
    pub fn attach_credential(&self, mut request: ApiRequest) -> ApiRequest {
        if !request.authenticated {
            return request;
        }
        request
            .headers
            .retain(|(name, _)| !name.eq_ignore_ascii_case(header::AUTHORIZATION.as_str()));
        if let Some(token) = self.session.current_token() {
            request
                .headers
                .push((header::AUTHORIZATION.to_string(), format!("Bearer {}", token)));
        }
        request
    }

    fn prepare(&self, request: &ApiRequest) -> HttpRequest {
        let request = self.attach_credential(request.clone());
        let mut headers = request.headers;

        if !has_header(&headers, header::ACCEPT.as_str()) {
            headers.push((header::ACCEPT.to_string(), "application/json".to_string()));
        }

        let body = match request.body {
            RequestBody::Empty => None,
            RequestBody::Json(value) => {
                if !has_header(&headers, header::CONTENT_TYPE.as_str()) {
                    headers.push((header::CONTENT_TYPE.to_string(), "application/json".to_string()));
                }
                Some(HttpBody::Bytes(value.to_string().into_bytes()))
            }
            RequestBody::Bytes { content_type, data } => {
                if !has_header(&headers, header::CONTENT_TYPE.as_str()) {
                    headers.push((header::CONTENT_TYPE.to_string(), content_type));
                }
                Some(HttpBody::Bytes(data))
            }
            // The boundary-carrying content type comes from the transport
            RequestBody::Multipart(parts) => Some(HttpBody::Multipart(parts)),
        };

        let path = if request.path.starts_with('/') {
            request.path
        } else {
            format!("/{}", request.path)
        };

        HttpRequest {
            method: request.method,
            url: format!("{}{}", self.base_url, path),
            headers,
            body,
        }
    }

    /// Send a request, retrying network failures, 5xx and 401 up to the
    /// policy's cap. Each retry waits `backoff(n)` while the call stays pending.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let timeout = request.timeout.unwrap_or(self.timeout);
        let max_retries = if request.retry { self.policy.max_retries } else { 0 };
        let mut attempt: u32 = 0;

        loop {
            let outbound = self.prepare(&request);
            debug!(method = %outbound.method, url = %outbound.url, attempt = attempt + 1, "Sending request");

            let failure = match tokio::time::timeout(timeout, self.transport.send(outbound)).await {
                Err(_) => ApiError::network(format!("Request timed out after {}ms", timeout.as_millis())),
                Ok(Err(TransportError::Request(message))) => {
                    warn!(path = %request.path, error = %message, "Request could not be built");
                    return Err(ApiError::unknown(message));
                }
                Ok(Err(e)) => ApiError::network(e.to_string()),
                Ok(Ok(response)) => match self.classify(response, attempt) {
                    Attempt::Finished(result) => return result,
                    Attempt::Retryable(err) => err,
                },
            };

            if attempt >= max_retries {
                warn!(path = %request.path, attempts = attempt + 1, kind = failure.kind().as_str(), "Request failed");
                return Err(failure);
            }

            let delay = self.policy.backoff(attempt);
            warn!(
                path = %request.path,
                retry = attempt + 1,
                backoff = ?delay,
                kind = failure.kind().as_str(),
                "Request failed, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn classify(&self, response: HttpResponse, attempt: u32) -> Attempt {
        let status = response.status;
        match status {
            200..=299 => Attempt::Finished(
                decode_body(&response).map(|body| ApiResponse {
                    status,
                    body,
                    retries: attempt,
                }),
            ),
            401 => {
                // Idempotent: concurrent calls may clear the same session
                if let Err(e) = self.session.clear() {
                    warn!(error = %e, "Failed to clear session after 401");
                }
                info!("Server rejected credential, session cleared");
                Attempt::Retryable(ApiError::from_status(status, &response.body))
            }
            500..=599 => Attempt::Retryable(ApiError::from_status(status, &response.body)),
            _ => Attempt::Finished(Err(ApiError::from_status(status, &response.body))),
        }
    }

    // ===== Auth Endpoints =====

    /// POST /auth/login; stores the returned token.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let body = LoginRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        let request = ApiRequest::post("/auth/login")
            .json(to_json(&body)?)
            .unauthenticated();
        let auth: AuthResponse = self.execute(request).await?.json()?;

        match auth.access_token.as_deref() {
            Some(token) if !token.is_empty() => {
                self.store_token(token)?;
                info!("Logged in, session stored");
            }
            _ => warn!("Login response carried no access token"),
        }
        Ok(auth)
    }

    /// POST /auth/register. Backends answer either with a bare user or with
    /// `{access_token, user}`; a returned token is stored.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        role: Option<Role>,
    ) -> Result<AuthResponse, ApiError> {
        let body = RegisterRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
            role,
        };
        let request = ApiRequest::post("/auth/register")
            .json(to_json(&body)?)
            .unauthenticated();
        let response = self.execute(request).await?;

        let auth = match &response.body {
            ResponseBody::Json(value) if value.get("email").is_some() && value.get("user").is_none() => {
                AuthResponse {
                    user: Some(response.json::<User>()?),
                    ..AuthResponse::default()
                }
            }
            _ => response.json::<AuthResponse>()?,
        };

        if let Some(token) = auth.access_token.as_deref().filter(|t| !t.is_empty()) {
            self.store_token(token)?;
            info!("Registered, session stored");
        }
        Ok(auth)
    }

    /// GET /users/me. Accepts a bare user or a `{user}` envelope.
    pub async fn current_user(&self) -> Result<User, ApiError> {
        let response = self.execute(ApiRequest::get("/users/me")).await?;
        match &response.body {
            ResponseBody::Json(Value::Object(map)) if map.contains_key("user") => {
                let user = map.get("user").cloned().unwrap_or(Value::Null);
                serde_json::from_value(user).map_err(|e| ApiError::Parse {
                    status: response.status,
                    message: format!("Unexpected response shape: {}", e),
                })
            }
            _ => response.json(),
        }
    }

    pub fn logout(&self) -> Result<(), ApiError> {
        self.session
            .clear()
            .map_err(|e| ApiError::unknown(format!("Failed to clear session: {}", e)))?;
        info!("Logged out");
        Ok(())
    }

    fn store_token(&self, token: &str) -> Result<(), ApiError> {
        self.session
            .set(token)
            .map_err(|e| ApiError::unknown(format!("Failed to store session: {}", e)))
    }

    // ===== Typed Helpers =====

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute(ApiRequest::get(path)).await?.json()
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        self.execute(ApiRequest::post(path).json(to_json(body)?))
            .await?
            .json()
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        self.execute(ApiRequest::put(path).json(to_json(body)?))
            .await?
            .json()
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(ApiRequest::delete(path)).await?;
        Ok(())
    }

    /// POST a multipart form, e.g. a video file plus its name.
    pub async fn upload<T: DeserializeOwned>(&self, path: &str, parts: Vec<MultipartPart>) -> Result<T, ApiError> {
        self.execute(ApiRequest::post(path).multipart(parts))
            .await?
            .json()
    }

    /// GET a binary resource.
    pub async fn download(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        let request = ApiRequest::get(path).header(header::ACCEPT.as_str(), "*/*");
        let response = self.execute(request).await?;
        match response.body {
            ResponseBody::Binary(bytes) => Ok(bytes),
            ResponseBody::Empty => Ok(Vec::new()),
            ResponseBody::Json(_) => Err(ApiError::Parse {
                status: response.status,
                message: "Expected binary content but received JSON".to_string(),
            }),
        }
    }
}

fn to_json<B: Serialize>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body).map_err(|e| ApiError::unknown(format!("Failed to encode request body: {}", e)))
}

fn is_binary_content_type(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    BINARY_CONTENT_TYPES.iter().any(|prefix| lower.starts_with(prefix))
}

/// Decode a 2xx body: empty, opaque binary, or JSON. Anything else is a parse failure.
fn decode_body(response: &HttpResponse) -> Result<ResponseBody, ApiError> {
    if response.status == 204 || response.status == 205 {
        return Ok(ResponseBody::Empty);
    }
    if let Some(content_type) = response.content_type.as_deref() {
        if is_binary_content_type(content_type) {
            return Ok(ResponseBody::Binary(response.body.clone()));
        }
    }

    let text = std::str::from_utf8(&response.body).map_err(|_| ApiError::Parse {
        status: response.status,
        message: "Response body is not valid UTF-8".to_string(),
    })?;
    if text.trim().is_empty() {
        return Ok(ResponseBody::Empty);
    }
    serde_json::from_str(text)
        .map(ResponseBody::Json)
        .map_err(|_| ApiError::unparseable(response.status, text))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::api::error::ErrorKind;
    use crate::api::PartData;
    use crate::auth::{Session, TokenService};

    enum Step {
        Respond(HttpResponse),
        Refuse,
        Unbuildable,
        Hang,
    }

    /// Plays back a fixed script and records what was sent.
    #[derive(Default)]
    struct ScriptedTransport {
        steps: Mutex<VecDeque<Step>>,
        sent: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<HttpRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.sent.lock().unwrap().push(request);
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Respond(response)) => Ok(response),
                Some(Step::Refuse) => Err(TransportError::Connect("connection refused".to_string())),
                Some(Step::Unbuildable) => Err(TransportError::Request("invalid header value".to_string())),
                Some(Step::Hang) => std::future::pending().await,
                None => panic!("transport script exhausted"),
            }
        }
    }

    fn json_response(status: u16, body: Value) -> Step {
        Step::Respond(HttpResponse::json(status, &body))
    }

    fn client(transport: Arc<ScriptedTransport>) -> (SessionClient, Arc<Session>) {
        let session = Arc::new(Session::in_memory());
        let client = SessionClient::with_transport("http://api.test/", transport, session.clone());
        (client, session)
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_then_success() {
        let transport = ScriptedTransport::new(vec![
            json_response(500, json!({"detail": "boom"})),
            json_response(500, json!({"detail": "boom"})),
            json_response(200, json!({"ok": true})),
        ]);
        let (client, _) = client(transport.clone());

        let started = tokio::time::Instant::now();
        let response = client.execute(ApiRequest::get("/video/")).await.expect("success");

        assert_eq!(response.status, 200);
        assert_eq!(response.body, ResponseBody::Json(json!({"ok": true})));
        assert_eq!(response.retries, 2);
        assert_eq!(transport.sent().len(), 3);
        // backoff(0) + backoff(1) = 1000ms + 2000ms
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_exhausts_retries() {
        let transport = ScriptedTransport::new(vec![
            json_response(502, json!({})),
            json_response(503, json!({})),
            json_response(500, json!({"message": "still down"})),
        ]);
        let (client, _) = client(transport.clone());

        let err = client.execute(ApiRequest::get("/video/")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Server);
        assert_eq!(err.status(), 500);
        assert_eq!(err.message(), "still down");
        assert_eq!(transport.sent().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_clears_session_then_retries() {
        let transport = ScriptedTransport::new(vec![
            json_response(401, json!({"success": false, "message": "Invalid token"})),
            json_response(200, json!({"id": 1, "email": "a@b.com"})),
        ]);
        let (client, session) = client(transport.clone());
        session.set("stale").unwrap();

        let response = client.execute(ApiRequest::get("/users/me")).await.expect("retried");
        assert_eq!(response.retries, 1);
        assert_eq!(session.get(), None);

        let sent = transport.sent();
        assert_eq!(sent[0].header("authorization"), Some("Bearer stale"));
        // The retry goes out without the cleared credential
        assert_eq!(sent[1].header("authorization"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_after_retries_exhausted() {
        let transport = ScriptedTransport::new(vec![
            json_response(401, json!({})),
            json_response(401, json!({})),
            json_response(401, json!({})),
        ]);
        let (client, session) = client(transport.clone());
        session.set("T").unwrap();

        let err = client.execute(ApiRequest::get("/users/me")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(err.status(), 401);
        assert_eq!(session.get(), None);
        assert_eq!(transport.sent().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_without_retry() {
        let transport = ScriptedTransport::new(vec![json_response(401, json!({}))]);
        let (client, session) = client(transport.clone());
        session.set("T").unwrap();

        let err = client
            .execute(ApiRequest::get("/users/me").no_retry())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert!(!session.is_authenticated());
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_are_not_retried() {
        for status in [400, 403, 404, 409, 422, 429] {
            let transport = ScriptedTransport::new(vec![json_response(status, json!({"detail": "nope"}))]);
            let (client, session) = client(transport.clone());
            session.set("T").unwrap();

            let err = client.execute(ApiRequest::get("/video/1")).await.unwrap_err();
            assert_eq!(err.status(), status);
            assert_eq!(transport.sent().len(), 1, "status {}", status);
            assert!(session.is_authenticated(), "status {} cleared the session", status);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_error_message() {
        let transport = ScriptedTransport::new(vec![json_response(
            422,
            json!({"detail": [{"loc": ["body", "email"], "msg": "invalid"}]}),
        )]);
        let (client, _) = client(transport);

        let err = client.register("bad", "secret1", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.message().contains("email: invalid"), "{}", err.message());
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failure_retries_then_fails() {
        let transport = ScriptedTransport::new(vec![Step::Refuse, Step::Refuse, Step::Refuse]);
        let (client, _) = client(transport.clone());

        let started = tokio::time::Instant::now();
        let err = client.execute(ApiRequest::get("/video/")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(err.status(), 0);
        assert_eq!(transport.sent().len(), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbuildable_request_fails_without_retry() {
        let transport = ScriptedTransport::new(vec![Step::Unbuildable, json_response(200, json!({}))]);
        let (client, _) = client(transport.clone());

        let started = tokio::time::Instant::now();
        let err = client.execute(ApiRequest::get("/video/")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(err.status(), 0);
        assert!(err.message().contains("invalid header value"), "{}", err.message());
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_header_through_reqwest_is_not_a_network_failure() {
        let session = Arc::new(Session::in_memory());
        let client = SessionClient::new("http://127.0.0.1:9", session).expect("client");

        let started = tokio::time::Instant::now();
        let err = client
            .execute(ApiRequest::get("/video/").header("X-Bad", "a\nb"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_network_failure() {
        let transport = ScriptedTransport::new(vec![
            Step::Hang,
            json_response(200, json!([])),
        ]);
        let (client, _) = client(transport.clone());

        let started = tokio::time::Instant::now();
        let response = client
            .execute(ApiRequest::get("/video/").timeout(Duration::from_secs(5)))
            .await
            .expect("second attempt succeeds");
        assert_eq!(response.retries, 1);
        assert_eq!(started.elapsed(), Duration::from_millis(5000 + 1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_stays_within_documented_bound() {
        let transport = ScriptedTransport::new(vec![Step::Hang, Step::Hang, Step::Hang]);
        let (client, _) = client(transport);
        let timeout = Duration::from_secs(30);

        let started = tokio::time::Instant::now();
        let err = client.execute(ApiRequest::get("/video/")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);

        let bound = client.retry_policy().worst_case_latency(timeout);
        assert_eq!(bound, Duration::from_millis(1000 + 2000 + 3 * 30_000));
        assert_eq!(started.elapsed(), bound);
    }

    #[test]
    fn test_backoff_is_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(1000));
        assert_eq!(policy.backoff(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff(2), Duration::from_millis(3000));
        assert_eq!(RetryPolicy::none().worst_case_latency(Duration::from_secs(30)), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_stores_token_without_retries() {
        let transport = ScriptedTransport::new(vec![json_response(
            200,
            json!({"access_token": "T", "user": {"id": 1, "email": "a@b.com"}}),
        )]);
        let (client, session) = client(transport.clone());

        let auth = client.login("a@b.com", "secret1").await.expect("login");
        assert_eq!(auth.access_token.as_deref(), Some("T"));
        assert_eq!(session.get().as_deref(), Some("T"));

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].url, "http://api.test/auth/login");
        assert_eq!(sent[0].header("authorization"), None);
        assert_eq!(sent[0].header("content-type"), Some("application/json"));
        let Some(HttpBody::Bytes(body)) = &sent[0].body else {
            panic!("expected JSON body");
        };
        let body: Value = serde_json::from_slice(body).unwrap();
        assert_eq!(body, json!({"email": "a@b.com", "password": "secret1"}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_accepts_bare_user() {
        let transport = ScriptedTransport::new(vec![json_response(
            201,
            json!({"id": 3, "email": "n@b.com", "role": "admin"}),
        )]);
        let (client, session) = client(transport.clone());

        let auth = client.register(" n@b.com ", "secret1", Some(Role::Admin)).await.expect("register");
        let user = auth.user.expect("user");
        assert_eq!(user.email, "n@b.com");
        assert_eq!(user.role, Role::Admin);
        assert!(auth.access_token.is_none());
        assert!(!session.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attaches_bearer_and_never_forces_json_on_multipart() {
        let transport = ScriptedTransport::new(vec![json_response(201, json!({"id": 9}))]);
        let (client, session) = client(transport.clone());
        session.set("T").unwrap();

        let parts = vec![
            MultipartPart::file("file", "clip.mp4", Some("video/mp4".to_string()), vec![0, 1, 2]),
            MultipartPart::text("name", "clip"),
        ];
        let created: Value = client.upload("/video/", parts).await.expect("upload");
        assert_eq!(created, json!({"id": 9}));

        let sent = transport.sent();
        assert_eq!(sent[0].header("authorization"), Some("Bearer T"));
        assert_eq!(sent[0].header("content-type"), None);
        let Some(HttpBody::Multipart(parts)) = &sent[0].body else {
            panic!("expected multipart body");
        };
        assert!(matches!(parts[1].data, PartData::Text(ref v) if v == "clip"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_binary_body_keeps_its_content_type() {
        let transport = ScriptedTransport::new(vec![json_response(201, json!({"id": 2}))]);
        let (client, session) = client(transport.clone());
        session.set("T").unwrap();

        let request = ApiRequest::post("/video/raw").bytes("video/mp4", vec![0, 0, 0, 0x18]);
        client.execute(request).await.expect("uploaded");

        let sent = transport.sent();
        let content_types: Vec<_> = sent[0]
            .headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(content_types, vec!["video/mp4"]);
        assert_eq!(sent[0].header("authorization"), Some("Bearer T"));
        let Some(HttpBody::Bytes(body)) = &sent[0].body else {
            panic!("expected raw body");
        };
        assert_eq!(body, &vec![0, 0, 0, 0x18]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_content_type_is_kept() {
        let transport = ScriptedTransport::new(vec![Step::Respond(HttpResponse::empty(204))]);
        let (client, _) = client(transport.clone());

        let request = ApiRequest::put("/video/1")
            .json(json!({"name": "x"}))
            .header("Content-Type", "application/merge-patch+json");
        let response = client.execute(request).await.expect("no content");
        assert_eq!(response.body, ResponseBody::Empty);

        let sent = transport.sent();
        let content_types: Vec<_> = sent[0]
            .headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case("content-type"))
            .collect();
        assert_eq!(content_types.len(), 1);
        assert_eq!(content_types[0].1, "application/merge-patch+json");
    }

    #[tokio::test(start_paused = true)]
    async fn test_locally_expired_token_is_not_sent() {
        let tokens = TokenService::new("k").unwrap();
        let expired = tokens
            .issue_at(1, "a@b.com", chrono::Utc::now() - chrono::Duration::hours(30))
            .unwrap();
        let transport = ScriptedTransport::new(vec![json_response(200, json!({}))]);
        let (client, session) = client(transport.clone());
        session.set(&expired).unwrap();

        client.execute(ApiRequest::get("/video/")).await.expect("sent");
        assert_eq!(transport.sent()[0].header("authorization"), None);
        assert!(!session.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_body_decoding() {
        let transport = ScriptedTransport::new(vec![
            Step::Respond(HttpResponse {
                status: 200,
                content_type: Some("application/octet-stream".to_string()),
                body: vec![0xff, 0x00, 0x10],
            }),
            Step::Respond(HttpResponse {
                status: 200,
                content_type: Some("application/json".to_string()),
                body: Vec::new(),
            }),
            Step::Respond(HttpResponse {
                status: 200,
                content_type: Some("text/html".to_string()),
                body: b"<!DOCTYPE html><html></html>".to_vec(),
            }),
        ]);
        let (client, _) = client(transport.clone());

        let bytes = client.download("/video/file/1").await.expect("binary");
        assert_eq!(bytes, vec![0xff, 0x00, 0x10]);
        assert_eq!(transport.sent()[0].header("accept"), Some("*/*"));

        let response = client.execute(ApiRequest::delete("/video/1")).await.expect("empty");
        assert_eq!(response.body, ResponseBody::Empty);

        // Malformed success bodies are not retried
        let err = client.execute(ApiRequest::get("/video/")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(err.status(), 200);
        assert_eq!(transport.sent().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_user_accepts_envelope() {
        let transport = ScriptedTransport::new(vec![
            json_response(200, json!({"success": true, "user": {"id": "4", "email": "e@b.com"}})),
            json_response(200, json!({"id": 4, "email": "e@b.com", "role": "user"})),
        ]);
        let (client, _) = client(transport);

        assert_eq!(client.current_user().await.unwrap().email, "e@b.com");
        assert_eq!(client.current_user().await.unwrap().email, "e@b.com");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_unauthorized_clears_are_harmless() {
        let transport = ScriptedTransport::new(vec![
            json_response(401, json!({})),
            json_response(401, json!({})),
            json_response(401, json!({})),
        ]);
        let (client, session) = client(transport);
        let client = client.with_retry_policy(RetryPolicy::none());
        session.set("T").unwrap();

        let calls = (0..3).map(|_| client.execute(ApiRequest::get("/users/me")));
        let results = futures::future::join_all(calls).await;

        assert!(results
            .iter()
            .all(|r| matches!(r, Err(e) if e.kind() == ErrorKind::Unauthorized)));
        assert_eq!(session.get(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_clears_session() {
        let transport = ScriptedTransport::new(vec![]);
        let (client, session) = client(transport);
        session.set("T").unwrap();
        client.logout().unwrap();
        client.logout().unwrap();
        assert!(!session.is_authenticated());
    }
}
