//! In-process transport that routes client requests straight to an
//! `AuthService`, without a socket in between.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{header, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::api::{HttpBody, HttpRequest, HttpResponse, Transport, TransportError};

use super::service::{AuthFailure, AuthService};

#[derive(Deserialize)]
struct VerifyRequest {
    token: String,
}

#[derive(Clone)]
pub struct LocalTransport {
    service: Arc<AuthService>,
}

impl LocalTransport {
    pub fn new(service: Arc<AuthService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<AuthService> {
        &self.service
    }

    /// Dispatch one request. Never fails; errors become status codes.
    pub fn handle(&self, request: &HttpRequest) -> HttpResponse {
        let path = request.path().trim_end_matches('/');
        debug!(method = %request.method, path, "Routing local request");

        let result = match (&request.method, path) {
            (&Method::POST, "/auth/register") => body::<crate::models::RegisterRequest>(request)
                .and_then(|req| self.service.register(&req).map_err(Rejection::Auth))
                .map(|auth| (201, to_value(&auth))),
            (&Method::POST, "/auth/login") => body::<crate::models::LoginRequest>(request)
                .and_then(|req| self.service.login(&req).map_err(Rejection::Auth))
                .map(|auth| (200, to_value(&auth))),
            (&Method::POST, "/auth/verify") => body::<VerifyRequest>(request)
                .and_then(|req| self.service.verify(&req.token).map_err(Rejection::Auth))
                .map(|user| (200, json!({"success": true, "user": user}))),
            (&Method::GET, "/auth/profile") => self
                .service
                .profile(request.header(header::AUTHORIZATION.as_str()))
                .map_err(Rejection::Auth)
                .map(|user| (200, json!({"success": true, "user": user}))),
            (&Method::GET, "/users/me") => self
                .service
                .check_auth(request.header(header::AUTHORIZATION.as_str()))
                .map_err(Rejection::Auth)
                .map(|user| (200, to_value(&user))),
            (_, "/auth/register" | "/auth/login" | "/auth/verify" | "/auth/profile" | "/users/me") => {
                Err(Rejection::MethodNotAllowed)
            }
            _ => Err(Rejection::NotFound),
        };

        match result {
            Ok((status, value)) => HttpResponse::json(status, &value),
            Err(rejection) => {
                let (status, value) = rejection.into_parts();
                HttpResponse::json(status, &value)
            }
        }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        Ok(self.handle(&request))
    }
}

enum Rejection {
    Auth(AuthFailure),
    BadBody(String),
    MethodNotAllowed,
    NotFound,
}

impl Rejection {
    fn into_parts(self) -> (u16, Value) {
        match self {
            Rejection::Auth(failure) => (failure.status(), failure.envelope()),
            Rejection::BadBody(msg) => (
                422,
                json!({"detail": [{"loc": ["body"], "msg": msg, "type": "value_error.jsondecode"}]}),
            ),
            Rejection::MethodNotAllowed => (405, json!({"success": false, "message": "Method not supported"})),
            Rejection::NotFound => (404, json!({"detail": "Not Found"})),
        }
    }
}

fn body<T: DeserializeOwned>(request: &HttpRequest) -> Result<T, Rejection> {
    let bytes: &[u8] = match &request.body {
        Some(HttpBody::Bytes(bytes)) => bytes.as_slice(),
        Some(HttpBody::Multipart(_)) => return Err(Rejection::BadBody("Expected a JSON body".to_string())),
        None => &[],
    };
    serde_json::from_slice(bytes).map_err(|e| Rejection::BadBody(e.to_string()))
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
