//! Session-aware REST client for the reelsense backend.
//!
//! This module provides the `SessionClient`, which attaches the stored bearer
//! token to outbound calls, retries transient failures with linear backoff
//! (network errors, 5xx, 401) and clears the session when the server rejects
//! the credential.
//!
//! All failures surface as an `ApiError`; the network sits behind the
//! `Transport` trait so tests and in-process services can stand in for it.

pub mod client;
pub mod error;
pub mod request;
pub mod transport;

pub use client::{ApiResponse, ResponseBody, RetryPolicy, SessionClient};
pub use error::{ApiError, ErrorKind};
pub use request::{ApiRequest, MultipartPart, PartData, RequestBody};
pub use transport::{HttpBody, HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
