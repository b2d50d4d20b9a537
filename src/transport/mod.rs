//! Transport collaborator interface.
//!
//! The core never speaks HTTP itself: it hands a fully formed
//! [`TransportRequest`] to a [`Transport`] and classifies the
//! [`TransportResponse`] it gets back. `http.rs` provides the reqwest-backed
//! implementation used by the binary.

pub mod http;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ClientError, ClientResult};

pub use http::HttpTransport;

/// Request method understood by the backend API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        };
        f.write_str(s)
    }
}

/// A fully formed outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    /// Path relative to the transport's base URL, including any query.
    pub endpoint: String,
    pub method: Method,
    pub payload: Option<Value>,
    /// Header names are lower-case.
    pub headers: BTreeMap<String, String>,
}

impl TransportRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            payload: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Get, endpoint)
    }

    pub fn post(endpoint: impl Into<String>, payload: Value) -> Self {
        Self::new(Method::Post, endpoint).with_payload(payload)
    }

    pub fn put(endpoint: impl Into<String>, payload: Value) -> Self {
        Self::new(Method::Put, endpoint).with_payload(payload)
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }
}

/// What came back from the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    /// Parsed JSON body; `Null` when empty, a string when not JSON.
    pub body: Value,
    /// Header names are lower-case, values verbatim.
    pub headers: BTreeMap<String, String>,
}

impl TransportResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn etag(&self) -> Option<&str> {
        self.header("etag")
    }

    /// `Retry-After` in milliseconds (delta-seconds form only).
    pub fn retry_after_ms(&self) -> Option<u64> {
        let raw = self.header("retry-after")?.trim();
        raw.parse::<f64>()
            .ok()
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(|secs| (secs * 1000.0).round() as u64)
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Map a non-success status onto the error taxonomy.
    ///
    /// 429 is throttling, 5xx is backend failure, anything else in 4xx is a
    /// domain-level rejection of the call. 401 is handled by the session
    /// layer before this is consulted.
    pub fn error_for_status(&self) -> Option<ClientError> {
        match self.status {
            200..=299 | 304 => None,
            401 => Some(ClientError::Authentication("session token rejected".to_string())),
            429 => Some(ClientError::RateLimited {
                retry_after_ms: self.retry_after_ms(),
            }),
            500..=599 => Some(ClientError::Backend {
                status: self.status,
                message: self.error_message(),
            }),
            status => Some(ClientError::ContractCall {
                status,
                message: self.error_message(),
            }),
        }
    }

    /// Non-success responses become errors; success passes through.
    pub fn into_result(self) -> ClientResult<TransportResponse> {
        match self.error_for_status() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }

    fn error_message(&self) -> String {
        match &self.body {
            Value::Object(map) => map
                .get("error")
                .or_else(|| map.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| self.body.to_string()),
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Performs the actual network call.
///
/// Implementations report network-level failure as `ClientError::Network`
/// and must surface `retry-after` and `etag` headers verbatim.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> ClientResult<TransportResponse>;
}

/// Listing variants for content directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMode {
    Shallow,
    Recursive,
    Metadata,
}

impl ListMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListMode::Shallow => "shallow",
            ListMode::Recursive => "recursive",
            ListMode::Metadata => "metadata",
        }
    }
}

/// Backend API routes.
pub mod endpoints {
    use super::ListMode;

    pub const AUTH_CHALLENGE: &str = "/auth/challenge";
    pub const AUTH_VERIFY: &str = "/auth/verify";

    pub fn contract_call(target: &str) -> String {
        format!("/contracts/{}/call", target)
    }

    pub fn content(path: &str) -> String {
        format!("/content/{}", path.trim_start_matches('/'))
    }

    pub fn content_listing(path: &str, mode: ListMode) -> String {
        format!("{}?list={}", content(path), mode.as_str())
    }
}
