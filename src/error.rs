//! Error taxonomy for the client control plane.
//!
//! Every failure that crosses a public entry point is a [`ClientError`].
//! Classification helpers decide whether an error is retried locally and
//! whether it counts against the circuit breaker of the call type.

use serde::Serialize;
use std::any::Any;
use thiserror::Error;

use crate::schema::Violation;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Challenge or signature rejected, or no wallet available.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Backend signaled throttling.
    #[error("rate limited by backend{}", fmt_retry_after(.retry_after_ms))]
    RateLimited { retry_after_ms: Option<u64> },

    /// Breaker for this call type is not admitting calls.
    #[error("circuit '{key}' is open, retry in {remaining_ms} ms")]
    CircuitOpen { key: String, remaining_ms: u64 },

    /// Response shape violates a registered schema.
    #[error("response failed schema '{schema}' with {} violation(s)", .violations.len())]
    SchemaValidation {
        schema: String,
        violations: Vec<Violation>,
    },

    /// Backend accepted the call but reported a domain-level failure.
    #[error("contract call rejected with status {status}: {message}")]
    ContractCall { status: u16, message: String },

    /// Attempt exceeded the configured deadline.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// Local queue is at capacity.
    #[error("request queue full ({capacity} pending)")]
    QueueFull { capacity: usize },

    /// Network-level failure reported by the transport.
    #[error("network error: {0}")]
    Network(String),

    /// 5xx-equivalent backend response.
    #[error("backend error (status {status}): {message}")]
    Backend { status: u16, message: String },

    /// A request with this idempotency key is still outstanding.
    #[error("request with idempotency key '{0}' is already outstanding")]
    DuplicateRequest(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("client is shut down")]
    Shutdown,

    #[error("unknown schema '{0}'")]
    UnknownSchema(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Orchestration failed in an unexpected way (aborted task, panic).
    #[error("internal error: {0}")]
    Internal(String),
}

fn fmt_retry_after(retry_after_ms: &Option<u64>) -> String {
    match retry_after_ms {
        Some(ms) => format!(", retry after {} ms", ms),
        None => String::new(),
    }
}

/// Flat tag for an error, used by tagged failure results and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    RateLimited,
    CircuitOpen,
    SchemaValidation,
    ContractCall,
    Timeout,
    QueueFull,
    Network,
    Backend,
    DuplicateRequest,
    Cancelled,
    Shutdown,
    UnknownSchema,
    Config,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::SchemaValidation => "schema_validation",
            ErrorKind::ContractCall => "contract_call",
            ErrorKind::Timeout => "timeout",
            ErrorKind::QueueFull => "queue_full",
            ErrorKind::Network => "network",
            ErrorKind::Backend => "backend",
            ErrorKind::DuplicateRequest => "duplicate_request",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Shutdown => "shutdown",
            ErrorKind::UnknownSchema => "unknown_schema",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Authentication(_) => ErrorKind::Authentication,
            ClientError::RateLimited { .. } => ErrorKind::RateLimited,
            ClientError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            ClientError::SchemaValidation { .. } => ErrorKind::SchemaValidation,
            ClientError::ContractCall { .. } => ErrorKind::ContractCall,
            ClientError::Timeout(_) => ErrorKind::Timeout,
            ClientError::QueueFull { .. } => ErrorKind::QueueFull,
            ClientError::Network(_) => ErrorKind::Network,
            ClientError::Backend { .. } => ErrorKind::Backend,
            ClientError::DuplicateRequest(_) => ErrorKind::DuplicateRequest,
            ClientError::Cancelled => ErrorKind::Cancelled,
            ClientError::Shutdown => ErrorKind::Shutdown,
            ClientError::UnknownSchema(_) => ErrorKind::UnknownSchema,
            ClientError::Config(_) => ErrorKind::Config,
            ClientError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Transient failures are retried locally before surfacing.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Network(_)
                | ClientError::Timeout(_)
                | ClientError::Backend { .. }
                | ClientError::RateLimited { .. }
        )
    }

    /// Only transport and backend health failures feed the circuit breaker.
    /// Throttling, validation and authentication reflect call correctness.
    pub fn counts_toward_breaker(&self) -> bool {
        matches!(
            self,
            ClientError::Network(_) | ClientError::Timeout(_) | ClientError::Backend { .. }
        )
    }

    /// Retry-after hint carried by throttling errors.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ClientError::RateLimited { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
