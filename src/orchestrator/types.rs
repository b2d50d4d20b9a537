//! Public call and status types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{ClientResult, ErrorKind};
use crate::resilience::CircuitState;
use crate::session::SessionEvent;

/// One contract invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractCall {
    /// Contract identifier; also the circuit breaker key.
    pub target: String,
    pub operation: String,
    #[serde(default)]
    pub params: Value,
    /// Registered schema the response must satisfy.
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl ContractCall {
    pub fn new(target: impl Into<String>, operation: impl Into<String>, params: Value) -> Self {
        Self {
            target: target.into(),
            operation: operation.into(),
            params,
            schema: None,
            priority: None,
            idempotency_key: None,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Result of [`safe_call`](super::CallOrchestrator::safe_call). Never an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallOutcome {
    Success { data: Value },
    Failure { kind: ErrorKind, message: String },
}

impl CallOutcome {
    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match self {
            CallOutcome::Failure { kind, .. } => Some(*kind),
            CallOutcome::Success { .. } => None,
        }
    }
}

impl From<ClientResult<Value>> for CallOutcome {
    fn from(result: ClientResult<Value>) -> Self {
        match result {
            Ok(data) => CallOutcome::Success { data },
            Err(e) => CallOutcome::Failure {
                kind: e.kind(),
                message: e.to_string(),
            },
        }
    }
}

/// Per-read options for content fetches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentOptions {
    /// Serve a cached payload without revalidating it.
    pub allow_stale: bool,
    pub priority: Option<i32>,
}

impl ContentOptions {
    pub fn allow_stale() -> Self {
        Self {
            allow_stale: true,
            priority: None,
        }
    }
}

/// Point-in-time view for external monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub queue_length: usize,
    pub in_flight: usize,
    /// Remaining throttle pause, if dispatch is currently withheld.
    pub pause_remaining_ms: Option<u64>,
    pub circuits: BTreeMap<String, CircuitState>,
    pub session: SessionEvent,
    pub cached_entries: usize,
    pub registered_schemas: usize,
    pub shut_down: bool,
}
