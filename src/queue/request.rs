//! Outbound request descriptor.

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// A logical call admitted to the queue. Immutable once enqueued.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub id: Uuid,
    /// Contract target, or `content` for content operations.
    pub target: String,
    pub operation: String,
    pub params: Value,
    /// Higher dispatches first. `None` ranks as 0.
    pub priority: Option<i32>,
    pub idempotency_key: Option<String>,
    pub created_at_ms: u64,
}

impl Request {
    pub fn new(
        target: impl Into<String>,
        operation: impl Into<String>,
        params: Value,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: target.into(),
            operation: operation.into(),
            params,
            priority: None,
            idempotency_key: None,
            created_at_ms,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn effective_priority(&self) -> i32 {
        self.priority.unwrap_or(0)
    }
}
