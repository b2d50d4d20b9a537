//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound attempt:
//!     → circuit_breaker.rs (admit or fail fast, per call type)
//!     → timeouts.rs (enforce per-attempt deadline)
//!     → On failure: retries.rs (classify, compute delay via backoff.rs)
//!     → circuit_breaker.rs (record outcome)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Only transient failures are retried
//! - Circuit breaker prevents cascading failures

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use retries::{RetryContext, RetryPolicy};
