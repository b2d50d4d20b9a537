//! Outbound request admission and pacing.
//!
//! # Data Flow
//! ```text
//! orchestrator attempt
//!     → rate_limited.rs enqueue (capacity, idempotency key, priority slot)
//!     → tick task: budget per interval, skipped while throttled
//!     → job runs on the JoinSet → result slot fulfilled
//!     → 429 / RateLimited outcome pauses dispatch
//! ```

pub mod rate_limited;
pub mod request;

pub use rate_limited::{Job, QueueEntry, QueueHandle, RateLimitedQueue};
pub use request::Request;
