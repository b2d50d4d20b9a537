//! Top-level client composing the resilience, session, cache and schema
//! subsystems around each backend call.

pub mod client;
pub mod types;

pub use client::{CallOrchestrator, CONTENT_CIRCUIT};
pub use types::{CallOutcome, ContentOptions, ContractCall, StatusSnapshot};
