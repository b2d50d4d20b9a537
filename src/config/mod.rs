//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ClientConfig (validated, immutable)
//!     → handed to CallOrchestrator at construction
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → CallOrchestrator::apply_config swaps retry policy and timeout
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Only stateless policy (retry, timeout) is hot-swapped; breaker, queue
//!   and session state are never rebuilt by a reload

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BackoffStrategy, CacheConfig, CircuitBreakerConfig, ClientConfig, ObservabilityConfig,
    RateLimitConfig, RetryConfig, SessionConfig, TransportConfig, WalletConfig,
};
pub use watcher::ConfigWatcher;
