//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::schema::SchemaDefinition;

/// Root configuration for the contract client.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend endpoint settings.
    pub transport: TransportConfig,

    /// Retry policy for transient failures.
    pub retry: RetryConfig,

    /// Circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Queue pacing and backpressure.
    pub rate_limit: RateLimitConfig,

    /// Maximum duration of a single outbound attempt in milliseconds.
    pub timeout_ms: u64,

    /// Session token lifecycle.
    pub session: SessionConfig,

    /// Local signing wallet.
    pub wallet: WalletConfig,

    /// Content cache settings.
    pub cache: CacheConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Response schemas registered at startup, keyed by name.
    pub schemas: BTreeMap<String, SchemaDefinition>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            timeout_ms: 30_000,
            session: SessionConfig::default(),
            wallet: WalletConfig::default(),
            cache: CacheConfig::default(),
            observability: ObservabilityConfig::default(),
            schemas: BTreeMap::new(),
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Backend endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Base URL of the contract/content API.
    pub base_url: String,

    /// User-Agent sent with every request.
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            user_agent: concat!("contract-client/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Delay growth between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Constant `base_delay_ms` between attempts.
    Fixed,
    /// `base_delay_ms * 2^(attempt-1)`, capped at `max_delay_ms`.
    Exponential,
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Backoff strategy.
    pub strategy: BackoffStrategy,

    /// Retries after the first attempt (0 disables retries).
    pub max_retries: u32,

    /// Base delay in milliseconds.
    pub base_delay_ms: u64,

    /// Upper bound for any single delay in milliseconds.
    pub max_delay_ms: u64,

    /// Draw delays uniformly from `[0, computed]`.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            jitter: true,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within `monitoring_period_ms` that open the circuit.
    pub failure_threshold: u32,

    /// Time spent open before a trial call is admitted, in milliseconds.
    pub recovery_timeout_ms: u64,

    /// Rolling window for failure counting, in milliseconds.
    pub monitoring_period_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            monitoring_period_ms: 60_000,
        }
    }
}

/// Queue pacing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Interval between dispatch ticks in milliseconds.
    pub queue_processing_interval_ms: u64,

    /// Maximum pending (not yet dispatched) entries.
    pub max_queue_size: usize,

    /// Minimum pause after the backend signals throttling, in milliseconds.
    pub default_backoff_ms: u64,

    /// Dispatch budget replenished on every tick.
    pub requests_per_interval: u32,

    /// Upper bound for throttle pauses without an explicit retry-after.
    pub max_backoff_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            queue_processing_interval_ms: 100,
            max_queue_size: 1000,
            default_backoff_ms: 1000,
            requests_per_interval: 10,
            max_backoff_ms: 30_000,
        }
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Pre-seeded session token (skips the first challenge).
    pub session_token: Option<String>,

    /// Expiry of the pre-seeded token (epoch milliseconds). Unset means no
    /// local expiry; the backend rejecting it triggers re-authentication.
    pub session_token_expires_at_ms: Option<u64>,

    /// Tokens are treated as expired this long before their real expiry.
    pub expiry_margin_ms: u64,

    /// Background expiry check interval in milliseconds (0 disables it).
    pub expiry_check_interval_ms: u64,

    /// Token lifetime assumed when the backend omits `expires_at`.
    pub default_token_ttl_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_token: None,
            session_token_expires_at_ms: None,
            expiry_margin_ms: 60_000,
            expiry_check_interval_ms: 10_000,
            default_token_ttl_ms: 3_600_000,
        }
    }
}

/// Local wallet configuration. The key itself only comes from the environment.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Load a signing key from the environment.
    pub enabled: bool,

    /// Chain ID the signer is bound to.
    pub chain_id: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chain_id: 1,
        }
    }
}

/// Content cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable ETag-based caching of content reads.
    pub enabled: bool,

    /// Snapshot file loaded at startup and written on shutdown.
    pub persistence_path: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            persistence_path: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: ClientConfig = toml::from_str("timeout_ms = 500").unwrap();
        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.strategy, BackoffStrategy::Exponential);
        assert_eq!(config.rate_limit.max_queue_size, 1000);
        assert!(config.session.session_token.is_none());
    }

    #[test]
    fn test_nested_sections() {
        let raw = r#"
            [retry]
            strategy = "fixed"
            max_retries = 1
            jitter = false

            [circuit_breaker]
            failure_threshold = 2

            [schemas.PlayerStats]
            type = "object"
            required = ["health"]

            [schemas.PlayerStats.properties.health]
            type = "number"
            minimum = 0
            maximum = 100
        "#;
        let config: ClientConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.retry.strategy, BackoffStrategy::Fixed);
        assert!(!config.retry.jitter);
        assert_eq!(config.circuit_breaker.failure_threshold, 2);
        assert_eq!(config.circuit_breaker.recovery_timeout_ms, 30_000);
        assert!(config.schemas.contains_key("PlayerStats"));
    }
}
