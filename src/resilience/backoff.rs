//! Backoff delay computation with optional full jitter.

use rand::Rng;
use std::time::Duration;

use crate::config::{BackoffStrategy, RetryConfig};

/// Delay before retry number `attempt` (1-based) under `config`.
///
/// Attempt 0 yields no delay. With jitter enabled the delay is drawn
/// uniformly from `[0, computed]`.
pub fn delay_for(attempt: u32, config: &RetryConfig) -> Duration {
    let capped = capped_delay_ms(attempt, config.strategy, config.base_delay_ms, config.max_delay_ms);
    if config.jitter {
        Duration::from_millis(full_jitter(capped))
    } else {
        Duration::from_millis(capped)
    }
}

/// Deterministic exponential backoff, used by the queue for throttle pauses.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    Duration::from_millis(capped_delay_ms(
        attempt,
        BackoffStrategy::Exponential,
        base_ms,
        max_ms,
    ))
}

fn capped_delay_ms(attempt: u32, strategy: BackoffStrategy, base_ms: u64, max_ms: u64) -> u64 {
    if attempt == 0 {
        return 0;
    }

    match strategy {
        BackoffStrategy::Fixed => base_ms.min(max_ms),
        BackoffStrategy::Exponential => {
            let exponential_base = 2u64.saturating_pow(attempt - 1);
            base_ms.saturating_mul(exponential_base).min(max_ms)
        }
    }
}

fn full_jitter(cap_ms: u64) -> u64 {
    if cap_ms == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=cap_ms)
}
