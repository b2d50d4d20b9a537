//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failed attempt is retried (transient errors only)
//! - Compute the delay before the next attempt
//! - Track per-call attempt state in a [`RetryContext`]
//!
//! # Design Decisions
//! - Non-transient failures (auth, validation, domain rejection) surface at once
//! - A backend retry-after hint is never undercut by the computed backoff
//! - Delays are cancellable so teardown never waits on a sleeping retry

use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{ClientError, ClientResult, ErrorKind};
use crate::lifecycle::Shutdown;
use crate::resilience::backoff::delay_for;

/// Attempt bookkeeping for one orchestrated call.
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    /// Attempts started so far.
    pub attempt: u32,
    /// Sum of all backoff delays taken.
    pub total_delay: Duration,
    /// Kind of the most recent failure.
    pub last_error: Option<ErrorKind>,
}

impl RetryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of a new attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }
}

/// Retry decisions for a given [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Record `error` against `ctx` and return the delay before the next
    /// attempt, or `None` if the error must surface now.
    pub fn next_delay(&self, ctx: &mut RetryContext, error: &ClientError) -> Option<Duration> {
        ctx.last_error = Some(error.kind());

        if !error.is_transient() || ctx.attempt > self.config.max_retries {
            return None;
        }

        let mut delay = delay_for(ctx.attempt, &self.config);
        if let Some(hint) = error.retry_after_ms() {
            delay = delay.max(Duration::from_millis(hint));
        }
        ctx.total_delay += delay;
        Some(delay)
    }
}

/// Sleep for `delay` unless shutdown fires first.
pub async fn sleep_or_shutdown(delay: Duration, shutdown: &Shutdown) -> ClientResult<()> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = shutdown.wait() => Err(ClientError::Shutdown),
    }
}
