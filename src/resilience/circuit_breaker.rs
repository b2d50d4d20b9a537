//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: backend assumed down, calls fail fast
//! - Half-Open: testing if backend recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold within monitoring period
//! Open → Half-Open: after recovery timeout (evaluated on next admission)
//! Half-Open → Closed: trial call succeeds
//! Half-Open → Open: trial call fails (cooldown restarts)
//! ```
//!
//! # Design Decisions
//! - One breaker per call type, held in a registry
//! - Fail fast in Open state (no waiting for timeout)
//! - Single trial in Half-Open (prevents hammering recovering backend)
//! - Admission hands out an RAII permit so an abandoned trial frees its slot

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::ClientError;
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Timestamps of counted failures inside the monitoring period.
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// A circuit breaker guarding one call type.
#[derive(Debug)]
pub struct CircuitBreaker {
    key: String,
    failure_threshold: usize,
    recovery_timeout: Duration,
    monitoring_period: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(key: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            key: key.into(),
            failure_threshold: config.failure_threshold.max(1) as usize,
            recovery_timeout: Duration::from_millis(config.recovery_timeout_ms),
            monitoring_period: Duration::from_millis(config.monitoring_period_ms),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current state, applying the Open → Half-Open timeout if it has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    /// Number of counted failures inside the current window.
    pub fn failure_count(&self) -> usize {
        let mut inner = self.inner.lock();
        self.evict_stale(&mut inner, Instant::now());
        inner.failures.len()
    }

    /// Ask to make a call. Fails with `CircuitOpen` when not admitting.
    pub fn try_acquire(self: &Arc<Self>) -> Result<CallPermit, ClientError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, now);

        match inner.state {
            CircuitState::Closed => Ok(CallPermit::new(self.clone(), false)),
            CircuitState::Open => Err(ClientError::CircuitOpen {
                key: self.key.clone(),
                remaining_ms: self.remaining_cooldown(&inner, now).as_millis() as u64,
            }),
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(ClientError::CircuitOpen {
                        key: self.key.clone(),
                        remaining_ms: 0,
                    })
                } else {
                    inner.trial_in_flight = true;
                    tracing::debug!(circuit = %self.key, "Admitting half-open trial call");
                    Ok(CallPermit::new(self.clone(), true))
                }
            }
        }
    }

    fn on_success(&self, trial: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.evict_stale(&mut inner, now);

        if trial {
            inner.trial_in_flight = false;
            if inner.state == CircuitState::HalfOpen {
                inner.failures.clear();
                inner.opened_at = None;
                self.transition(&mut inner, CircuitState::Closed);
            }
        }
    }

    fn on_failure(&self, trial: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if trial {
            inner.trial_in_flight = false;
            if inner.state == CircuitState::HalfOpen {
                inner.opened_at = Some(now);
                self.transition(&mut inner, CircuitState::Open);
            }
            return;
        }

        if inner.state != CircuitState::Closed {
            return;
        }

        inner.failures.push_back(now);
        self.evict_stale(&mut inner, now);

        if inner.failures.len() >= self.failure_threshold {
            tracing::warn!(
                circuit = %self.key,
                failures = inner.failures.len(),
                threshold = self.failure_threshold,
                "Failure threshold reached"
            );
            inner.opened_at = Some(now);
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    fn release_trial(&self) {
        let mut inner = self.inner.lock();
        inner.trial_in_flight = false;
    }

    fn refresh(&self, inner: &mut BreakerInner, now: Instant) {
        if inner.state == CircuitState::Open {
            let opened_at = inner.opened_at.unwrap_or(now);
            if now.duration_since(opened_at) >= self.recovery_timeout {
                inner.trial_in_flight = false;
                self.transition(inner, CircuitState::HalfOpen);
            }
        }
    }

    fn evict_stale(&self, inner: &mut BreakerInner, now: Instant) {
        while let Some(oldest) = inner.failures.front() {
            if now.duration_since(*oldest) > self.monitoring_period {
                inner.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn remaining_cooldown(&self, inner: &BreakerInner, now: Instant) -> Duration {
        match inner.opened_at {
            Some(opened_at) => self
                .recovery_timeout
                .saturating_sub(now.duration_since(opened_at)),
            None => Duration::ZERO,
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        tracing::info!(circuit = %self.key, from = %from, to = %to, "Circuit state changed");
        metrics::record_circuit_state(&self.key, to);
    }
}

/// Admission ticket for one call.
///
/// Record exactly one outcome. Dropping an unrecorded permit counts as
/// neither success nor failure and frees a half-open trial slot.
#[derive(Debug)]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    settled: bool,
}

impl CallPermit {
    fn new(breaker: Arc<CircuitBreaker>, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    /// Whether this permit is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }

    /// Record a call result, counting only backend-health failures.
    ///
    /// Any response from the backend (including a domain rejection) proves
    /// it is reachable and settles a trial as a success.
    pub fn record<T>(self, result: &Result<T, ClientError>) {
        match result {
            Ok(_) => self.record_success(),
            Err(e) if e.counts_toward_breaker() => self.record_failure(),
            Err(ClientError::ContractCall { .. }) | Err(ClientError::SchemaValidation { .. }) => {
                self.record_success()
            }
            Err(_) => drop(self),
        }
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}

/// Per-call-type breakers sharing one configuration.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Breaker for `key`, created closed on first use.
    pub fn get(&self, key: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(key) {
            return existing.value().clone();
        }
        self.breakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key, &self.config)))
            .value()
            .clone()
    }

    /// Snapshot of every known breaker's state.
    pub fn states(&self) -> BTreeMap<String, CircuitState> {
        self.breakers
            .iter()
            .map(|r| (r.key().clone(), r.value().state()))
            .collect()
    }
}
