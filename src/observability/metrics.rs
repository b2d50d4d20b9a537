//! Metrics collection and exposition.
//!
//! # Metrics
//! - `client_calls_total` (counter): calls by kind and outcome
//! - `client_call_duration_seconds` (histogram): end-to-end call latency
//! - `client_retries_total` (counter): retry attempts by kind
//! - `client_queue_depth` (gauge): pending queue entries
//! - `client_circuit_state` (gauge): 0=closed, 1=half-open, 2=open, by key
//! - `client_session_transitions_total` (counter): session transitions by state
//! - `client_cache_events_total` (counter): hit, miss, revalidated, invalidated
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until a
//!   recorder is installed
//! - The Prometheus exporter is only installed by the binary

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

use crate::resilience::CircuitState;

/// Install the Prometheus exporter with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_call(kind: &'static str, outcome: &'static str, start: Instant) {
    counter!("client_calls_total", "kind" => kind, "outcome" => outcome).increment(1);
    histogram!("client_call_duration_seconds", "kind" => kind).record(start.elapsed().as_secs_f64());
}

pub fn record_retry(kind: &'static str) {
    counter!("client_retries_total", "kind" => kind).increment(1);
}

pub fn record_queue_depth(depth: usize) {
    gauge!("client_queue_depth").set(depth as f64);
}

pub fn record_circuit_state(key: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("client_circuit_state", "key" => key.to_string()).set(value);
}

pub fn record_session_transition(state: &'static str) {
    counter!("client_session_transitions_total", "state" => state).increment(1);
}

pub fn record_cache_event(event: &'static str) {
    counter!("client_cache_events_total", "event" => event).increment(1);
}
