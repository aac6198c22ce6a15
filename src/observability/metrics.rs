//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_retry_attempts_total` (counter): attempts by policy
//! - `guard_retry_outcomes_total` (counter): final retry outcome by policy
//! - `guard_breaker_transitions_total` (counter): state changes by dependency and target state
//! - `guard_breaker_state` (gauge): 0=closed, 1=half_open, 2=open
//! - `guard_rate_limit_decisions_total` (counter): allowed/denied
//! - `guard_component_health` (gauge): 1=healthy, 0.5=degraded, 0=unhealthy
//! - `guard_inflight_operations` (gauge): operations tracked by the shutdown coordinator
//! - `guard_faults_injected_total` (counter): simulated failures by dependency and effect

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install Prometheus exporter"),
    }
}

pub fn record_retry_attempt(policy: &str) {
    metrics::counter!("guard_retry_attempts_total", "policy" => policy.to_string()).increment(1);
}

pub fn record_retry_outcome(policy: &str, outcome: &'static str) {
    metrics::counter!(
        "guard_retry_outcomes_total",
        "policy" => policy.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_breaker_transition(dependency: &str, to: &'static str, gauge: f64) {
    metrics::counter!(
        "guard_breaker_transitions_total",
        "dependency" => dependency.to_string(),
        "to" => to
    )
    .increment(1);
    metrics::gauge!("guard_breaker_state", "dependency" => dependency.to_string()).set(gauge);
}

pub fn record_rate_limit_decision(allowed: bool) {
    let decision = if allowed { "allowed" } else { "denied" };
    metrics::counter!("guard_rate_limit_decisions_total", "decision" => decision).increment(1);
}

pub fn record_component_health(component: &str, value: f64) {
    metrics::gauge!("guard_component_health", "component" => component.to_string()).set(value);
}

pub fn record_inflight(count: usize) {
    metrics::gauge!("guard_inflight_operations").set(count as f64);
}

pub fn record_fault_injected(dependency: &str, effect: &'static str) {
    metrics::counter!(
        "guard_faults_injected_total",
        "dependency" => dependency.to_string(),
        "effect" => effect
    )
    .increment(1);
}
