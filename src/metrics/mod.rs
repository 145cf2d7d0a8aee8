//! Metrics collection and exposition for btrfaas
//!
//! This module provides Prometheus-compatible metrics for runner sessions and
//! chain executions.
//!
//! When the `metrics` feature is disabled, all functions become no-ops,
//! allowing the code to compile without the metrics dependencies while
//! maintaining the same API surface.

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
#[cfg(feature = "metrics")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use std::time::Duration;

#[cfg(feature = "metrics")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder
///
/// Only the first call installs; later calls (other tests, a second binary
/// entry point) reuse the stored handle.
#[cfg(feature = "metrics")]
pub fn init_metrics() {
    if PROMETHEUS_HANDLE.get().is_some() {
        return;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            register_metrics();
            let _ = PROMETHEUS_HANDLE.set(handle);
        }
        Err(e) => {
            tracing::debug!(error = %e, "Metrics recorder already installed");
        }
    }
}

/// Render the Prometheus text exposition
#[cfg(feature = "metrics")]
pub fn render() -> String {
    PROMETHEUS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_default()
}

/// Register all metrics with their descriptions
#[cfg(feature = "metrics")]
fn register_metrics() {
    describe_counter!(
        "btrfaas_sessions_total",
        "Runner sessions by outcome (ok, error, cancelled)"
    );
    describe_gauge!(
        "btrfaas_sessions_active",
        "Number of runner sessions currently in flight"
    );
    describe_counter!(
        "btrfaas_session_chunks_total",
        "Chunks transformed by runner sessions"
    );
    describe_counter!(
        "btrfaas_chain_invocations_total",
        "Chain executions by outcome (ok, error)"
    );
    describe_histogram!(
        "btrfaas_chain_duration_seconds",
        "Wall time of a chain execution"
    );
}

/// Record the end of a runner session
#[cfg(feature = "metrics")]
pub fn record_session(outcome: &'static str) {
    counter!("btrfaas_sessions_total", "outcome" => outcome).increment(1);
}

/// Track sessions in flight
#[cfg(feature = "metrics")]
pub fn record_session_active(delta: i64) {
    if delta > 0 {
        gauge!("btrfaas_sessions_active").increment(delta as f64);
    } else {
        gauge!("btrfaas_sessions_active").decrement(delta.unsigned_abs() as f64);
    }
}

/// Record one transformed chunk
#[cfg(feature = "metrics")]
pub fn record_session_chunk(function: &str) {
    counter!("btrfaas_session_chunks_total", "function" => function.to_string()).increment(1);
}

/// Record a finished chain execution
#[cfg(feature = "metrics")]
pub fn record_chain(steps: usize, duration: Duration, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!("btrfaas_chain_invocations_total", "outcome" => outcome).increment(1);
    histogram!("btrfaas_chain_duration_seconds", "steps" => steps.to_string())
        .record(duration.as_secs_f64());
}

// ============================================================================
// No-op implementations when metrics feature is disabled
// ============================================================================

#[cfg(not(feature = "metrics"))]
#[inline]
pub fn init_metrics() {}

#[cfg(not(feature = "metrics"))]
#[inline]
pub fn render() -> String {
    String::new()
}

#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_session(_outcome: &'static str) {}

#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_session_active(_delta: i64) {}

#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_session_chunk(_function: &str) {}

#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_chain(_steps: usize, _duration: Duration, _ok: bool) {}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_metrics_render() {
        init_metrics();
        init_metrics();
        record_session("ok");
        record_chain(2, Duration::from_millis(5), true);
        let text = render();
        // Another test binary may own the global recorder; only check when ours won
        if !text.is_empty() {
            assert!(text.contains("btrfaas_sessions_total"));
            assert!(text.contains("btrfaas_chain_invocations_total"));
        }
    }
}
