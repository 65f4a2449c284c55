//! Prometheus metrics for llm-service.
//!
//! HTTP, provider and session-relay metrics. Recording helpers are no-ops
//! until [`init_metrics`] has run, so library users and tests need not call it.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

// Global registry
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

// HTTP metrics
pub static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();

// Provider metrics
pub static LLM_PROVIDER_LATENCY_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
pub static LLM_PROVIDER_ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static LLM_UPSTREAM_RELEASES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

// Session metrics
pub static LLM_ACTIVE_SESSIONS: OnceLock<IntGaugeVec> = OnceLock::new();
pub static LLM_SESSIONS_CLOSED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static LLM_FRAGMENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Must be called once at startup.
pub fn init_metrics() {
    if REGISTRY.get().is_some() {
        return;
    }

    let registry = Registry::new();

    let http_requests_total = IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests"),
        &["method", "path", "status"],
    )
    .expect("Failed to create http_requests_total metric");

    let http_request_duration = HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds (time to response head)",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["method", "path"],
    )
    .expect("Failed to create http_request_duration_seconds metric");

    let provider_latency = HistogramVec::new(
        HistogramOpts::new(
            "llm_provider_latency_seconds",
            "Upstream LLM latency until the reply or the stream head arrives",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["provider", "operation"],
    )
    .expect("Failed to create llm_provider_latency_seconds metric");

    let provider_errors = IntCounterVec::new(
        Opts::new("llm_provider_errors_total", "Total upstream LLM errors"),
        &["provider", "error_type"],
    )
    .expect("Failed to create llm_provider_errors_total metric");

    let upstream_releases = IntCounterVec::new(
        Opts::new(
            "llm_upstream_releases_total",
            "Upstream streaming connections released",
        ),
        &["provider"],
    )
    .expect("Failed to create llm_upstream_releases_total metric");

    let active_sessions = IntGaugeVec::new(
        Opts::new("llm_active_sessions", "Registered in-flight sessions"),
        &["kind"],
    )
    .expect("Failed to create llm_active_sessions metric");

    // outcome: exhausted, failed, abandoned, evicted
    let sessions_closed = IntCounterVec::new(
        Opts::new("llm_sessions_closed_total", "Sessions removed from a registry"),
        &["kind", "outcome"],
    )
    .expect("Failed to create llm_sessions_closed_total metric");

    let fragments = IntCounterVec::new(
        Opts::new("llm_fragments_total", "Fragments pulled from sessions"),
        &["kind"],
    )
    .expect("Failed to create llm_fragments_total metric");

    registry
        .register(Box::new(http_requests_total.clone()))
        .expect("Failed to register http_requests_total");
    registry
        .register(Box::new(http_request_duration.clone()))
        .expect("Failed to register http_request_duration_seconds");
    registry
        .register(Box::new(provider_latency.clone()))
        .expect("Failed to register llm_provider_latency_seconds");
    registry
        .register(Box::new(provider_errors.clone()))
        .expect("Failed to register llm_provider_errors_total");
    registry
        .register(Box::new(upstream_releases.clone()))
        .expect("Failed to register llm_upstream_releases_total");
    registry
        .register(Box::new(active_sessions.clone()))
        .expect("Failed to register llm_active_sessions");
    registry
        .register(Box::new(sessions_closed.clone()))
        .expect("Failed to register llm_sessions_closed_total");
    registry
        .register(Box::new(fragments.clone()))
        .expect("Failed to register llm_fragments_total");

    let _ = REGISTRY.set(registry);
    let _ = HTTP_REQUESTS_TOTAL.set(http_requests_total);
    let _ = HTTP_REQUEST_DURATION_SECONDS.set(http_request_duration);
    let _ = LLM_PROVIDER_LATENCY_SECONDS.set(provider_latency);
    let _ = LLM_PROVIDER_ERRORS_TOTAL.set(provider_errors);
    let _ = LLM_UPSTREAM_RELEASES_TOTAL.set(upstream_releases);
    let _ = LLM_ACTIVE_SESSIONS.set(active_sessions);
    let _ = LLM_SESSIONS_CLOSED_TOTAL.set(sessions_closed);
    let _ = LLM_FRAGMENTS_TOTAL.set(fragments);

    tracing::info!("Prometheus metrics initialized");
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match REGISTRY.get() {
        Some(r) => r,
        None => {
            tracing::error!("Metrics registry not initialized");
            return "# Metrics registry not initialized\n".to_string();
        }
    };

    let metric_families = registry.gather();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to convert metrics to UTF-8");
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        }
    }
}

// Helper functions for recording metrics

/// Record a completed HTTP request.
pub fn record_http_request(method: &str, path: &str, status: &str, duration_secs: f64) {
    if let Some(counter) = HTTP_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[method, path, status]).inc();
    }
    if let Some(histogram) = HTTP_REQUEST_DURATION_SECONDS.get() {
        histogram
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }
}

/// Record provider latency.
pub fn record_provider_latency(provider: &str, operation: &str, duration_secs: f64) {
    if let Some(histogram) = LLM_PROVIDER_LATENCY_SECONDS.get() {
        histogram
            .with_label_values(&[provider, operation])
            .observe(duration_secs);
    }
}

/// Record a provider error.
pub fn record_provider_error(provider: &str, error_type: &str) {
    if let Some(counter) = LLM_PROVIDER_ERRORS_TOTAL.get() {
        counter.with_label_values(&[provider, error_type]).inc();
    }
}

/// Record the release of an upstream streaming connection.
pub fn record_upstream_release(provider: &str) {
    if let Some(counter) = LLM_UPSTREAM_RELEASES_TOTAL.get() {
        counter.with_label_values(&[provider]).inc();
    }
}

pub fn set_active_sessions(kind: &str, count: usize) {
    if let Some(gauge) = LLM_ACTIVE_SESSIONS.get() {
        gauge.with_label_values(&[kind]).set(count as i64);
    }
}

pub fn record_session_closed(kind: &str, outcome: &str) {
    if let Some(counter) = LLM_SESSIONS_CLOSED_TOTAL.get() {
        counter.with_label_values(&[kind, outcome]).inc();
    }
}

pub fn record_fragment(kind: &str) {
    if let Some(counter) = LLM_FRAGMENTS_TOTAL.get() {
        counter.with_label_values(&[kind]).inc();
    }
}
