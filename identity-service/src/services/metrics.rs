use prometheus::{
    core::Collector, Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

// Global registry
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

// Metrics
pub static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
pub static AUTH_DECISIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static AUDIT_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static PERMISSION_CHECK_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();

fn register<C: Collector + Clone + 'static>(registry: &Registry, name: &str, collector: C) -> C {
    if let Err(e) = registry.register(Box::new(collector.clone())) {
        tracing::error!("Failed to register {} collector: {}", name, e);
    }
    collector
}

/// Builds the registry once. Recording before init is a no-op.
pub fn init_metrics() {
    if REGISTRY.get().is_some() {
        return;
    }
    let registry = Registry::new();

    let counters = [
        (
            "http_requests_total",
            "Total number of HTTP requests",
            &["method", "path", "status"][..],
            &HTTP_REQUESTS_TOTAL,
        ),
        (
            "identity_auth_decisions_total",
            "Allow/deny decisions by component and outcome",
            &["component", "outcome"][..],
            &AUTH_DECISIONS_TOTAL,
        ),
        (
            "identity_audit_events_total",
            "Audit events recorded by category and risk",
            &["category", "risk"][..],
            &AUDIT_EVENTS_TOTAL,
        ),
    ];
    for (name, help, labels, slot) in counters {
        match IntCounterVec::new(Opts::new(name, help), labels) {
            Ok(metric) => {
                let _ = slot.set(register(&registry, name, metric));
            }
            Err(e) => tracing::error!("Failed to create {} metric: {}", name, e),
        }
    }

    let histograms = [
        (
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
            &["method", "path", "status"][..],
            &HTTP_REQUEST_DURATION_SECONDS,
        ),
        (
            "identity_permission_check_duration_seconds",
            "Permission evaluation latency in seconds",
            &["cached"][..],
            &PERMISSION_CHECK_DURATION_SECONDS,
        ),
    ];
    for (name, help, labels, slot) in histograms {
        match HistogramVec::new(HistogramOpts::new(name, help), labels) {
            Ok(metric) => {
                let _ = slot.set(register(&registry, name, metric));
            }
            Err(e) => tracing::error!("Failed to create {} metric: {}", name, e),
        }
    }

    let _ = REGISTRY.set(registry);
}

pub fn record_decision(component: &str, outcome: &str) {
    if let Some(counter) = AUTH_DECISIONS_TOTAL.get() {
        counter.with_label_values(&[component, outcome]).inc();
    }
}

pub fn record_audit_event(category: &str, risk: &str) {
    if let Some(counter) = AUDIT_EVENTS_TOTAL.get() {
        counter.with_label_values(&[category, risk]).inc();
    }
}

pub fn observe_permission_check(cached: bool, seconds: f64) {
    if let Some(histogram) = PERMISSION_CHECK_DURATION_SECONDS.get() {
        histogram
            .with_label_values(&[if cached { "true" } else { "false" }])
            .observe(seconds);
    }
}

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
        tracing::error!("Failed to encode metrics: {}", e);
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to convert metrics to UTF-8: {}", e);
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_decisions_appear_in_exposition() {
        init_metrics();
        record_decision("rbac", "deny");
        record_audit_event("security", "critical");
        let text = get_metrics();
        assert!(text.contains("identity_auth_decisions_total"));
        assert!(text.contains("identity_audit_events_total"));
    }
}
