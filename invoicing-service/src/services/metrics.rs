//! Prometheus metrics for invoicing-service.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

/// Recorder for the `metrics` facade used by the HTTP middleware.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Invoice transitions by resulting status.
pub static INVOICES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_invoices_total",
        "Total number of invoice transitions by resulting status",
        &["status"] // draft, sent, paid
    )
    .expect("Failed to register invoices_total")
});

/// Document render attempts by outcome.
pub static DOCUMENT_RENDERS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_document_renders_total",
        "Total number of invoice document renders by outcome",
        &["outcome"] // rendered, render_failed
    )
    .expect("Failed to register document_renders_total")
});

/// Invoice number collisions that forced a regeneration.
pub static NUMBER_COLLISIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_number_collisions_total",
        "Total number of invoice number collisions by suffix width",
        &["width"]
    )
    .expect("Failed to register number_collisions_total")
});

/// Payment provider webhook events by reconciliation outcome.
pub static WEBHOOK_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_webhook_events_total",
        "Total number of payment webhook events by outcome",
        &["outcome"] // paid, already_paid, unmatched, ignored, rejected
    )
    .expect("Failed to register webhook_events_total")
});

/// External collaborator failures for alerting.
pub static EXTERNAL_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_external_errors_total",
        "Total number of external service failures by collaborator",
        &["service"] // mail, payment_provider, document_store
    )
    .expect("Failed to register external_errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "invoicing_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization and installs the
/// HTTP recorder once per process).
pub fn init_metrics() {
    Lazy::force(&INVOICES_TOTAL);
    Lazy::force(&DOCUMENT_RENDERS_TOTAL);
    Lazy::force(&NUMBER_COLLISIONS_TOTAL);
    Lazy::force(&WEBHOOK_EVENTS_TOTAL);
    Lazy::force(&EXTERNAL_ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);

    if METRICS_HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = METRICS_HANDLE.set(handle);
        }
        Err(e) => {
            tracing::warn!(error = %e, "HTTP metrics recorder already installed");
        }
    }
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_default();

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    output.push_str(&encoder.encode_to_string(&metric_families).unwrap_or_default());
    output
}
