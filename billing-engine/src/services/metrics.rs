//! Prometheus metrics for the billing engine.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Store operation duration histogram.
pub static STORE_OP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "billing_store_op_duration_seconds",
        "Store operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register store_op_duration")
});

/// Document counter by kind (quotation, invoice).
pub static DOCUMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_documents_total",
        "Total number of documents created by kind",
        &["kind"]
    )
    .expect("Failed to register documents_total")
});

/// Invoice status transition counter.
pub static INVOICE_STATUS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_invoice_status_total",
        "Invoice status transitions",
        &["status"] // draft, issued, paid, cancelled
    )
    .expect("Failed to register invoice_status_total")
});

/// Payment amount counter by currency.
pub static PAYMENT_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_payment_amount_total",
        "Total payment amount by currency",
        &["currency"]
    )
    .expect("Failed to register payment_amount_total")
});

/// Refund amount counter by currency.
pub static REFUND_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_refund_amount_total",
        "Total refund amount by currency",
        &["currency"]
    )
    .expect("Failed to register refund_amount_total")
});

/// Fallback number counter; fires when the sequence counter was unreachable
/// and a timestamp-derived number was issued instead.
pub static FALLBACK_NUMBERS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_fallback_numbers_total",
        "Document numbers issued via the timestamp fallback",
        &["kind"]
    )
    .expect("Failed to register fallback_numbers_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&STORE_OP_DURATION);
    Lazy::force(&DOCUMENTS_TOTAL);
    Lazy::force(&INVOICE_STATUS_TOTAL);
    Lazy::force(&PAYMENT_AMOUNT_TOTAL);
    Lazy::force(&REFUND_AMOUNT_TOTAL);
    Lazy::force(&FALLBACK_NUMBERS_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
