use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

use crate::error::Service;

struct ExternalCallMetrics {
    calls: Counter<u64>,
    duration_ms: Histogram<f64>,
    reports: Counter<u64>,
}

static METRICS: OnceCell<ExternalCallMetrics> = OnceCell::new();

fn handles() -> &'static ExternalCallMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("sage.workflow");
        ExternalCallMetrics {
            calls: meter
                .u64_counter("sage_external_calls_total")
                .with_description("External service calls by service and outcome")
                .init(),
            duration_ms: meter
                .f64_histogram("sage_external_call_duration_ms")
                .with_description("External service latency in milliseconds")
                .init(),
            reports: meter
                .u64_counter("sage_reports_total")
                .with_description("Report sessions by outcome")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) {
    if std::env::var("SAGE_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "SAGE_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export workflow metrics."
        );
    }
}

/// Record one external call (no-op if no provider installed).
pub fn record_external_call(service: Service, purpose: &str, ok: bool, duration_ms: u64) {
    let metrics = handles();
    let attrs = [
        KeyValue::new("service", service.as_str()),
        KeyValue::new("purpose", purpose.to_string()),
        KeyValue::new("outcome", if ok { "ok" } else { "error" }),
    ];

    metrics.calls.add(1, &attrs);
    metrics.duration_ms.record(duration_ms as f64, &attrs);
}

pub fn record_report_outcome(ok: bool) {
    let attrs = [KeyValue::new("outcome", if ok { "ok" } else { "error" })];
    handles().reports.add(1, &attrs);
}
