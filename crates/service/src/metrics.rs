use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static UPDATE_FAILURES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static DOCUMENT_DECODE_FAILURES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn http_requests_total() -> &'static IntCounterVec {
    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new("eqs_http_requests_total", "Entity query service HTTP request count."),
                &["route", "method", "status"],
            )
            .expect("create eqs_http_requests_total"),
        )
    })
}

fn http_request_duration_seconds() -> &'static HistogramVec {
    HTTP_REQUEST_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "eqs_http_request_duration_seconds",
                    "Entity query service HTTP request duration in seconds.",
                )
                .buckets(vec![
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ]),
                &["route", "method", "outcome"],
            )
            .expect("create eqs_http_request_duration_seconds"),
        )
    })
}

fn update_failures_total() -> &'static IntCounterVec {
    UPDATE_FAILURES_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "eqs_update_failures_total",
                    "Per-id sub-document updates the store did not apply.",
                ),
                &["entity_type"],
            )
            .expect("create eqs_update_failures_total"),
        )
    })
}

fn document_decode_failures_total() -> &'static IntCounterVec {
    DOCUMENT_DECODE_FAILURES_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "eqs_document_decode_failures_total",
                    "Stored documents dropped because they failed to decode.",
                ),
                &["collection"],
            )
            .expect("create eqs_document_decode_failures_total"),
        )
    })
}

pub fn observe_http_request(route: &str, method: &str, status: u16, duration: Duration) {
    let status_str = status.to_string();
    http_requests_total()
        .with_label_values(&[route, method, status_str.as_str()])
        .inc();

    let outcome = if (200..400).contains(&status) {
        "success"
    } else {
        "error"
    };
    http_request_duration_seconds()
        .with_label_values(&[route, method, outcome])
        .observe(duration.as_secs_f64());
}

pub fn inc_update_failure(entity_type: &str) {
    update_failures_total().with_label_values(&[entity_type]).inc();
}

pub fn inc_document_decode_failure(collection: &str) {
    document_decode_failures_total()
        .with_label_values(&[collection])
        .inc();
}

pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let _ = update_failures_total();
    let _ = document_decode_failures_total();

    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}
