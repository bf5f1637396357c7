//! Request-count and latency-histogram-per-host metrics (SPEC_FULL.md §3), exposed on
//! `/metrics` alongside `/healthz`.

use once_cell::sync::Lazy;
use prometheus::{HistogramVec, IntCounterVec, Registry};

pub struct Metrics {
    pub registry: Registry,
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
}

pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();
        let requests_total = IntCounterVec::new(
            prometheus::opts!("web_gateway_requests_total", "Total proxied requests"),
            &["host", "status"],
        )
        .unwrap();
        let request_duration_seconds = HistogramVec::new(
            prometheus::histogram_opts!("web_gateway_request_duration_seconds", "Request latency by host"),
            &["host"],
        )
        .unwrap();
        registry.register(Box::new(requests_total.clone())).unwrap();
        registry.register(Box::new(request_duration_seconds.clone())).unwrap();
        Self { registry, requests_total, request_duration_seconds }
    }

    pub fn record(&self, host: &str, status: u16, duration_secs: f64) {
        self.requests_total.with_label_values(&[host, &status.to_string()]).inc();
        self.request_duration_seconds.with_label_values(&[host]).observe(duration_secs);
    }

    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf).ok();
        String::from_utf8(buf).unwrap_or_default()
    }
}
