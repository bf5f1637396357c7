//! Connection-count metrics (SPEC_FULL.md §3), exposed on `/metrics` alongside
//! `/healthz`, following `web-gateway::metrics`'s shape.

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Registry};

pub struct Metrics {
    pub registry: Registry,
    pub connections_total: IntCounterVec,
    pub connections_active: IntGauge,
    pub bytes_spliced_total: IntCounter,
}

pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();
        let connections_total = IntCounterVec::new(
            prometheus::opts!("db_gateway_connections_total", "Total accepted connections by outcome"),
            &["outcome"],
        )
        .unwrap();
        let connections_active = IntGauge::new("db_gateway_connections_active", "Currently spliced connections").unwrap();
        let bytes_spliced_total =
            IntCounter::new("db_gateway_bytes_spliced_total", "Total bytes forwarded in either direction across all connections").unwrap();
        registry.register(Box::new(connections_total.clone())).unwrap();
        registry.register(Box::new(connections_active.clone())).unwrap();
        registry.register(Box::new(bytes_spliced_total.clone())).unwrap();
        Self { registry, connections_total, connections_active, bytes_spliced_total }
    }

    pub fn record_outcome(&self, outcome: &str) {
        self.connections_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_bytes_spliced(&self, n: u64) {
        self.bytes_spliced_total.inc_by(n);
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
