//! Reconcile-outcome counters and a duration histogram (SPEC_FULL.md §3), exposed on
//! `/metrics` alongside `/healthz`, mirroring `web-gateway::metrics`.

use once_cell::sync::Lazy;
use prometheus::{HistogramVec, IntCounterVec, Registry};

pub struct Metrics {
    pub registry: Registry,
    pub reconciles_total: IntCounterVec,
    pub reconcile_duration_seconds: HistogramVec,
    pub crashloop_sweeps_total: IntCounterVec,
}

pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();
        let reconciles_total = IntCounterVec::new(
            prometheus::opts!("orchestration_worker_reconciles_total", "Total processed intent messages"),
            &["kind", "outcome"],
        )
        .unwrap();
        let reconcile_duration_seconds = HistogramVec::new(
            prometheus::histogram_opts!("orchestration_worker_reconcile_duration_seconds", "Intent handling latency"),
            &["kind"],
        )
        .unwrap();
        let crashloop_sweeps_total = IntCounterVec::new(
            prometheus::opts!("orchestration_worker_crashloop_sweeps_total", "Completed crashloop sweep passes"),
            &["outcome"],
        )
        .unwrap();
        registry.register(Box::new(reconciles_total.clone())).unwrap();
        registry.register(Box::new(reconcile_duration_seconds.clone())).unwrap();
        registry.register(Box::new(crashloop_sweeps_total.clone())).unwrap();
        Self { registry, reconciles_total, reconcile_duration_seconds, crashloop_sweeps_total }
    }

    pub fn record(&self, kind: &str, outcome: &str, duration_secs: f64) {
        self.reconciles_total.with_label_values(&[kind, outcome]).inc();
        self.reconcile_duration_seconds.with_label_values(&[kind]).observe(duration_secs);
    }

    pub fn record_crashloop_sweep(&self, outcome: &str) {
        self.crashloop_sweeps_total.with_label_values(&[outcome]).inc();
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
