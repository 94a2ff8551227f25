//! Prometheus metrics registry and metric definitions.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use tracing::error;

/// Global registry under crate namespace
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("rust_flights_analytics".into()), None)
        .expect("failed to create Prometheus registry")
});

/// Dataset loads by outcome ("ok" / "error")
pub static LOAD_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("loads_total", "Total number of dataset load attempts");
    let c = IntCounterVec::new(opts, &["outcome"]).expect("counter opts");
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

/// Histogram of full load durations (parse + replace)
pub static LOAD_HISTOGRAM: Lazy<Histogram> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "load_duration_seconds",
        "Duration of a full dataset load in seconds",
    )
    .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]);
    let h = Histogram::with_opts(opts).expect("histogram opts");
    REGISTRY.register(Box::new(h.clone())).unwrap();
    h
});

/// Rows present after the last successful load, per entity
pub static ROWS_LOADED: Lazy<IntGaugeVec> = Lazy::new(|| {
    let opts = Opts::new("rows_loaded", "Rows written by the last successful load");
    let g = IntGaugeVec::new(opts, &["entity"]).expect("gauge opts");
    REGISTRY.register(Box::new(g.clone())).unwrap();
    g
});

/// Analytic queries by operation and outcome
pub static QUERY_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("queries_total", "Total number of analytic queries");
    let c = IntCounterVec::new(opts, &["operation", "outcome"]).expect("counter opts");
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

/// Histogram of query durations per operation
pub static QUERY_HISTOGRAM: Lazy<HistogramVec> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "query_duration_seconds",
        "Duration of analytic queries in seconds",
    );
    let h = HistogramVec::new(opts, &["operation"]).expect("histogram opts");
    REGISTRY.register(Box::new(h.clone())).unwrap();
    h
});

/// Encode all metrics as text
pub fn gather_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let mf = REGISTRY.gather();
    if let Err(e) = encoder.encode(&mf, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
