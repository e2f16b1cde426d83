use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_messages_total",
        "Total messages received from the queue"
    ))
    .unwrap();
    pub static ref MALFORMED_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_malformed_messages_total",
        "Total unparseable messages dropped"
    ))
    .unwrap();
    pub static ref RECORDS_PERSISTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_records_persisted_total",
        "Total telemetry records written to storage"
    ))
    .unwrap();
    pub static ref PERSIST_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_persist_failures_total",
        "Total telemetry records lost to storage failures"
    ))
    .unwrap();
    pub static ref FANOUT_DELIVERIES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_fanout_deliveries_total",
        "Total record deliveries to live observers"
    ))
    .unwrap();
    pub static ref WS_CONNECTIONS: Gauge = Gauge::with_opts(Opts::new(
        "monitor_ws_connections",
        "Currently connected live observers"
    ))
    .unwrap();
    pub static ref INGEST_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "monitor_ingest_latency_seconds",
            "Time taken to persist one telemetry record"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
}

pub fn init_metrics() {
    REGISTRY.register(Box::new(MESSAGES_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(MALFORMED_MESSAGES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(RECORDS_PERSISTED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(PERSIST_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(FANOUT_DELIVERIES_TOTAL.clone()))
        .unwrap();
    REGISTRY.register(Box::new(WS_CONNECTIONS.clone())).unwrap();
    REGISTRY
        .register(Box::new(INGEST_LATENCY_SECONDS.clone()))
        .unwrap();
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
