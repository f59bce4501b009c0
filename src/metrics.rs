use std::time::Duration;

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder,
};

static BUS_PUBLISHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "e2e_keys_bus_published_total",
            "Messages published to the bus by routing key and outcome",
        ),
        &["routing_key", "outcome"],
    )
    .expect("failed to create e2e_keys_bus_published_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register e2e_keys_bus_published_total");
    counter
});

static BUS_CONSUMED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "e2e_keys_bus_consumed_total",
            "Messages received from the bus by routing key",
        ),
        &["routing_key"],
    )
    .expect("failed to create e2e_keys_bus_consumed_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register e2e_keys_bus_consumed_total");
    counter
});

static BUS_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "e2e_keys_bus_dropped_total",
            "Inbound messages dropped without handling",
        ),
        &["routing_key", "reason"],
    )
    .expect("failed to create e2e_keys_bus_dropped_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register e2e_keys_bus_dropped_total");
    counter
});

static BUS_CONNECT_ATTEMPTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "e2e_keys_bus_connect_attempts_total",
        "Broker connection attempts, including reconnects",
    )
    .expect("failed to create e2e_keys_bus_connect_attempts_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register e2e_keys_bus_connect_attempts_total");
    counter
});

static BUS_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "e2e_keys_bus_connected",
        "1 while a broker session is established",
    )
    .expect("failed to create e2e_keys_bus_connected");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register e2e_keys_bus_connected");
    gauge
});

static STORE_OPERATION_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "e2e_keys_store_operation_duration_seconds",
            "Key store operation latency by operation and outcome",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["operation", "outcome"],
    )
    .expect("failed to create e2e_keys_store_operation_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register e2e_keys_store_operation_duration_seconds");
    histogram
});

fn outcome(ok: bool) -> &'static str {
    if ok {
        "success"
    } else {
        "failure"
    }
}

pub fn record_publish(routing_key: &str, ok: bool) {
    BUS_PUBLISHED_TOTAL
        .with_label_values(&[routing_key, outcome(ok)])
        .inc();
}

pub fn record_consumed(routing_key: &str) {
    BUS_CONSUMED_TOTAL.with_label_values(&[routing_key]).inc();
}

pub fn record_dropped(routing_key: &str, reason: &str) {
    BUS_DROPPED_TOTAL
        .with_label_values(&[routing_key, reason])
        .inc();
}

pub fn record_connect_attempt() {
    BUS_CONNECT_ATTEMPTS_TOTAL.inc();
}

pub fn set_bus_connected(connected: bool) {
    BUS_CONNECTED.set(i64::from(connected));
}

pub fn observe_store_operation(operation: &str, ok: bool, elapsed: Duration) {
    STORE_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, outcome(ok)])
        .observe(elapsed.as_secs_f64());
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
