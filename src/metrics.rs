use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    opts, register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};

pub static REQUESTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "sms_gateway_requests_total",
        "Total number of inbound send requests"
    ))
    .unwrap()
});

/// Status events emitted to the client-facing channel, labelled by status.
pub static STATUS_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "sms_gateway_status_events_total",
            "Total number of status events emitted"
        ),
        &["status"]
    )
    .unwrap()
});

pub static BACKEND_FAILOVERS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "sms_gateway_backend_failovers_total",
        "Connection-level endpoint failures that advanced the failover cursor"
    ))
    .unwrap()
});

/// Delivery notifications dropped because no correlation record could be
/// resolved for their recall-id.
pub static NOTIFICATIONS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "sms_gateway_notifications_dropped_total",
        "Delivery notifications dropped for lack of a correlation record"
    ))
    .unwrap()
});

pub static KAFKA_PRODUCE_SUCCESS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "sms_gateway_kafka_produce_success_total",
        "Total number of successful Kafka produce operations"
    ))
    .unwrap()
});

pub static KAFKA_PRODUCE_FAILURE: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "sms_gateway_kafka_produce_failure_total",
        "Total number of failed Kafka produce operations"
    ))
    .unwrap()
});

pub static KAFKA_PRODUCE_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "sms_gateway_kafka_produce_latency_seconds",
        "Kafka produce operation latency in seconds",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .unwrap()
});

pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
