use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tracing::{error, info};

use crate::config::KafkaConfig;
use crate::emitter::StatusPublisher;
use crate::error::{GatewayError, GatewayResult};
use crate::metrics;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Producer for the outbound status-event topic.
///
/// Configured for at-least-once delivery: all in-sync replicas acknowledge,
/// idempotent writes, a small linger window for latency. Clones share the
/// underlying producer.
#[derive(Clone)]
pub struct StatusProducer {
    producer: FutureProducer,
    topic: String,
}

impl StatusProducer {
    pub fn new(config: &KafkaConfig) -> GatewayResult<Self> {
        info!(
            brokers = %config.brokers,
            topic = %config.outbound_topic,
            "initializing status producer"
        );

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            // reliability
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("max.in.flight.requests.per.connection", "5")
            // performance
            .set("linger.ms", "10")
            .set("batch.size", "16384")
            // timeouts
            .set("request.timeout.ms", "30000")
            .set("delivery.timeout.ms", "120000")
            .create()?;

        Ok(Self {
            producer,
            topic: config.outbound_topic.clone(),
        })
    }

    /// Wait for in-flight events to be acknowledged before shutdown.
    pub fn flush(&self, timeout: Duration) -> GatewayResult<()> {
        self.producer.flush(Timeout::After(timeout))?;
        Ok(())
    }
}

#[async_trait]
impl StatusPublisher for StatusProducer {
    async fn publish(&self, key: &str, payload: Vec<u8>) -> GatewayResult<()> {
        let record = FutureRecord::to(&self.topic).key(key).payload(&payload);

        let start = std::time::Instant::now();
        match self
            .producer
            .send(record, Timeout::After(SEND_TIMEOUT))
            .await
        {
            Ok((partition, offset)) => {
                metrics::KAFKA_PRODUCE_SUCCESS.inc();
                metrics::KAFKA_PRODUCE_LATENCY.observe(start.elapsed().as_secs_f64());
                tracing::debug!(partition, offset, key, "status event published");
                Ok(())
            }
            Err((kafka_err, _)) => {
                metrics::KAFKA_PRODUCE_FAILURE.inc();
                error!(error = %kafka_err, topic = %self.topic, "failed to publish status event");
                Err(GatewayError::Kafka(kafka_err.to_string()))
            }
        }
    }
}
