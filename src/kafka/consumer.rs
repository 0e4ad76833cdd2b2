use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Message;
use tracing::info;

use crate::config::KafkaConfig;
use crate::error::{GatewayError, GatewayResult};

/// Consumer for the inbound send-request topic.
///
/// Offsets are committed manually after a request has been fully handled,
/// so a crash mid-request makes Kafka redeliver it.
pub struct RequestConsumer {
    consumer: StreamConsumer,
}

impl RequestConsumer {
    pub fn new(config: &KafkaConfig) -> GatewayResult<Self> {
        info!(
            brokers = %config.brokers,
            topic = %config.inbound_topic,
            group_id = %config.group_id,
            "initializing request consumer"
        );

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("client.id", &config.client_id)
            // offset management
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            // session management
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "300000")
            .create()?;

        consumer.subscribe(&[config.inbound_topic.as_str()])?;

        Ok(Self { consumer })
    }

    /// Wait for the next request payload.
    pub async fn recv(&self) -> GatewayResult<String> {
        let message = self.consumer.recv().await?;
        let payload = message
            .payload()
            .ok_or_else(|| GatewayError::Kafka("request message has empty payload".to_string()))?;
        Ok(String::from_utf8_lossy(payload).into_owned())
    }

    /// Commit consumed offsets after successful handling.
    pub fn commit(&self) -> GatewayResult<()> {
        self.consumer.commit_consumer_state(CommitMode::Async)?;
        Ok(())
    }
}
