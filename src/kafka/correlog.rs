use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Message, Offset, TopicPartitionList};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::KafkaConfig;
use crate::correlation::CorrelationLog;
use crate::error::{GatewayError, GatewayResult};
use crate::types::CorrelationRecord;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const REPLAY_RECV_TIMEOUT: Duration = Duration::from_secs(30);

/// Correlation log on a compacted Kafka topic.
///
/// Records are keyed by recall-id, so compaction keeps the latest record per
/// recall-id and topic retention bounds the table size. Replay consumes the
/// whole topic from the beginning with a throwaway consumer group; live
/// records are appended by the store as submissions succeed.
pub struct KafkaCorrelationLog {
    producer: FutureProducer,
    brokers: String,
    topic: String,
}

impl KafkaCorrelationLog {
    pub fn new(config: &KafkaConfig) -> GatewayResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()?;

        Ok(Self {
            producer,
            brokers: config.brokers.clone(),
            topic: config.correl_topic.clone(),
        })
    }
}

#[async_trait]
impl CorrelationLog for KafkaCorrelationLog {
    async fn append(&self, record: &CorrelationRecord) -> GatewayResult<()> {
        let payload = serde_json::to_vec(record)?;
        let kafka_record = FutureRecord::to(&self.topic)
            .key(record.recall_id.as_bytes())
            .payload(&payload);

        self.producer
            .send(kafka_record, Timeout::After(SEND_TIMEOUT))
            .await
            .map_err(|(e, _)| GatewayError::Kafka(e.to_string()))?;
        Ok(())
    }

    async fn replay(&self) -> GatewayResult<Vec<CorrelationRecord>> {
        // throwaway group: replay never commits and always starts over
        let group_id = format!("sms-gateway-correl-replay-{}", Uuid::new_v4());
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;

        let metadata =
            consumer.fetch_metadata(Some(&self.topic), Timeout::After(METADATA_TIMEOUT))?;
        let Some(topic_metadata) = metadata.topics().iter().find(|t| t.name() == self.topic) else {
            return Err(GatewayError::Kafka(format!(
                "correlation topic {} not found",
                self.topic
            )));
        };

        // end offsets decide when the replay is complete
        let mut targets: HashMap<i32, i64> = HashMap::new();
        let mut assignment = TopicPartitionList::new();
        for partition in topic_metadata.partitions() {
            let (low, high) = consumer.fetch_watermarks(
                &self.topic,
                partition.id(),
                Timeout::After(METADATA_TIMEOUT),
            )?;
            if high > low {
                targets.insert(partition.id(), high);
                assignment.add_partition_offset(&self.topic, partition.id(), Offset::Beginning)?;
            }
        }

        let mut records = Vec::new();
        if targets.is_empty() {
            info!(topic = %self.topic, "correlation topic is empty, nothing to replay");
            return Ok(records);
        }
        consumer.assign(&assignment)?;

        while !targets.is_empty() {
            let message = tokio::time::timeout(REPLAY_RECV_TIMEOUT, consumer.recv())
                .await
                .map_err(|_| {
                    GatewayError::Kafka("timed out replaying correlation topic".to_string())
                })??;

            if let Some(payload) = message.payload() {
                match serde_json::from_slice::<CorrelationRecord>(payload) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        warn!(
                            offset = message.offset(),
                            error = %e,
                            "skipping undecodable correlation record"
                        );
                    }
                }
            }

            if let Some(&target) = targets.get(&message.partition()) {
                if message.offset() + 1 >= target {
                    targets.remove(&message.partition());
                }
            }
        }

        info!(
            topic = %self.topic,
            records = records.len(),
            "correlation topic replayed"
        );
        Ok(records)
    }
}
