// Kafka integration: the client-facing request/response channels and the
// compacted topic that persists the correlation table.

pub mod consumer;
pub mod correlog;
pub mod producer;

pub use consumer::RequestConsumer;
pub use correlog::KafkaCorrelationLog;
pub use producer::StatusProducer;
