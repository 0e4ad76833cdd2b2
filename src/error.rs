use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Gateway error type.
///
/// Covers the error classes that can occur while moving a request through
/// validation, dispatch and status reporting. Validation and crypto failures
/// are resolved into an SMS status close to where they occur; only errors
/// that genuinely prevent processing travel as this type.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Payload crypto failure. Deliberately opaque: callers must not be able
    /// to distinguish a wrong key from corrupt ciphertext.
    #[error("payload crypto failure")]
    Crypto,

    #[error("message format error: {0}")]
    Message(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("Kafka error: {0}")]
    Kafka(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Create a message format error
    pub fn message(msg: impl Into<String>) -> Self {
        GatewayError::Message(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        GatewayError::Config(msg.into())
    }

    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        GatewayError::Backend(msg.into())
    }
}

impl From<rdkafka::error::KafkaError> for GatewayError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        tracing::error!(error = %err, "Kafka error occurred");
        GatewayError::Kafka(err.to_string())
    }
}
