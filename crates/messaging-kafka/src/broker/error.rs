use courier_messaging::BrokerError;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use thiserror::Error;

/// Error type for Kafka operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A blocking client call could not be completed.
    #[error("blocking kafka call failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),

    /// Offset commit error.
    #[error("failed to commit offset: {0}")]
    Commit(KafkaError),

    /// Client creation error.
    #[error("failed to create kafka client: {0}")]
    Create(KafkaError),

    /// Topic creation error.
    #[error("failed to create topic {0}: {1}")]
    CreateTopic(String, RDKafkaErrorCode),

    /// Flush error.
    #[error("failed to flush producer: {0}")]
    Flush(KafkaError),

    /// Metadata error.
    #[error("failed to fetch metadata: {0}")]
    Metadata(KafkaError),

    /// Receive error.
    #[error("failed to receive message: {0}")]
    Receive(KafkaError),

    /// The group coordinator reported a rebalance error.
    #[error("rebalance failed: {0}")]
    Rebalance(String),

    /// The rebalance event channel closed.
    #[error("rebalance events closed")]
    RebalanceClosed,

    /// Seek error.
    #[error("failed to seek: {0}")]
    Seek(KafkaError),

    /// Send error.
    #[error("failed to send: {0}")]
    Send(KafkaError),

    /// Subscribe error.
    #[error("failed to subscribe: {0}")]
    Subscribe(KafkaError),
}

impl BrokerError for Error {}
