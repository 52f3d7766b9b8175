use async_nats::jetstream::context::{CreateStreamErrorKind, GetStreamErrorKind, PublishErrorKind};
use async_nats::jetstream::consumer::StreamErrorKind;
use async_nats::jetstream::consumer::pull::MessagesErrorKind;
use async_nats::jetstream::stream::ConsumerErrorKind;
use courier_messaging::BrokerError;
use thiserror::Error;

/// Error type for JetStream operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Acknowledgement error.
    #[error("failed to acknowledge message: {0}")]
    Ack(async_nats::Error),

    /// Consumer create error.
    #[error("failed to create consumer: {0}")]
    Consumer(ConsumerErrorKind),

    /// Stream create error.
    #[error("failed to create stream: {0}")]
    CreateStream(CreateStreamErrorKind),

    /// Drain error.
    #[error("failed to drain connection: {0}")]
    Drain(async_nats::Error),

    /// Flush error.
    #[error("failed to flush connection: {0}")]
    Flush(async_nats::Error),

    /// Stream lookup error.
    #[error("failed to get stream: {0}")]
    GetStream(GetStreamErrorKind),

    /// Consumer messages error.
    #[error("failed to get consumer messages: {0}")]
    Messages(MessagesErrorKind),

    /// Publish error.
    #[error("failed to publish: {0}")]
    Publish(PublishErrorKind),

    /// Consumer stream error.
    #[error("consumer stream error: {0}")]
    Stream(StreamErrorKind),

    /// Stream listing error.
    #[error("failed to list streams: {0}")]
    StreamNames(async_nats::Error),
}

impl BrokerError for Error {}
