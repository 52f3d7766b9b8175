use courier_messaging::BrokerError;
use thiserror::Error;

/// Error type for the in-process broker.
#[derive(Debug, Error)]
pub enum Error {
    /// The broker was closed.
    #[error("broker is closed")]
    Closed,

    /// A failure injected by a test.
    #[error("injected {0} failure")]
    Injected(&'static str),

    /// The consumer group does not exist on the topic.
    #[error("group {group} does not exist on {topic}")]
    UnknownGroup {
        /// Topic name.
        topic: String,
        /// Group name.
        group: String,
    },

    /// The topic has not been created.
    #[error("topic {0} does not exist")]
    UnknownTopic(String),
}

impl BrokerError for Error {}
