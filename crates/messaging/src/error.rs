use std::error::Error as StdError;

use thiserror::Error;

/// Boxed cause reported by a broker backend.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Coarse classification of [`Error`] values.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// Configuration was missing or invalid.
    ConfigInvalid,

    /// The broker could not be reached at startup.
    ConnectFailed,

    /// A destination could not be described or created.
    ProvisionFailed,

    /// A payload could not be encoded.
    SerializationFailed,

    /// The broker rejected a send.
    SendFailed,

    /// A consumer group could not be joined.
    JoinFailed,

    /// Inbound bytes could not be decoded.
    DecodeFailed,

    /// A delivery could not be acknowledged or rejected.
    AckFailed,

    /// A handler panicked while processing a record.
    HandlerPanicked,

    /// The broker connection could not be released cleanly.
    ShutdownFailed,
}

/// Errors surfaced by producers, subscribers and connections.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration was missing or invalid.
    #[error("invalid messaging config: {0}")]
    ConfigInvalid(String),

    /// The broker could not be reached at startup.
    #[error("failed to connect to {servers}: {source}")]
    ConnectFailed {
        /// Servers that were dialled.
        servers: String,
        /// Underlying cause.
        #[source]
        source: BoxError,
    },

    /// A destination could not be described or created.
    #[error("failed to provision {destination}: {source}")]
    ProvisionFailed {
        /// Destination being provisioned.
        destination: String,
        /// Underlying cause.
        #[source]
        source: BoxError,
    },

    /// A payload could not be encoded.
    #[error("failed to serialize message for {destination}: {source}")]
    SerializationFailed {
        /// Destination the message was meant for.
        destination: String,
        /// Underlying cause.
        #[source]
        source: serde_json::Error,
    },

    /// The broker rejected a send.
    #[error("failed to publish to {destination}: {source}")]
    SendFailed {
        /// Destination the message was meant for.
        destination: String,
        /// Underlying cause.
        #[source]
        source: BoxError,
    },

    /// A consumer group could not be joined.
    #[error("failed to join group {group} on {destination}: {source}")]
    JoinFailed {
        /// Destination being consumed.
        destination: String,
        /// Namespaced group name.
        group: String,
        /// Underlying cause.
        #[source]
        source: BoxError,
    },

    /// Inbound bytes could not be decoded.
    #[error("failed to decode message from {destination}: {source}")]
    DecodeFailed {
        /// Destination the record came from.
        destination: String,
        /// Underlying cause.
        #[source]
        source: serde_json::Error,
    },

    /// A delivery could not be acknowledged or rejected.
    #[error("failed to settle delivery from {destination}: {source}")]
    AckFailed {
        /// Destination the record came from.
        destination: String,
        /// Underlying cause.
        #[source]
        source: BoxError,
    },

    /// A handler panicked while processing a record.
    #[error("handler panicked on {destination}: {message}")]
    HandlerPanicked {
        /// Destination the record came from.
        destination: String,
        /// Panic payload, when it was a string.
        message: String,
    },

    /// The broker connection could not be released cleanly.
    #[error("failed to release connection: {0}")]
    ShutdownFailed(#[source] BoxError),
}

impl Error {
    /// Returns the classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
            Self::ConnectFailed { .. } => ErrorKind::ConnectFailed,
            Self::ProvisionFailed { .. } => ErrorKind::ProvisionFailed,
            Self::SerializationFailed { .. } => ErrorKind::SerializationFailed,
            Self::SendFailed { .. } => ErrorKind::SendFailed,
            Self::JoinFailed { .. } => ErrorKind::JoinFailed,
            Self::DecodeFailed { .. } => ErrorKind::DecodeFailed,
            Self::AckFailed { .. } => ErrorKind::AckFailed,
            Self::HandlerPanicked { .. } => ErrorKind::HandlerPanicked,
            Self::ShutdownFailed(_) => ErrorKind::ShutdownFailed,
        }
    }

    /// Destination the error relates to, if any.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        match self {
            Self::ProvisionFailed { destination, .. }
            | Self::SerializationFailed { destination, .. }
            | Self::SendFailed { destination, .. }
            | Self::JoinFailed { destination, .. }
            | Self::DecodeFailed { destination, .. }
            | Self::AckFailed { destination, .. }
            | Self::HandlerPanicked { destination, .. } => Some(destination),
            _ => None,
        }
    }

    /// Whether repeating the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ProvisionFailed | ErrorKind::SendFailed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_failed_carries_destination() {
        let err = Error::SendFailed {
            destination: "billing.order".to_string(),
            source: "broker unavailable".into(),
        };

        assert_eq!(err.kind(), ErrorKind::SendFailed);
        assert_eq!(err.destination(), Some("billing.order"));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("billing.order"));
        assert!(err.to_string().contains("broker unavailable"));
    }

    #[test]
    fn test_config_errors_are_not_retryable() {
        let err = Error::ConfigInvalid("servers cannot be empty".to_string());

        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert_eq!(err.destination(), None);
        assert!(!err.is_retryable());
    }
}
