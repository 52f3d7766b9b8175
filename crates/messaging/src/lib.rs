//! Broker-agnostic publish/subscribe over typed messages.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// The wire-level client contract each backend implements.
pub mod broker;

/// Connection settings shared by every backend.
pub mod config;

/// A broker connection and the state shared by its producers and subscribers.
pub mod connection;

/// Trace context and message id generation.
pub mod context;

/// Destination naming and consumer group namespacing.
pub mod destination;

/// Decoded records handed to handlers.
pub mod envelope;

/// Errors.
pub mod error;

/// Handlers process delivered messages.
pub mod handler;

/// Typed message payloads and their wire encoding.
pub mod payload;

/// Producers publish typed messages.
pub mod producer;

/// Memoized destination provisioning.
pub mod provisioning;

/// Consumer-group session lifecycle.
pub mod session;

/// Subscribers join consumer groups and dispatch to handlers.
pub mod subscriber;

pub use broker::{Broker, BrokerError, Claim, Delivery, Headers, Membership, OutboundRecord};
pub use config::{MessagingConfig, ScramAlgorithm};
pub use connection::{Connection, ConnectionOptions};
pub use context::{IdGenerator, TraceContext, UuidGenerator};
pub use destination::Destination;
pub use envelope::Envelope;
pub use error::{Error, ErrorKind};
pub use handler::Handler;
pub use payload::Payload;
pub use producer::{BrokerProducer, Producer};
pub use session::{SessionState, Subscription};
pub use subscriber::{BrokerSubscriber, Subscriber};

/// Header carrying the producer-assigned message id.
pub const HEADER_MSG_ID: &str = "x-msg-id";

/// Header carrying the causal trace id.
pub const HEADER_TRACE_ID: &str = "x-trace-id";
