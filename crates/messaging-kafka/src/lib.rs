//! Kafka implementation of the messaging crate.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Kafka broker client.
pub mod broker;

/// librdkafka client configuration.
pub mod config;

/// Consumer group memberships and deliveries.
pub mod membership;

pub use broker::{Error, KafkaBroker, KafkaBrokerOptions};
pub use config::client_config;
pub use membership::{KafkaDelivery, KafkaMembership};
