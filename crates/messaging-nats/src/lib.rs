//! NATS JetStream implementation of the messaging crate.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// JetStream broker client.
pub mod broker;

/// Durable pull consumers as group memberships.
pub mod membership;

pub use broker::{Error, NatsBroker, NatsBrokerOptions};
pub use membership::{NatsDelivery, NatsMembership};

/// Maximum age of records kept on a provisioned stream.
pub const STREAM_MAX_AGE: std::time::Duration = std::time::Duration::from_secs(365 * 24 * 60 * 60);

/// Replaces characters JetStream rejects in stream and consumer names.
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '.' | '*' | '>' | '/' | '\\' | ' ' => '_',
            c => c,
        })
        .collect()
}
