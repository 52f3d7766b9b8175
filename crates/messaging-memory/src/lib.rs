//! In-process broker for the messaging crate.
//!
//! Models a partitioned log with consumer groups closely enough to drive the
//! full producer / subscriber stack in tests and local development, and lets
//! tests inject the failures real brokers produce.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// The in-process broker.
pub mod broker;

/// Consumer group membership and deliveries.
pub mod membership;

mod state;

pub use broker::{Error, MemoryBroker, MemoryBrokerOptions};
pub use membership::{MemoryDelivery, MemoryMembership};
