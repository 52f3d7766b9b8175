use crate::destination::Destination;

use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};

use async_trait::async_trait;
use bytes::Bytes;

/// Transport headers attached to a record.
pub type Headers = HashMap<String, String>;

/// Marker trait for broker errors.
pub trait BrokerError: Error + Send + Sync + 'static {}

/// The slice of a destination (e.g. a partition) assigned to a group member.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Claim {
    /// Destination the claim belongs to.
    pub destination: String,

    /// Partition index (always `0` for backends without partitions).
    pub partition: i32,
}

impl Claim {
    /// Creates a new claim.
    #[must_use]
    pub fn new<N>(destination: N, partition: i32) -> Self
    where
        N: Into<String>,
    {
        Self {
            destination: destination.into(),
            partition,
        }
    }
}

impl Display for Claim {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}[{}]", self.destination, self.partition)
    }
}

/// A record on its way to the broker.
#[derive(Clone, Debug)]
pub struct OutboundRecord {
    /// Destination name.
    pub destination: String,

    /// Optional partition / ordering key.
    pub key: Option<String>,

    /// Encoded payload.
    pub payload: Bytes,

    /// Transport headers.
    pub headers: Headers,
}

/// The wire-level client a [`Connection`](crate::connection::Connection) drives.
///
/// Implementations know how to talk to one kind of broker; naming,
/// provisioning memoization, encoding and delivery semantics live above them.
#[async_trait]
pub trait Broker
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the broker.
    type Error: BrokerError;

    /// The consumer group membership type.
    type Membership: Membership<Error = Self::Error>;

    /// Short backend name used in logs.
    fn kind(&self) -> &'static str;

    /// Name of the broker resource that must exist before `destination` is usable.
    fn provisioning_key(&self, destination: &Destination) -> String {
        destination.name().to_string()
    }

    /// Whether the resource named by `key` already exists.
    async fn exists(&self, key: &str) -> Result<bool, Self::Error>;

    /// Creates the resource named by `key` for `destination`.
    async fn create(&self, key: &str, destination: &Destination) -> Result<(), Self::Error>;

    /// Sends a record and waits for the broker to accept it.
    async fn publish(&self, record: OutboundRecord) -> Result<(), Self::Error>;

    /// Joins `group` as a consumer of `destination`.
    async fn join_group(
        &self,
        destination: &Destination,
        group: &str,
    ) -> Result<Self::Membership, Self::Error>;

    /// Flushes pending sends and releases the connection.
    async fn close(&self) -> Result<(), Self::Error>;
}

/// Membership of a consumer group.
#[async_trait]
pub trait Membership
where
    Self: Send + 'static,
{
    /// The error type for the membership.
    type Error: BrokerError;

    /// The delivered record type.
    type Delivery: Delivery<Error = Self::Error>;

    /// Waits until the broker has assigned claims for the current generation.
    async fn claims(&mut self) -> Result<Vec<Claim>, Self::Error>;

    /// Waits for the next record.
    ///
    /// `Ok(None)` means the current generation ended (e.g. a rebalance) and
    /// [`claims`](Self::claims) must be awaited again.
    async fn next_delivery(&mut self) -> Result<Option<Self::Delivery>, Self::Error>;

    /// Leaves the group and releases the session.
    async fn leave(self) -> Result<(), Self::Error>;
}

/// A record delivered to a group member, awaiting settlement.
#[async_trait]
pub trait Delivery
where
    Self: Sized + Send + 'static,
{
    /// The error type for settlement.
    type Error: BrokerError;

    /// Raw payload bytes.
    fn payload(&self) -> &[u8];

    /// Looks up a transport header.
    fn header(&self, name: &str) -> Option<&str>;

    /// Arrival time in unix seconds.
    fn timestamp(&self) -> i64;

    /// The claim the record was delivered on.
    fn claim(&self) -> Claim;

    /// Marks the record as processed.
    async fn ack(self) -> Result<(), Self::Error>;

    /// Rejects the record so the broker redelivers it.
    async fn nak(self) -> Result<(), Self::Error>;

    /// Moves past the record without acknowledging it.
    ///
    /// The broker's own redelivery policy decides when it is seen again.
    async fn abandon(self) -> Result<(), Self::Error> {
        Ok(())
    }
}
