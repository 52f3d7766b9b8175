mod context;

pub use context::{RebalanceContext, RebalanceEvent};

use crate::broker::Error;

use std::collections::VecDeque;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_messaging::{Claim, Delivery, Membership};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message, OwnedMessage};
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, warn};

type GroupConsumer = StreamConsumer<RebalanceContext>;

/// One consumer in a Kafka consumer group.
///
/// Records fetched while an assignment is still being announced are buffered
/// and handed out first.
pub struct KafkaMembership {
    consumer: Arc<GroupConsumer>,
    events: mpsc::UnboundedReceiver<RebalanceEvent>,
    operation_timeout: Duration,
    pending: VecDeque<OwnedMessage>,
}

impl Debug for KafkaMembership {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("KafkaMembership")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl KafkaMembership {
    pub(crate) fn new(
        consumer: GroupConsumer,
        events: mpsc::UnboundedReceiver<RebalanceEvent>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            consumer: Arc::new(consumer),
            events,
            operation_timeout,
            pending: VecDeque::new(),
        }
    }

    /// Applies a mid-generation event; returns whether the generation ended.
    fn apply(&mut self, event: RebalanceEvent) -> bool {
        match event {
            RebalanceEvent::Revoked => {
                self.pending.clear();
                true
            }
            RebalanceEvent::Assigned(claims) => {
                debug!("assignment extended by {} partition(s)", claims.len());
                false
            }
            RebalanceEvent::Failed(e) => {
                warn!("rebalance error: {}", e);
                false
            }
        }
    }

    fn delivery(&self, message: OwnedMessage) -> KafkaDelivery {
        KafkaDelivery {
            claim: Claim::new(message.topic(), message.partition()),
            consumer: self.consumer.clone(),
            message,
            operation_timeout: self.operation_timeout,
        }
    }
}

#[async_trait]
impl Membership for KafkaMembership {
    type Error = Error;

    type Delivery = KafkaDelivery;

    async fn claims(&mut self) -> Result<Vec<Claim>, Self::Error> {
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(RebalanceEvent::Assigned(claims)) => return Ok(claims),
                    Some(RebalanceEvent::Revoked) => self.pending.clear(),
                    Some(RebalanceEvent::Failed(e)) => return Err(Error::Rebalance(e)),
                    None => return Err(Error::RebalanceClosed),
                },
                message = self.consumer.recv() => {
                    let message = message.map_err(Error::Receive)?.detach();
                    self.pending.push_back(message);
                }
            }
        }
    }

    async fn next_delivery(&mut self) -> Result<Option<Self::Delivery>, Self::Error> {
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    if self.apply(event) {
                        return Ok(None);
                    }
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => return Err(Error::RebalanceClosed),
            }

            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(self.delivery(message)));
            }

            tokio::select! {
                event = self.events.recv() => {
                    let event = event.ok_or(Error::RebalanceClosed)?;
                    if self.apply(event) {
                        return Ok(None);
                    }
                }
                message = self.consumer.recv() => {
                    let message = message.map_err(Error::Receive)?.detach();
                    return Ok(Some(self.delivery(message)));
                }
            }
        }
    }

    async fn leave(self) -> Result<(), Self::Error> {
        self.consumer.unsubscribe();
        debug!("consumer left its group");

        Ok(())
    }
}

/// A fetched Kafka record awaiting its offset commit.
pub struct KafkaDelivery {
    claim: Claim,
    consumer: Arc<GroupConsumer>,
    message: OwnedMessage,
    operation_timeout: Duration,
}

impl Debug for KafkaDelivery {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("KafkaDelivery")
            .field("claim", &self.claim)
            .field("offset", &self.message.offset())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Delivery for KafkaDelivery {
    type Error = Error;

    fn payload(&self) -> &[u8] {
        self.message.payload().unwrap_or_default()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.message
            .headers()?
            .iter()
            .find(|header| header.key == name)
            .and_then(|header| header.value)
            .and_then(|value| std::str::from_utf8(value).ok())
    }

    fn timestamp(&self) -> i64 {
        self.message
            .timestamp()
            .to_millis()
            .map_or(0, |millis| millis / 1000)
    }

    fn claim(&self) -> Claim {
        self.claim.clone()
    }

    async fn ack(self) -> Result<(), Self::Error> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                self.message.topic(),
                self.message.partition(),
                Offset::Offset(self.message.offset() + 1),
            )
            .map_err(Error::Commit)?;

        let consumer = self.consumer;
        tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync))
            .await?
            .map_err(Error::Commit)
    }

    async fn nak(self) -> Result<(), Self::Error> {
        let consumer = self.consumer;
        let topic = self.message.topic().to_string();
        let partition = self.message.partition();
        let offset = Offset::Offset(self.message.offset());
        let timeout = self.operation_timeout;

        tokio::task::spawn_blocking(move || consumer.seek(&topic, partition, offset, timeout))
            .await?
            .map_err(Error::Seek)
    }
}
