use crate::broker::{Error, MemoryBroker};
use crate::state::{Position, StoredRecord};

use async_trait::async_trait;
use courier_messaging::{Claim, Delivery, Membership};
use tracing::debug;

fn claim_of(topic: &str, partition: usize) -> Claim {
    Claim::new(topic, i32::try_from(partition).unwrap_or(i32::MAX))
}

/// A member of a consumer group on the in-process broker.
#[derive(Debug)]
pub struct MemoryMembership {
    assigned: Vec<usize>,
    broker: MemoryBroker,
    generation: Option<u64>,
    group: String,
    member: u64,
    topic: String,
}

impl MemoryMembership {
    pub(crate) fn new(broker: MemoryBroker, topic: &str, group: &str, member: u64) -> Self {
        Self {
            assigned: Vec::new(),
            broker,
            generation: None,
            group: group.to_string(),
            member,
            topic: topic.to_string(),
        }
    }

    fn unknown_group(&self) -> Error {
        Error::UnknownGroup {
            topic: self.topic.clone(),
            group: self.group.clone(),
        }
    }
}

#[async_trait]
impl Membership for MemoryMembership {
    type Error = Error;

    type Delivery = MemoryDelivery;

    async fn claims(&mut self) -> Result<Vec<Claim>, Self::Error> {
        let mut state = self.broker.state().lock().await;

        let Some(group) = state
            .topics
            .get_mut(&self.topic)
            .and_then(|t| t.groups.get_mut(&self.group))
        else {
            return Err(self.unknown_group());
        };

        self.generation = Some(group.generation);
        self.assigned = group.assigned(self.member);
        drop(state);

        debug!(
            "member {} of {} claimed partitions {:?} of {}",
            self.member, self.group, self.assigned, self.topic
        );

        Ok(self
            .assigned
            .iter()
            .map(|p| claim_of(&self.topic, *p))
            .collect())
    }

    async fn next_delivery(&mut self) -> Result<Option<Self::Delivery>, Self::Error> {
        loop {
            let notified = self.broker.notify().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.broker.is_closed() {
                return Err(Error::Closed);
            }

            let mut state = self.broker.state().lock().await;

            let Some(topic) = state.topics.get_mut(&self.topic) else {
                return Err(Error::UnknownTopic(self.topic.clone()));
            };
            let Some(group) = topic.groups.get_mut(&self.group) else {
                return Err(self.unknown_group());
            };

            if Some(group.generation) != self.generation {
                return Ok(None);
            }

            if let Some(position) = group.take_next(&self.assigned, &topic.log) {
                let record = topic.log[position.0][position.1].clone();
                drop(state);

                return Ok(Some(MemoryDelivery {
                    broker: self.broker.clone(),
                    group: self.group.clone(),
                    position,
                    record,
                    topic: self.topic.clone(),
                }));
            }
            drop(state);

            notified.await;
        }
    }

    async fn leave(self) -> Result<(), Self::Error> {
        let mut state = self.broker.state().lock().await;

        if let Some(group) = state
            .topics
            .get_mut(&self.topic)
            .and_then(|t| t.groups.get_mut(&self.group))
        {
            group.leave(self.member);
        }
        drop(state);

        debug!("member {} left {} on {}", self.member, self.group, self.topic);
        self.broker.notify().notify_waiters();

        Ok(())
    }
}

/// A record handed to a member of a group on the in-process broker.
///
/// Rejected records are redelivered before newer ones on the same partition.
/// Abandoned records are not delivered to the group again.
#[derive(Debug)]
pub struct MemoryDelivery {
    broker: MemoryBroker,
    group: String,
    position: Position,
    record: StoredRecord,
    topic: String,
}

impl MemoryDelivery {
    async fn settle<F>(&self, settle: F)
    where
        F: FnOnce(&mut crate::state::GroupState, Position) + Send,
    {
        let mut state = self.broker.state().lock().await;

        if let Some(group) = state
            .topics
            .get_mut(&self.topic)
            .and_then(|t| t.groups.get_mut(&self.group))
        {
            settle(group, self.position);
        }
    }
}

#[async_trait]
impl Delivery for MemoryDelivery {
    type Error = Error;

    fn payload(&self) -> &[u8] {
        &self.record.payload
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.record.headers.get(name).map(String::as_str)
    }

    fn timestamp(&self) -> i64 {
        self.record.timestamp
    }

    fn claim(&self) -> Claim {
        claim_of(&self.topic, self.position.0)
    }

    async fn ack(self) -> Result<(), Self::Error> {
        self.broker.take_ack_fault()?;

        self.settle(|group, position| group.settle(position)).await;
        self.broker.record_ack();

        Ok(())
    }

    async fn nak(self) -> Result<(), Self::Error> {
        self.broker.take_ack_fault()?;

        self.settle(|group, position| group.reject(position)).await;
        self.broker.record_nak();
        self.broker.notify().notify_waiters();

        Ok(())
    }

    async fn abandon(self) -> Result<(), Self::Error> {
        self.settle(|group, position| group.settle(position)).await;
        self.broker.record_abandon();

        Ok(())
    }
}
