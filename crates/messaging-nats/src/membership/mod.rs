use crate::broker::Error;

use std::fmt::{Debug, Formatter, Result as FmtResult};

use async_nats::HeaderValue;
use async_nats::jetstream::consumer::{Consumer, pull};
use async_nats::jetstream::{AckKind, Message};
use async_trait::async_trait;
use courier_messaging::{Claim, Delivery, Membership};
use futures::StreamExt;
use tracing::debug;

/// A durable pull consumer acting as one member of a queue group.
///
/// JetStream has no partitions, so every member holds the single claim on
/// the destination and the server spreads records across members.
pub struct NatsMembership {
    consumer: Consumer<pull::Config>,
    destination: String,
    messages: Option<pull::Stream>,
}

impl Debug for NatsMembership {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("NatsMembership")
            .field("destination", &self.destination)
            .field("streaming", &self.messages.is_some())
            .finish_non_exhaustive()
    }
}

impl NatsMembership {
    pub(crate) fn new(destination: &str, consumer: Consumer<pull::Config>) -> Self {
        Self {
            consumer,
            destination: destination.to_string(),
            messages: None,
        }
    }
}

#[async_trait]
impl Membership for NatsMembership {
    type Error = Error;

    type Delivery = NatsDelivery;

    async fn claims(&mut self) -> Result<Vec<Claim>, Self::Error> {
        let messages = self
            .consumer
            .messages()
            .await
            .map_err(|e| Error::Stream(e.kind()))?;
        self.messages = Some(messages);

        Ok(vec![Claim::new(self.destination.clone(), 0)])
    }

    async fn next_delivery(&mut self) -> Result<Option<Self::Delivery>, Self::Error> {
        let Some(messages) = self.messages.as_mut() else {
            return Ok(None);
        };

        match messages.next().await {
            Some(Ok(message)) => Ok(Some(NatsDelivery {
                claim: Claim::new(self.destination.clone(), 0),
                message,
            })),
            Some(Err(e)) => Err(Error::Messages(e.kind())),
            None => {
                debug!("message stream on {} ended", self.destination);
                self.messages = None;
                Ok(None)
            }
        }
    }

    async fn leave(mut self) -> Result<(), Self::Error> {
        self.messages.take();
        debug!("stopped pulling from {}", self.destination);

        Ok(())
    }
}

/// A JetStream message awaiting acknowledgement.
pub struct NatsDelivery {
    claim: Claim,
    message: Message,
}

impl Debug for NatsDelivery {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("NatsDelivery")
            .field("claim", &self.claim)
            .field("subject", &self.message.subject)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Delivery for NatsDelivery {
    type Error = Error;

    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.message
            .headers
            .as_ref()?
            .get(name)
            .map(HeaderValue::as_str)
    }

    fn timestamp(&self) -> i64 {
        self.message
            .info()
            .map_or(0, |info| info.published.unix_timestamp())
    }

    fn claim(&self) -> Claim {
        self.claim.clone()
    }

    async fn ack(self) -> Result<(), Self::Error> {
        self.message.ack().await.map_err(Error::Ack)
    }

    async fn nak(self) -> Result<(), Self::Error> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(Error::Ack)
    }
}
