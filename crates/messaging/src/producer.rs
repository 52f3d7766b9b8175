use crate::broker::{Broker, Headers, OutboundRecord};
use crate::connection::Connection;
use crate::context::TraceContext;
use crate::destination::Destination;
use crate::error::Error;
use crate::payload::{self, Payload};
use crate::{HEADER_MSG_ID, HEADER_TRACE_ID};

use std::fmt::{Debug, Formatter, Result as FmtResult};

use async_trait::async_trait;
use tracing::debug;

/// Capability to publish typed messages.
#[async_trait]
pub trait Producer
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// Publishes `payload` to the destination resolved from its type.
    ///
    /// Returns the generated message id.
    async fn publish<M>(&self, ctx: &TraceContext, payload: &M) -> Result<String, Error>
    where
        M: Payload,
    {
        self.publish_to(ctx, &Destination::of::<M>(), None, payload)
            .await
    }

    /// Publishes `payload` to an explicit destination with an optional ordering key.
    ///
    /// Returns the generated message id.
    async fn publish_to<M>(
        &self,
        ctx: &TraceContext,
        destination: &Destination,
        key: Option<&str>,
        payload: &M,
    ) -> Result<String, Error>
    where
        M: Payload;

    /// Flushes pending sends and releases the connection.
    async fn shutdown(&self) -> Result<(), Error>;
}

/// A [`Producer`] over any [`Broker`].
pub struct BrokerProducer<B>
where
    B: Broker,
{
    connection: Connection<B>,
}

impl<B> Clone for BrokerProducer<B>
where
    B: Broker,
{
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
        }
    }
}

impl<B> Debug for BrokerProducer<B>
where
    B: Broker,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("BrokerProducer")
            .field("connection", &self.connection)
            .finish()
    }
}

impl<B> BrokerProducer<B>
where
    B: Broker,
{
    /// Creates a producer on `connection`.
    #[must_use]
    pub const fn new(connection: Connection<B>) -> Self {
        Self { connection }
    }

    /// The connection this producer publishes through.
    #[must_use]
    pub const fn connection(&self) -> &Connection<B> {
        &self.connection
    }
}

#[async_trait]
impl<B> Producer for BrokerProducer<B>
where
    B: Broker,
{
    async fn publish_to<M>(
        &self,
        ctx: &TraceContext,
        destination: &Destination,
        key: Option<&str>,
        payload: &M,
    ) -> Result<String, Error>
    where
        M: Payload,
    {
        self.connection.ensure_exists(destination).await?;

        let payload = payload::encode(payload).map_err(|source| Error::SerializationFailed {
            destination: destination.name().to_string(),
            source,
        })?;

        let message_id = self.connection.ids().generate();

        let mut headers = Headers::new();
        headers.insert(HEADER_MSG_ID.to_string(), message_id.clone());
        headers.insert(HEADER_TRACE_ID.to_string(), ctx.trace_id().to_string());

        self.connection
            .broker()
            .publish(OutboundRecord {
                destination: destination.name().to_string(),
                key: key.map(ToString::to_string),
                payload,
                headers,
            })
            .await
            .map_err(|e| Error::SendFailed {
                destination: destination.name().to_string(),
                source: Box::new(e),
            })?;

        debug!(
            message_id = %message_id,
            trace_id = %ctx.trace_id(),
            "published message to {}",
            destination
        );

        Ok(message_id)
    }

    async fn shutdown(&self) -> Result<(), Error> {
        self.connection.release().await
    }
}
