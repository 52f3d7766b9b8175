use crate::broker::Broker;
use crate::connection::Connection;
use crate::context::TraceContext;
use crate::destination::{Destination, namespace_group};
use crate::error::Error;
use crate::handler::Handler;
use crate::payload::Payload;
use crate::producer::{BrokerProducer, Producer};
use crate::session::{SessionRunner, SessionState, Subscription};

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::marker::PhantomData;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Capability to join consumer groups for payloads of type `T`.
///
/// Every subscriber can also publish.
#[async_trait]
pub trait Subscriber<T>
where
    Self: Producer,
    T: Payload,
{
    /// Joins `group` on the destination resolved from `T`.
    ///
    /// Returns once the group has been assigned claims.
    async fn subscribe<H>(&self, group: &str, handler: H) -> Result<Subscription, Error>
    where
        H: Handler<T>,
    {
        self.subscribe_to(Destination::of::<T>(), group, handler)
            .await
    }

    /// Joins `group` on an explicit destination.
    ///
    /// Returns once the group has been assigned claims.
    async fn subscribe_to<H>(
        &self,
        destination: Destination,
        group: &str,
        handler: H,
    ) -> Result<Subscription, Error>
    where
        H: Handler<T>;
}

/// A [`Subscriber`] over any [`Broker`].
pub struct BrokerSubscriber<B, T>
where
    B: Broker,
    T: Payload,
{
    connection: Connection<B>,
    producer: BrokerProducer<B>,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
    _marker: PhantomData<fn() -> T>,
}

impl<B, T> Clone for BrokerSubscriber<B, T>
where
    B: Broker,
    T: Payload,
{
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            producer: self.producer.clone(),
            shutdown_token: self.shutdown_token.clone(),
            task_tracker: self.task_tracker.clone(),
            _marker: PhantomData,
        }
    }
}

impl<B, T> Debug for BrokerSubscriber<B, T>
where
    B: Broker,
    T: Payload,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("BrokerSubscriber")
            .field("connection", &self.connection)
            .field("sessions", &self.task_tracker.len())
            .field("shut_down", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl<B, T> BrokerSubscriber<B, T>
where
    B: Broker,
    T: Payload,
{
    /// Creates a subscriber on `connection`.
    #[must_use]
    pub fn new(connection: Connection<B>) -> Self {
        Self {
            producer: BrokerProducer::new(connection.clone()),
            connection,
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
            _marker: PhantomData,
        }
    }

    /// The connection this subscriber consumes through.
    #[must_use]
    pub const fn connection(&self) -> &Connection<B> {
        &self.connection
    }

    /// Number of consume loops still running.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.task_tracker.len()
    }

    fn join_failed<E>(destination: &Destination, group: &str, source: E) -> Error
    where
        E: Into<crate::error::BoxError>,
    {
        Error::JoinFailed {
            destination: destination.name().to_string(),
            group: group.to_string(),
            source: source.into(),
        }
    }
}

#[async_trait]
impl<B, T> Producer for BrokerSubscriber<B, T>
where
    B: Broker,
    T: Payload,
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
        self.producer
            .publish_to(ctx, destination, key, payload)
            .await
    }

    async fn shutdown(&self) -> Result<(), Error> {
        self.shutdown_token.cancel();
        self.task_tracker.close();

        let limit = self.connection.shutdown_timeout();
        if timeout(limit, self.task_tracker.wait()).await.is_err() {
            warn!(
                "{} consume loop(s) still running after {:?}; releasing connection anyway",
                self.task_tracker.len(),
                limit
            );
        }

        self.connection.release().await
    }
}

#[async_trait]
impl<B, T> Subscriber<T> for BrokerSubscriber<B, T>
where
    B: Broker,
    T: Payload,
{
    async fn subscribe_to<H>(
        &self,
        destination: Destination,
        group: &str,
        handler: H,
    ) -> Result<Subscription, Error>
    where
        H: Handler<T>,
    {
        let group = namespace_group(self.connection.app_name(), group);

        if self.shutdown_token.is_cancelled() {
            return Err(Self::join_failed(
                &destination,
                &group,
                "subscriber has been shut down",
            ));
        }

        self.connection.ensure_exists(&destination).await?;

        info!("joining group {} on {}", group, destination);

        let membership = self
            .connection
            .broker()
            .join_group(&destination, &group)
            .await
            .map_err(|e| Self::join_failed(&destination, &group, e))?;

        let (state_tx, state_rx) = watch::channel(SessionState::Joining);
        let runner = SessionRunner::new(
            destination.clone(),
            group.clone(),
            membership,
            handler,
            state_tx,
            self.shutdown_token.child_token(),
        );
        let handle = self.task_tracker.spawn(runner.run());

        let subscription = Subscription::new(destination, group, state_rx);

        match subscription
            .wait_until(|s| !matches!(s, SessionState::Joining | SessionState::Rebalancing))
            .await
        {
            SessionState::Ready => Ok(subscription),
            SessionState::Failed => match handle.await {
                Ok(Err(e)) => Err(e),
                Ok(Ok(())) | Err(_) => Err(Self::join_failed(
                    subscription.destination(),
                    subscription.group(),
                    "session failed before claims were assigned",
                )),
            },
            _ => Err(Self::join_failed(
                subscription.destination(),
                subscription.group(),
                "subscriber shut down while joining",
            )),
        }
    }
}
