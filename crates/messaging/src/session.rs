use crate::broker::{Delivery, Membership};
use crate::destination::Destination;
use crate::envelope::Envelope;
use crate::error::Error;
use crate::handler::Handler;
use crate::payload::{self, Payload};

use std::any::Any;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a transient receive error before polling again.
const RECEIVE_BACKOFF: Duration = Duration::from_millis(100);

/// Lifecycle of a consumer-group session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// Waiting for the broker to assign claims.
    Joining,

    /// Claims assigned; records are being delivered.
    Ready,

    /// The previous generation ended; waiting for new claims.
    Rebalancing,

    /// Shutdown requested; leaving the group.
    Draining,

    /// Left the group cleanly.
    Terminated,

    /// Stopped on an unrecoverable error.
    Failed,
}

impl SessionState {
    /// Whether the session will never deliver again.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::Joining => "joining",
            Self::Ready => "ready",
            Self::Rebalancing => "rebalancing",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        };

        f.write_str(name)
    }
}

/// Handle to a running subscription.
#[derive(Clone, Debug)]
pub struct Subscription {
    destination: Destination,
    group: String,
    state: watch::Receiver<SessionState>,
}

impl Subscription {
    pub(crate) const fn new(
        destination: Destination,
        group: String,
        state: watch::Receiver<SessionState>,
    ) -> Self {
        Self {
            destination,
            group,
            state,
        }
    }

    /// The subscribed destination.
    #[must_use]
    pub const fn destination(&self) -> &Destination {
        &self.destination
    }

    /// The namespaced consumer group.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Current session state.
    ///
    /// A session task that is gone without finishing reports [`SessionState::Failed`].
    #[must_use]
    pub fn state(&self) -> SessionState {
        let state = *self.state.borrow();

        if self.state.has_changed().is_err() {
            settled(state)
        } else {
            state
        }
    }

    /// Whether claims are assigned and records are flowing.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Waits until the session state satisfies `predicate` and returns that state.
    ///
    /// If the session task is gone, returns the last state it published, or
    /// [`SessionState::Failed`] if that state was not a finished one.
    pub async fn wait_until<F>(&self, predicate: F) -> SessionState
    where
        F: Fn(SessionState) -> bool,
    {
        let mut state = self.state.clone();
        let reached = state.wait_for(|s| predicate(*s)).await.map(|s| *s);

        reached.unwrap_or_else(|_| settled(*state.borrow()))
    }

    /// Waits until the session is ready or finished.
    pub async fn ready(&self) -> SessionState {
        self.wait_until(|s| s == SessionState::Ready || s.is_finished())
            .await
    }

    /// Waits until the session is finished.
    pub async fn finished(&self) -> SessionState {
        self.wait_until(SessionState::is_finished).await
    }
}

const fn settled(last: SessionState) -> SessionState {
    if last.is_finished() {
        last
    } else {
        SessionState::Failed
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_default()
}

/// Drives one consumer-group membership until cancelled or failed.
pub(crate) struct SessionRunner<M, T, H>
where
    M: Membership,
    T: Payload,
    H: Handler<T>,
{
    destination: Destination,
    group: String,
    membership: M,
    handler: H,
    state: watch::Sender<SessionState>,
    shutdown_token: CancellationToken,
    _marker: PhantomData<fn() -> T>,
}

impl<M, T, H> SessionRunner<M, T, H>
where
    M: Membership,
    T: Payload,
    H: Handler<T>,
{
    pub(crate) const fn new(
        destination: Destination,
        group: String,
        membership: M,
        handler: H,
        state: watch::Sender<SessionState>,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            destination,
            group,
            membership,
            handler,
            state,
            shutdown_token,
            _marker: PhantomData,
        }
    }

    /// Runs the session to completion and leaves the group.
    pub(crate) async fn run(mut self) -> Result<(), Error> {
        let outcome = self.consume().await;

        match &outcome {
            Ok(()) => {
                self.state.send_replace(SessionState::Draining);
            }
            Err(e) => {
                error!("group {} on {} failed: {}", self.group, self.destination, e);
                self.state.send_replace(SessionState::Failed);
            }
        }

        let Self {
            destination,
            group,
            membership,
            state,
            ..
        } = self;

        if let Err(e) = membership.leave().await {
            warn!("failed to leave group {} on {}: {}", group, destination, e);
        }

        if outcome.is_ok() {
            info!("group {} on {} terminated", group, destination);
            state.send_replace(SessionState::Terminated);
        }

        outcome
    }

    async fn consume(&mut self) -> Result<(), Error> {
        loop {
            let claims = tokio::select! {
                biased;
                () = self.shutdown_token.cancelled() => return Ok(()),
                claims = self.membership.claims() => claims,
            };

            let claims = claims.map_err(|e| Error::JoinFailed {
                destination: self.destination.name().to_string(),
                group: self.group.clone(),
                source: Box::new(e),
            })?;

            info!(
                "group {} ready on {} with {} claim(s)",
                self.group,
                self.destination,
                claims.len()
            );
            self.state.send_replace(SessionState::Ready);

            loop {
                let next = tokio::select! {
                    biased;
                    () = self.shutdown_token.cancelled() => return Ok(()),
                    next = self.membership.next_delivery() => next,
                };

                match next {
                    Ok(Some(delivery)) => {
                        Self::process(&self.destination, &self.handler, delivery).await?;
                    }
                    Ok(None) => {
                        info!("group {} rebalancing on {}", self.group, self.destination);
                        self.state.send_replace(SessionState::Rebalancing);
                        break;
                    }
                    Err(e) => {
                        warn!("receive error on {}: {}", self.destination, e);

                        tokio::select! {
                            biased;
                            () = self.shutdown_token.cancelled() => return Ok(()),
                            () = tokio::time::sleep(RECEIVE_BACKOFF) => {}
                        }
                    }
                }
            }
        }
    }

    async fn process(
        destination: &Destination,
        handler: &H,
        delivery: M::Delivery,
    ) -> Result<(), Error> {
        let claim = delivery.claim();
        let ack_failed = |e: M::Error| Error::AckFailed {
            destination: destination.name().to_string(),
            source: Box::new(e),
        };

        let body = match payload::decode::<T>(delivery.payload()) {
            Ok(body) => body,
            Err(source) => {
                let err = Error::DecodeFailed {
                    destination: destination.name().to_string(),
                    source,
                };
                warn!(
                    "skipping {} byte record on {} (timestamp {}): {}",
                    delivery.payload().len(),
                    claim,
                    delivery.timestamp(),
                    err
                );

                return delivery.abandon().await.map_err(ack_failed);
            }
        };

        let envelope = Envelope::from_delivery(&delivery, body);
        let message_id = envelope.message_id.clone();

        let handled = AssertUnwindSafe(handler.handle(envelope))
            .catch_unwind()
            .await;

        let accepted = match handled {
            Ok(accepted) => accepted,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                drop(panic);

                if let Err(e) = delivery.nak().await {
                    warn!("failed to reject {} on {}: {}", message_id, claim, e);
                }

                return Err(Error::HandlerPanicked {
                    destination: destination.name().to_string(),
                    message,
                });
            }
        };

        if accepted {
            delivery.ack().await.map_err(ack_failed)?;
            debug!("acknowledged {} on {}", message_id, claim);
        } else {
            delivery.nak().await.map_err(ack_failed)?;
            debug!("rejected {} on {}; awaiting redelivery", message_id, claim);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscription_wait_until() {
        let (tx, rx) = watch::channel(SessionState::Joining);
        let subscription = Subscription::new("billing.order".into(), "billing.audit".into(), rx);
        assert!(!subscription.is_ready());

        let waiter = {
            let subscription = subscription.clone();
            tokio::spawn(async move { subscription.ready().await })
        };

        tx.send_replace(SessionState::Ready);
        assert_eq!(waiter.await.unwrap(), SessionState::Ready);
        assert!(subscription.is_ready());
    }

    #[tokio::test]
    async fn test_vanished_session_reports_failed() {
        let (tx, rx) = watch::channel(SessionState::Joining);
        let subscription = Subscription::new("billing.order".into(), "billing.audit".into(), rx);

        tx.send_replace(SessionState::Ready);
        drop(tx);

        assert_eq!(subscription.state(), SessionState::Failed);
        assert!(!subscription.is_ready());
        assert_eq!(subscription.finished().await, SessionState::Failed);
    }

    #[tokio::test]
    async fn test_terminated_survives_sender_drop() {
        let (tx, rx) = watch::channel(SessionState::Joining);
        let subscription = Subscription::new("billing.order".into(), "billing.audit".into(), rx);

        tx.send_replace(SessionState::Terminated);
        drop(tx);

        assert_eq!(subscription.state(), SessionState::Terminated);
        assert_eq!(subscription.finished().await, SessionState::Terminated);
    }

    #[test]
    fn test_panic_message() {
        let text: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(text.as_ref()), "boom");

        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(owned.as_ref()), "bang");

        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(other.as_ref()), "");
    }

    #[test]
    fn test_finished_states() {
        assert!(SessionState::Terminated.is_finished());
        assert!(SessionState::Failed.is_finished());
        assert!(!SessionState::Rebalancing.is_finished());
        assert_eq!(SessionState::Ready.to_string(), "ready");
    }
}
