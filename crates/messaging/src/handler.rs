use crate::envelope::Envelope;
use crate::payload::Payload;

use std::future::Future;

use async_trait::async_trait;

/// Processes delivered messages for a subscription.
///
/// Returning `true` acknowledges the record; `false` rejects it so the
/// broker redelivers it. Delivery is at-least-once, so handlers must tolerate
/// seeing the same record more than once.
#[async_trait]
pub trait Handler<T>
where
    Self: Send + Sync + 'static,
    T: Payload,
{
    /// Handles one message.
    async fn handle(&self, envelope: Envelope<T>) -> bool;
}

#[async_trait]
impl<T, F, Fut> Handler<T> for F
where
    T: Payload,
    F: Fn(Envelope<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    async fn handle(&self, envelope: Envelope<T>) -> bool {
        self(envelope).await
    }
}
