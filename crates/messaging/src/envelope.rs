use crate::broker::Delivery;
use crate::{HEADER_MSG_ID, HEADER_TRACE_ID};

/// A decoded record handed to subscription handlers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Envelope<T> {
    /// Identifier assigned by the producer at publish time.
    pub message_id: String,

    /// Causal trace identifier propagated from the producer (empty if absent).
    pub trace_id: String,

    /// Arrival time in unix seconds.
    pub timestamp: i64,

    /// The decoded payload.
    pub body: T,
}

impl<T> Envelope<T> {
    /// Assembles an envelope from a delivery's transport metadata and its decoded body.
    pub fn from_delivery<D>(delivery: &D, body: T) -> Self
    where
        D: Delivery,
    {
        Self {
            message_id: delivery.header(HEADER_MSG_ID).unwrap_or_default().to_string(),
            trace_id: delivery
                .header(HEADER_TRACE_ID)
                .unwrap_or_default()
                .to_string(),
            timestamp: delivery.timestamp(),
            body,
        }
    }
}
