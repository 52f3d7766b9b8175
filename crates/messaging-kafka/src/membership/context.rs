use courier_messaging::Claim;
use rdkafka::client::ClientContext;
use rdkafka::consumer::{BaseConsumer, ConsumerContext, Rebalance};
use rdkafka::topic_partition_list::TopicPartitionList;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Group coordination events seen by one consumer.
#[derive(Debug)]
pub enum RebalanceEvent {
    /// Partitions were assigned.
    Assigned(Vec<Claim>),

    /// The current assignment was revoked.
    Revoked,

    /// The coordinator reported an error.
    Failed(String),
}

fn claims(partitions: &TopicPartitionList) -> Vec<Claim> {
    partitions
        .elements()
        .iter()
        .map(|elem| Claim::new(elem.topic(), elem.partition()))
        .collect()
}

/// Forwards rebalance callbacks to the membership that owns the consumer.
pub struct RebalanceContext {
    events: mpsc::UnboundedSender<RebalanceEvent>,
}

impl RebalanceContext {
    pub(crate) const fn new(events: mpsc::UnboundedSender<RebalanceEvent>) -> Self {
        Self { events }
    }

    fn forward(&self, event: RebalanceEvent) {
        if self.events.send(event).is_err() {
            warn!("rebalance event dropped: membership gone");
        }
    }
}

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(partitions) => {
                let claims = claims(partitions);
                info!("assigned {} partition(s)", claims.len());
                self.forward(RebalanceEvent::Assigned(claims));
            }
            Rebalance::Revoke(partitions) => {
                info!("revoked {} partition(s)", partitions.count());
                self.forward(RebalanceEvent::Revoked);
            }
            Rebalance::Error(e) => {
                self.forward(RebalanceEvent::Failed(e.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rdkafka::Offset;

    #[test]
    fn test_claims_from_partition_list() {
        let mut partitions = TopicPartitionList::new();
        partitions.add_partition("billing.order", 0);
        partitions
            .add_partition_offset("billing.order", 2, Offset::Beginning)
            .unwrap();

        let claims = claims(&partitions);
        assert_eq!(
            claims,
            vec![
                Claim::new("billing.order", 0),
                Claim::new("billing.order", 2)
            ]
        );
    }

    #[test]
    fn test_forward_survives_dropped_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        let context = RebalanceContext::new(tx);
        drop(rx);

        context.forward(RebalanceEvent::Revoked);
    }
}
