//! Requires a broker at `KAFKA_BROKERS` (default `localhost:9092`) with at
//! least three brokers, or topics created with a lower replication factor.

use std::time::Duration;

use courier_messaging::{
    Connection, ConnectionOptions, Destination, Envelope, MessagingConfig, Payload, Producer,
    Subscriber, TraceContext,
};
use courier_messaging_kafka::KafkaBroker;
use serde::{Deserialize, Serialize};
use serial_test::serial;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
struct Order {
    #[serde(rename = "Field")]
    field: String,
}

impl Payload for Order {
    fn module() -> &'static str {
        "courier-live"
    }
}

async fn connect() -> Connection<KafkaBroker> {
    let servers = std::env::var("KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string());
    let config = MessagingConfig::new(servers, "courier-live");

    let broker = KafkaBroker::connect(&config).await.unwrap();

    Connection::new(broker, ConnectionOptions::from_config(&config))
}

#[tokio::test]
#[serial]
#[ignore = "requires a running Kafka cluster"]
async fn test_publish_and_consume_keyed() {
    let connection = connect().await;
    let subscriber = connection.subscriber::<Order>();
    let destination = Destination::of::<Order>().with_replication(1);
    let (tx, mut rx) = mpsc::unbounded_channel();

    subscriber
        .subscribe_to(destination.clone(), "audit", move |envelope: Envelope<Order>| {
            let tx = tx.clone();
            async move { tx.send(envelope.body.field).is_ok() }
        })
        .await
        .unwrap();

    let ctx = TraceContext::new("live-trace");
    for field in ["first", "second", "third"] {
        subscriber
            .publish_to(
                &ctx,
                &destination,
                Some("customer-7"),
                &Order {
                    field: field.to_string(),
                },
            )
            .await
            .unwrap();
    }

    let mut observed = Vec::new();
    for _ in 0..3 {
        observed.push(
            timeout(Duration::from_secs(30), rx.recv())
                .await
                .unwrap()
                .unwrap(),
        );
    }
    assert_eq!(observed, vec!["first", "second", "third"]);

    subscriber.shutdown().await.unwrap();
}
