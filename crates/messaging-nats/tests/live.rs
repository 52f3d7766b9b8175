//! Requires a JetStream-enabled server at `NATS_URL` (default `localhost:4222`).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use courier_messaging::{
    Connection, ConnectionOptions, Envelope, MessagingConfig, Payload, Producer, Subscriber,
    TraceContext,
};
use courier_messaging_nats::NatsBroker;
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

async fn connect() -> Connection<NatsBroker> {
    let servers = std::env::var("NATS_URL").unwrap_or_else(|_| "localhost:4222".to_string());
    let config = MessagingConfig::new(servers, "courier-live");

    let broker = NatsBroker::connect(&config).await.unwrap();

    Connection::new(broker, ConnectionOptions::from_config(&config))
}

#[tokio::test]
#[serial]
#[ignore = "requires a running NATS server"]
async fn test_publish_and_consume() {
    let connection = connect().await;
    let subscriber = connection.subscriber::<Order>();
    let (tx, mut rx) = mpsc::unbounded_channel();

    subscriber
        .subscribe("audit", move |envelope: Envelope<Order>| {
            let tx = tx.clone();
            async move { tx.send(envelope).is_ok() }
        })
        .await
        .unwrap();

    let message_id = subscriber
        .publish(
            &TraceContext::new("live-trace"),
            &Order {
                field: "x".to_string(),
            },
        )
        .await
        .unwrap();

    let envelope = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(envelope.message_id, message_id);
    assert_eq!(envelope.trace_id, "live-trace");
    assert!(envelope.timestamp > 0);

    subscriber.shutdown().await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires a running NATS server"]
async fn test_rejected_message_is_redelivered() {
    let connection = connect().await;
    let subscriber = connection.subscriber::<Order>();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let seen = Arc::new(AtomicBool::new(false));

    subscriber
        .subscribe("retry", move |envelope: Envelope<Order>| {
            let tx = tx.clone();
            let seen = seen.clone();
            async move {
                tx.send(envelope).ok();
                seen.swap(true, Ordering::SeqCst)
            }
        })
        .await
        .unwrap();

    subscriber
        .publish(
            &TraceContext::empty(),
            &Order {
                field: "again".to_string(),
            },
        )
        .await
        .unwrap();

    let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    let second = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.message_id, second.message_id);

    subscriber.shutdown().await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires a running NATS server"]
async fn test_shutdown_drains_client() {
    let connection = connect().await;
    let producer = connection.producer();

    producer
        .publish(
            &TraceContext::empty(),
            &Order {
                field: "last".to_string(),
            },
        )
        .await
        .unwrap();
    producer.shutdown().await.unwrap();

    assert!(connection.is_released());

    let after_drain = connection
        .broker()
        .client()
        .publish("courier-live.order", "late".into())
        .await;
    assert!(after_drain.is_err());
}
