use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use courier_messaging::{
    Connection, ConnectionOptions, Destination, Envelope, ErrorKind, Payload, Producer,
    SessionState, Subscriber, TraceContext,
};
use courier_messaging_memory::{MemoryBroker, MemoryBrokerOptions};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
struct Order {
    #[serde(rename = "Field")]
    field: String,
}

impl Payload for Order {
    fn module() -> &'static str {
        "billing"
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
struct Ledger {
    cells: HashMap<(i32, i32), String>,
}

impl Payload for Ledger {
    fn module() -> &'static str {
        "billing"
    }
}

fn order(field: &str) -> Order {
    Order {
        field: field.to_string(),
    }
}

fn connect(broker: &MemoryBroker) -> Connection<MemoryBroker> {
    Connection::new(
        broker.clone(),
        ConnectionOptions {
            shutdown_timeout: Duration::from_secs(2),
            ..ConnectionOptions::new("billing")
        },
    )
}

async fn recv<T>(receiver: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(Duration::from_secs(2), receiver.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("handler channel closed")
}

async fn eventually<F>(check: F)
where
    F: Fn() -> bool,
{
    timeout(Duration::from_secs(2), async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_destination_resolved_from_module_and_type() {
    let broker = MemoryBroker::default();
    let producer = connect(&broker).producer();

    assert_eq!(Destination::of::<Order>().name(), "billing.order");

    producer
        .publish(&TraceContext::empty(), &order("x"))
        .await
        .unwrap();

    assert_eq!(broker.record_count("billing.order").await, 1);
}

#[tokio::test]
async fn test_concurrent_first_publish_creates_once() {
    let broker = MemoryBroker::new(MemoryBrokerOptions {
        create_delay: Duration::from_millis(50),
    });
    let connection = connect(&broker);
    let first = connection.producer();
    let second = connection.producer();
    let ctx = TraceContext::new("trace-b");

    let order_a = order("a");
    let order_b = order("b");
    let (a, b) = tokio::join!(
        first.publish(&ctx, &order_a),
        second.publish(&ctx, &order_b)
    );

    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(broker.create_calls(), 1);
    assert_eq!(broker.record_count("billing.order").await, 2);

    first.publish(&ctx, &order("c")).await.unwrap();
    assert_eq!(broker.exists_calls(), 1);
}

#[tokio::test]
async fn test_corrupt_record_skipped_and_consumption_continues() {
    let broker = MemoryBroker::default();
    let connection = connect(&broker);
    let subscriber = connection.subscriber::<Order>();
    let destination = Destination::of::<Order>().with_partitions(1);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let calls = Arc::new(AtomicUsize::new(0));
    let handler_calls = calls.clone();

    let subscription = subscriber
        .subscribe_to(destination.clone(), "audit", move |envelope: Envelope<Order>| {
            let tx = tx.clone();
            let calls = handler_calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tx.send(envelope.body).is_ok()
            }
        })
        .await
        .unwrap();

    broker
        .inject_raw("billing.order", &b"\x00\x01not json"[..])
        .await
        .unwrap();
    subscriber
        .publish_to(&TraceContext::empty(), &destination, None, &order("after"))
        .await
        .unwrap();

    assert_eq!(recv(&mut rx).await, order("after"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(broker.abandoned(), 1);
    assert!(subscription.is_ready());

    subscriber.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rejected_record_is_redelivered() {
    let broker = MemoryBroker::default();
    let subscriber = connect(&broker).subscriber::<Order>();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let attempts = Arc::new(AtomicUsize::new(0));

    subscriber
        .subscribe("audit", move |envelope: Envelope<Order>| {
            let tx = tx.clone();
            let attempts = attempts.clone();
            async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                tx.send(envelope).ok();
                attempt > 0
            }
        })
        .await
        .unwrap();

    let message_id = subscriber
        .publish(&TraceContext::empty(), &order("retry"))
        .await
        .unwrap();

    let first = recv(&mut rx).await;
    let second = recv(&mut rx).await;

    assert_eq!(first.body, order("retry"));
    assert_eq!(second.body, first.body);
    assert_eq!(first.message_id, message_id);
    assert_eq!(second.message_id, message_id);

    eventually(|| broker.acks() == 1).await;
    assert_eq!(broker.naks(), 1);

    subscriber.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_while_waiting_releases_once() {
    let broker = MemoryBroker::default();
    let connection = connect(&broker);
    let subscriber = connection.subscriber::<Order>();
    let producer = connection.producer();

    let subscription = subscriber
        .subscribe("audit", |_: Envelope<Order>| async { true })
        .await
        .unwrap();
    assert_eq!(subscription.state(), SessionState::Ready);

    sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    subscriber.shutdown().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(subscription.state(), SessionState::Terminated);
    assert_eq!(subscriber.active_sessions(), 0);
    assert_eq!(broker.close_calls(), 1);

    subscriber.shutdown().await.unwrap();
    producer.shutdown().await.unwrap();
    assert_eq!(broker.close_calls(), 1);
    assert!(connection.is_released());
}

#[tokio::test]
async fn test_envelope_carries_trace_and_message_ids() {
    let broker = MemoryBroker::default();
    let subscriber = connect(&broker).subscriber::<Order>();
    let (tx, mut rx) = mpsc::unbounded_channel();

    subscriber
        .subscribe("audit", move |envelope: Envelope<Order>| {
            let tx = tx.clone();
            async move { tx.send(envelope).is_ok() }
        })
        .await
        .unwrap();

    let message_id = subscriber
        .publish(&TraceContext::new("trace-42"), &order("traced"))
        .await
        .unwrap();

    let envelope = recv(&mut rx).await;
    assert_eq!(envelope.message_id, message_id);
    assert_eq!(envelope.trace_id, "trace-42");
    assert!(envelope.timestamp > 0);

    subscriber.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_keyed_records_observed_in_publish_order() {
    let broker = MemoryBroker::default();
    let subscriber = connect(&broker).subscriber::<Order>();
    let destination = Destination::of::<Order>();
    let (tx, mut rx) = mpsc::unbounded_channel();

    subscriber
        .subscribe("audit", move |envelope: Envelope<Order>| {
            let tx = tx.clone();
            async move { tx.send(envelope.body.field).is_ok() }
        })
        .await
        .unwrap();

    let ctx = TraceContext::empty();
    let expected: Vec<String> = (0..20).map(|i| format!("step-{i}")).collect();
    for field in &expected {
        subscriber
            .publish_to(&ctx, &destination, Some("customer-7"), &order(field))
            .await
            .unwrap();
    }

    let mut observed = Vec::new();
    for _ in 0..expected.len() {
        observed.push(recv(&mut rx).await);
    }

    assert_eq!(observed, expected);

    subscriber.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rebalance_reassigns_and_resumes() {
    let broker = MemoryBroker::default();
    let subscriber = connect(&broker).subscriber::<Order>();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscription = subscriber
        .subscribe("audit", move |envelope: Envelope<Order>| {
            let tx = tx.clone();
            async move { tx.send(envelope.body).is_ok() }
        })
        .await
        .unwrap();
    assert_eq!(subscription.group(), "billing.audit");

    broker
        .rebalance("billing.order", "billing.audit")
        .await
        .unwrap();

    subscriber
        .publish(&TraceContext::empty(), &order("after-rebalance"))
        .await
        .unwrap();

    assert_eq!(recv(&mut rx).await, order("after-rebalance"));
    assert_eq!(subscription.ready().await, SessionState::Ready);

    subscriber.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_group_members_share_the_work() {
    let broker = MemoryBroker::default();
    let connection = connect(&broker);
    let first = connection.subscriber::<Order>();
    let second = connection.subscriber::<Order>();
    let (tx, mut rx) = mpsc::unbounded_channel();

    for subscriber in [&first, &second] {
        let tx = tx.clone();
        subscriber
            .subscribe("audit", move |envelope: Envelope<Order>| {
                let tx = tx.clone();
                async move { tx.send(envelope.message_id).is_ok() }
            })
            .await
            .unwrap();
    }

    let ctx = TraceContext::empty();
    let mut published = Vec::new();
    for i in 0..9 {
        published.push(first.publish(&ctx, &order(&format!("o-{i}"))).await.unwrap());
    }

    let mut received = Vec::new();
    for _ in 0..published.len() {
        received.push(recv(&mut rx).await);
    }

    published.sort();
    received.sort();
    assert_eq!(received, published);

    first.shutdown().await.unwrap();
    second.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_distinct_groups_each_receive() {
    let broker = MemoryBroker::default();
    let connection = connect(&broker);
    let audit = connection.subscriber::<Order>();
    let mailer = connection.subscriber::<Order>();
    let (tx, mut rx) = mpsc::unbounded_channel();

    for (subscriber, group) in [(&audit, "audit"), (&mailer, "mailer")] {
        let tx = tx.clone();
        subscriber
            .subscribe(group, move |_: Envelope<Order>| {
                let tx = tx.clone();
                async move { tx.send(group).is_ok() }
            })
            .await
            .unwrap();
    }

    audit
        .publish(&TraceContext::empty(), &order("fan-out"))
        .await
        .unwrap();

    let mut groups = vec![recv(&mut rx).await, recv(&mut rx).await];
    groups.sort_unstable();
    assert_eq!(groups, vec!["audit", "mailer"]);

    audit.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_ack_failure_fails_the_session() {
    let broker = MemoryBroker::default();
    let subscriber = connect(&broker).subscriber::<Order>();

    let subscription = subscriber
        .subscribe("audit", |_: Envelope<Order>| async { true })
        .await
        .unwrap();

    broker.fail_next_ack();
    subscriber
        .publish(&TraceContext::empty(), &order("doomed"))
        .await
        .unwrap();

    assert_eq!(
        timeout(Duration::from_secs(2), subscription.finished())
            .await
            .unwrap(),
        SessionState::Failed
    );
    eventually(|| subscriber.active_sessions() == 0).await;

    subscriber.shutdown().await.unwrap();
    assert_eq!(broker.close_calls(), 1);
}

#[tokio::test]
async fn test_failed_provisioning_is_retried() {
    let broker = MemoryBroker::default();
    let producer = connect(&broker).producer();
    let ctx = TraceContext::empty();

    broker.fail_next_create();
    let err = producer.publish(&ctx, &order("first")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProvisionFailed);
    assert_eq!(err.destination(), Some("billing.order"));

    producer.publish(&ctx, &order("second")).await.unwrap();
    assert_eq!(broker.create_calls(), 2);
    assert_eq!(broker.record_count("billing.order").await, 1);
}

#[tokio::test]
async fn test_publish_after_close_fails() {
    let broker = MemoryBroker::default();
    let producer = connect(&broker).producer();
    let ctx = TraceContext::empty();

    producer.publish(&ctx, &order("before")).await.unwrap();
    producer.shutdown().await.unwrap();

    let err = producer.publish(&ctx, &order("after")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SendFailed);
}

#[tokio::test]
async fn test_subscribe_after_shutdown_is_rejected() {
    let broker = MemoryBroker::default();
    let subscriber = connect(&broker).subscriber::<Order>();

    subscriber.shutdown().await.unwrap();

    let err = subscriber
        .subscribe("audit", |_: Envelope<Order>| async { true })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::JoinFailed);
}

#[tokio::test]
async fn test_unencodable_payload_is_not_sent() {
    let broker = MemoryBroker::default();
    let producer = connect(&broker).producer();

    let ledger = Ledger {
        cells: HashMap::from([((0, 1), "debit".to_string())]),
    };

    let err = producer
        .publish(&TraceContext::empty(), &ledger)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SerializationFailed);
    assert_eq!(err.destination(), Some("billing.ledger"));
    assert!(!err.is_retryable());
    assert_eq!(broker.record_count("billing.ledger").await, 0);
}

#[tokio::test]
async fn test_join_failure_is_reported_and_leaves_nothing_running() {
    let broker = MemoryBroker::default();
    let subscriber = connect(&broker).subscriber::<Order>();

    broker.fail_next_join();
    let err = subscriber
        .subscribe("audit", |_: Envelope<Order>| async { true })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::JoinFailed);
    assert_eq!(err.destination(), Some("billing.order"));
    assert_eq!(subscriber.active_sessions(), 0);

    let subscription = subscriber
        .subscribe("audit", |_: Envelope<Order>| async { true })
        .await
        .unwrap();
    assert!(subscription.is_ready());

    subscriber.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_panicking_handler_fails_the_session() {
    let broker = MemoryBroker::default();
    let connection = connect(&broker);
    let subscriber = connection.subscriber::<Order>();

    let subscription = subscriber
        .subscribe("audit", |envelope: Envelope<Order>| async move {
            assert!(envelope.body.field != "poison", "cannot handle poison");
            true
        })
        .await
        .unwrap();

    subscriber
        .publish(&TraceContext::empty(), &order("poison"))
        .await
        .unwrap();

    assert_eq!(
        timeout(Duration::from_secs(2), subscription.finished())
            .await
            .unwrap(),
        SessionState::Failed
    );
    assert_eq!(subscription.state(), SessionState::Failed);
    assert!(!subscription.is_ready());
    eventually(|| subscriber.active_sessions() == 0).await;
    assert_eq!(broker.naks(), 1);

    let replacement = connection.subscriber::<Order>();
    let (tx, mut rx) = mpsc::unbounded_channel();
    replacement
        .subscribe("audit", move |envelope: Envelope<Order>| {
            let tx = tx.clone();
            async move { tx.send(envelope.body).is_ok() }
        })
        .await
        .unwrap();

    assert_eq!(recv(&mut rx).await, order("poison"));

    replacement.shutdown().await.unwrap();
    subscriber.shutdown().await.unwrap();
}
