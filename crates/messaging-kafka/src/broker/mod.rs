mod error;

pub use error::Error;

use crate::config::client_config;
use crate::membership::{KafkaMembership, RebalanceContext};

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_messaging::{
    Broker, Destination, Error as MessagingError, HEADER_MSG_ID, MessagingConfig, OutboundRecord,
};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Cleanup policy applied to provisioned topics.
pub const CLEANUP_POLICY: &str = "compact";

/// Options for the Kafka broker.
#[derive(Clone, Debug)]
pub struct KafkaBrokerOptions {
    /// Base client settings shared by every client the broker creates.
    pub client_config: ClientConfig,

    /// Timeout for metadata, flush and seek calls.
    pub operation_timeout: Duration,
}

impl KafkaBrokerOptions {
    /// Options built from the shared messaging config.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::ConfigInvalid`] for an unusable config.
    pub fn from_config(config: &MessagingConfig) -> Result<Self, MessagingError> {
        Ok(Self {
            client_config: client_config(config)?,
            operation_timeout: Duration::from_secs(10),
        })
    }
}

/// A Kafka-backed broker.
///
/// Destinations are compacted topics; each consumer group membership gets
/// its own consumer with offsets committed explicitly per record.
#[derive(Clone)]
pub struct KafkaBroker {
    admin: Arc<AdminClient<DefaultClientContext>>,
    client_config: ClientConfig,
    operation_timeout: Duration,
    producer: FutureProducer,
}

impl Debug for KafkaBroker {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("KafkaBroker")
            .field(
                "bootstrap_servers",
                &self.client_config.get("bootstrap.servers"),
            )
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

impl KafkaBroker {
    /// Creates the producer and admin clients.
    ///
    /// librdkafka connects lazily, so this does not contact the brokers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Create`] if librdkafka rejects the settings.
    pub fn new(
        KafkaBrokerOptions {
            client_config,
            operation_timeout,
        }: KafkaBrokerOptions,
    ) -> Result<Self, Error> {
        let producer = client_config
            .clone()
            .set("acks", "all")
            .create::<FutureProducer>()
            .map_err(Error::Create)?;

        let admin = client_config
            .create::<AdminClient<DefaultClientContext>>()
            .map_err(Error::Create)?;

        Ok(Self {
            admin: Arc::new(admin),
            client_config,
            operation_timeout,
            producer,
        })
    }

    /// Creates the clients and checks the brokers are reachable.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::ConfigInvalid`] for an unusable config and
    /// [`MessagingError::ConnectFailed`] if no broker answers.
    pub async fn connect(config: &MessagingConfig) -> Result<Self, MessagingError> {
        let connect_failed = |e: Error| MessagingError::ConnectFailed {
            servers: config.servers.clone(),
            source: Box::new(e),
        };

        let broker = Self::new(KafkaBrokerOptions::from_config(config)?).map_err(connect_failed)?;
        broker.topic_names().await.map_err(connect_failed)?;

        info!("connected to Kafka at {}", config.servers);

        Ok(broker)
    }

    /// Names of all topics in the cluster.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Metadata`] if the cluster metadata cannot be fetched.
    pub async fn topic_names(&self) -> Result<Vec<String>, Error> {
        let admin = self.admin.clone();
        let timeout = self.operation_timeout;

        tokio::task::spawn_blocking(move || {
            admin.inner().fetch_metadata(None, timeout).map(|metadata| {
                metadata
                    .topics()
                    .iter()
                    .map(|topic| topic.name().to_string())
                    .collect()
            })
        })
        .await?
        .map_err(Error::Metadata)
    }

    /// Topic specification for a destination.
    #[must_use]
    pub fn new_topic<'a>(key: &'a str, destination: &Destination) -> NewTopic<'a> {
        NewTopic::new(
            key,
            destination.partition_count(),
            TopicReplication::Fixed(destination.replication_factor()),
        )
        .set("cleanup.policy", CLEANUP_POLICY)
    }
}

fn record_headers(record: &OutboundRecord) -> OwnedHeaders {
    record
        .headers
        .iter()
        .fold(OwnedHeaders::new(), |headers, (key, value)| {
            headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_str()),
            })
        })
}

/// Compacted topics reject records without a key; fall back to the message id.
fn record_key(record: &OutboundRecord) -> &str {
    record
        .key
        .as_deref()
        .or_else(|| record.headers.get(HEADER_MSG_ID).map(String::as_str))
        .unwrap_or_default()
}

#[async_trait]
impl Broker for KafkaBroker {
    type Error = Error;

    type Membership = KafkaMembership;

    fn kind(&self) -> &'static str {
        "kafka"
    }

    async fn exists(&self, key: &str) -> Result<bool, Self::Error> {
        Ok(self.topic_names().await?.iter().any(|name| name == key))
    }

    async fn create(&self, key: &str, destination: &Destination) -> Result<(), Self::Error> {
        let results = self
            .admin
            .create_topics(
                &[Self::new_topic(key, destination)],
                &AdminOptions::new().operation_timeout(Some(self.operation_timeout)),
            )
            .await
            .map_err(Error::Metadata)?;

        for result in results {
            match result {
                Ok(topic) => debug!("created topic {}", topic),
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    debug!("topic {} created concurrently", topic);
                }
                Err((topic, code)) => return Err(Error::CreateTopic(topic, code)),
            }
        }

        Ok(())
    }

    async fn publish(&self, record: OutboundRecord) -> Result<(), Self::Error> {
        let headers = record_headers(&record);
        let key = record_key(&record);

        let future_record = FutureRecord::to(&record.destination)
            .key(key)
            .payload(&record.payload[..])
            .headers(headers);

        self.producer
            .send(future_record, self.operation_timeout)
            .await
            .map_err(|(e, _)| Error::Send(e))?;

        Ok(())
    }

    async fn join_group(
        &self,
        destination: &Destination,
        group: &str,
    ) -> Result<Self::Membership, Self::Error> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let consumer: StreamConsumer<RebalanceContext> = self
            .client_config
            .clone()
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create_with_context(RebalanceContext::new(events_tx))
            .map_err(Error::Create)?;

        consumer
            .subscribe(&[destination.name()])
            .map_err(Error::Subscribe)?;

        debug!("consumer in {} subscribed to {}", group, destination);

        Ok(KafkaMembership::new(
            consumer,
            events_rx,
            self.operation_timeout,
        ))
    }

    async fn close(&self) -> Result<(), Self::Error> {
        let producer = self.producer.clone();
        let timeout = self.operation_timeout;

        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await?
            .map_err(Error::Flush)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use courier_messaging::{Headers, HEADER_TRACE_ID};

    fn record(key: Option<&str>) -> OutboundRecord {
        let mut headers = Headers::new();
        headers.insert(HEADER_MSG_ID.to_string(), "m-1".to_string());
        headers.insert(HEADER_TRACE_ID.to_string(), "t-1".to_string());

        OutboundRecord {
            destination: "billing.order".to_string(),
            key: key.map(ToString::to_string),
            payload: b"{}".as_slice().into(),
            headers,
        }
    }

    #[test]
    fn test_record_key_falls_back_to_message_id() {
        assert_eq!(record_key(&record(Some("customer-7"))), "customer-7");
        assert_eq!(record_key(&record(None)), "m-1");
    }

    #[test]
    fn test_record_headers() {
        use rdkafka::message::Headers as _;

        let headers = record_headers(&record(None));
        assert_eq!(headers.count(), 2);

        let trace = headers
            .iter()
            .find(|h| h.key == HEADER_TRACE_ID)
            .and_then(|h| h.value);
        assert_eq!(trace, Some(b"t-1".as_slice()));
    }
}
