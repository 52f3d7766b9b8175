mod error;

pub use error::Error;

use crate::membership::NatsMembership;
use crate::{STREAM_MAX_AGE, sanitize_name};

use std::fmt::{Debug, Formatter, Result as FmtResult};

use async_nats::jetstream::Context as JetStreamContext;
use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy, pull};
use async_nats::jetstream::stream::{Config as NatsStreamConfig, RetentionPolicy};
use async_nats::{Client as AsyncNatsClient, ConnectOptions, HeaderMap, ServerAddr};
use async_trait::async_trait;
use courier_messaging::{Broker, Destination, Error as MessagingError, MessagingConfig, OutboundRecord};
use futures::TryStreamExt;
use tracing::{debug, info, warn};

/// Options for the NATS broker.
#[derive(Clone, Debug)]
pub struct NatsBrokerOptions {
    /// The NATS client.
    pub client: AsyncNatsClient,
}

/// A JetStream-backed broker.
///
/// Destinations are subjects of their module's interest-retention stream
/// (`billing.order` lives on stream `billing`, capturing `billing.>`). Each
/// consumer group is a durable pull consumer filtered to one subject.
#[derive(Clone)]
pub struct NatsBroker {
    client: AsyncNatsClient,
    jetstream_context: JetStreamContext,
}

impl Debug for NatsBroker {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("NatsBroker")
            .field("connection_state", &self.client.connection_state())
            .finish_non_exhaustive()
    }
}

impl NatsBroker {
    /// Wraps an existing client.
    #[must_use]
    pub fn new(NatsBrokerOptions { client }: NatsBrokerOptions) -> Self {
        let jetstream_context = async_nats::jetstream::new(client.clone());

        Self {
            client,
            jetstream_context,
        }
    }

    /// Connects using the shared messaging config.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::ConfigInvalid`] for an unusable config and
    /// [`MessagingError::ConnectFailed`] if the servers cannot be reached.
    pub async fn connect(config: &MessagingConfig) -> Result<Self, MessagingError> {
        config.validate()?;

        let servers = config
            .server_list()
            .iter()
            .map(|s| s.parse::<ServerAddr>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| MessagingError::ConfigInvalid(format!("invalid server address: {e}")))?;

        let mut options = ConnectOptions::new().name(&config.app_name);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options = options.user_and_password(username.clone(), password.clone());
        }

        if let Some(ca_file) = &config.ca_file {
            options = options
                .require_tls(true)
                .add_root_certificates(ca_file.clone());

            if config.tls_skip_verify {
                warn!("certificate verification cannot be disabled for NATS; verifying anyway");
            }
        }

        if let (Some(cert_file), Some(key_file)) = (&config.cert_file, &config.key_file) {
            options = options.add_client_certificate(cert_file.clone(), key_file.clone());
        }

        let client = options
            .connect(servers.as_slice())
            .await
            .map_err(|e| MessagingError::ConnectFailed {
                servers: config.servers.clone(),
                source: Box::new(e),
            })?;

        info!("connected to NATS at {}", config.servers);

        Ok(Self::new(NatsBrokerOptions { client }))
    }

    /// The underlying client.
    #[must_use]
    pub const fn client(&self) -> &AsyncNatsClient {
        &self.client
    }

    /// Name of the stream that captures `destination`.
    #[must_use]
    pub fn stream_name(destination: &Destination) -> String {
        sanitize_name(module_of(destination))
    }

    /// Stream configuration for a destination's module.
    #[must_use]
    pub fn stream_config(key: &str, destination: &Destination) -> NatsStreamConfig {
        let module = module_of(destination);
        let subjects = if module == destination.name() {
            vec![destination.name().to_string()]
        } else {
            vec![format!("{module}.>")]
        };

        NatsStreamConfig {
            name: key.to_string(),
            subjects,
            retention: RetentionPolicy::Interest,
            max_age: STREAM_MAX_AGE,
            ..Default::default()
        }
    }

    /// Durable pull consumer configuration for a group on a destination.
    #[must_use]
    pub fn consumer_config(destination: &Destination, group: &str) -> pull::Config {
        let durable_name = sanitize_name(&format!("{group}.{destination}"));

        pull::Config {
            name: Some(durable_name.clone()),
            durable_name: Some(durable_name),
            filter_subject: destination.name().to_string(),
            ack_policy: AckPolicy::Explicit,
            deliver_policy: DeliverPolicy::All,
            ..Default::default()
        }
    }
}

/// The module part of a destination name: everything before the first `.`.
fn module_of(destination: &Destination) -> &str {
    let name = destination.name();
    name.split_once('.').map_or(name, |(module, _)| module)
}

#[async_trait]
impl Broker for NatsBroker {
    type Error = Error;

    type Membership = NatsMembership;

    fn kind(&self) -> &'static str {
        "nats"
    }

    fn provisioning_key(&self, destination: &Destination) -> String {
        Self::stream_name(destination)
    }

    async fn exists(&self, key: &str) -> Result<bool, Self::Error> {
        let names: Vec<String> = self
            .jetstream_context
            .stream_names()
            .try_collect()
            .await
            .map_err(|e| Error::StreamNames(e.into()))?;

        Ok(names.iter().any(|name| name == key))
    }

    async fn create(&self, key: &str, destination: &Destination) -> Result<(), Self::Error> {
        self.jetstream_context
            .get_or_create_stream(Self::stream_config(key, destination))
            .await
            .map_err(|e| Error::CreateStream(e.kind()))?;

        debug!("stream {} captures {}", key, destination);

        Ok(())
    }

    async fn publish(&self, record: OutboundRecord) -> Result<(), Self::Error> {
        let OutboundRecord {
            destination,
            key: _,
            payload,
            headers,
        } = record;

        let mut header_map = HeaderMap::new();
        for (name, value) in &headers {
            header_map.insert(name.as_str(), value.as_str());
        }

        self.jetstream_context
            .publish_with_headers(destination, header_map, payload)
            .await
            .map_err(|e| Error::Publish(e.kind()))?
            .await
            .map_err(|e| Error::Publish(e.kind()))?;

        Ok(())
    }

    async fn join_group(
        &self,
        destination: &Destination,
        group: &str,
    ) -> Result<Self::Membership, Self::Error> {
        let stream = self
            .jetstream_context
            .get_stream(self.provisioning_key(destination))
            .await
            .map_err(|e| Error::GetStream(e.kind()))?;

        let config = Self::consumer_config(destination, group);
        let durable_name = config.durable_name.clone().unwrap_or_default();

        let consumer = stream
            .get_or_create_consumer(&durable_name, config)
            .await
            .map_err(|e| Error::Consumer(e.kind()))?;

        debug!("durable consumer {} bound to {}", durable_name, destination);

        Ok(NatsMembership::new(destination.name(), consumer))
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.client
            .flush()
            .await
            .map_err(|e| Error::Flush(e.into()))?;

        self.client
            .drain()
            .await
            .map_err(|e| Error::Drain(e.into()))?;

        debug!("connection drained");

        Ok(())
    }
}
