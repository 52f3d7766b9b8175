use crate::broker::Broker;
use crate::config::MessagingConfig;
use crate::context::{IdGenerator, UuidGenerator};
use crate::destination::Destination;
use crate::error::Error;
use crate::payload::Payload;
use crate::producer::BrokerProducer;
use crate::provisioning::ProvisioningCache;
use crate::subscriber::BrokerSubscriber;

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::info;

/// Options for a [`Connection`].
#[derive(Clone, Debug)]
pub struct ConnectionOptions {
    /// Application name used to namespace consumer groups.
    pub app_name: String,

    /// Generator for message ids.
    pub ids: Arc<dyn IdGenerator>,

    /// Upper bound on how long subscriber shutdown waits for consume loops.
    pub shutdown_timeout: Duration,
}

impl ConnectionOptions {
    /// Options with the default id generator and a ten second shutdown bound.
    #[must_use]
    pub fn new<A>(app_name: A) -> Self
    where
        A: Into<String>,
    {
        Self {
            app_name: app_name.into(),
            ids: Arc::new(UuidGenerator),
            shutdown_timeout: Duration::from_secs(10),
        }
    }

    /// Options taken from a validated config.
    #[must_use]
    pub fn from_config(config: &MessagingConfig) -> Self {
        Self {
            shutdown_timeout: config.shutdown_timeout(),
            ..Self::new(config.app_name.clone())
        }
    }

    /// Replaces the id generator.
    #[must_use]
    pub fn with_id_generator<I>(mut self, ids: I) -> Self
    where
        I: IdGenerator,
    {
        self.ids = Arc::new(ids);
        self
    }
}

struct Shared<B>
where
    B: Broker,
{
    app_name: String,
    broker: B,
    ids: Arc<dyn IdGenerator>,
    provisioning: ProvisioningCache,
    released: AtomicBool,
    shutdown_timeout: Duration,
}

/// A broker connection plus the state every producer and subscriber on it shares.
pub struct Connection<B>
where
    B: Broker,
{
    shared: Arc<Shared<B>>,
}

impl<B> Clone for Connection<B>
where
    B: Broker,
{
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<B> Debug for Connection<B>
where
    B: Broker,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Connection")
            .field("app_name", &self.shared.app_name)
            .field("broker", &self.shared.broker)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

impl<B> Connection<B>
where
    B: Broker,
{
    /// Wraps a connected broker.
    #[must_use]
    pub fn new(
        broker: B,
        ConnectionOptions {
            app_name,
            ids,
            shutdown_timeout,
        }: ConnectionOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                app_name,
                broker,
                ids,
                provisioning: ProvisioningCache::new(),
                released: AtomicBool::new(false),
                shutdown_timeout,
            }),
        }
    }

    /// The underlying broker client.
    #[must_use]
    pub fn broker(&self) -> &B {
        &self.shared.broker
    }

    /// The application name consumer groups are namespaced with.
    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.shared.app_name
    }

    /// The message id generator.
    #[must_use]
    pub fn ids(&self) -> &dyn IdGenerator {
        self.shared.ids.as_ref()
    }

    /// The provisioning cache owned by this connection.
    #[must_use]
    pub fn provisioning(&self) -> &ProvisioningCache {
        &self.shared.provisioning
    }

    /// Bound on the graceful-stop wait.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shared.shutdown_timeout
    }

    /// Ensures `destination` exists, consulting the shared cache first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProvisionFailed`] if the broker call fails.
    pub async fn ensure_exists(&self, destination: &Destination) -> Result<(), Error> {
        self.shared
            .provisioning
            .ensure_exists(&self.shared.broker, destination)
            .await
    }

    /// Creates a producer bound to this connection.
    #[must_use]
    pub fn producer(&self) -> BrokerProducer<B> {
        BrokerProducer::new(self.clone())
    }

    /// Creates a subscriber for payloads of type `T` bound to this connection.
    #[must_use]
    pub fn subscriber<T>(&self) -> BrokerSubscriber<B, T>
    where
        T: Payload,
    {
        BrokerSubscriber::new(self.clone())
    }

    /// Whether the connection has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::SeqCst)
    }

    /// Flushes and releases the broker connection. Only the first call reaches the broker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownFailed`] if the broker fails to close.
    pub async fn release(&self) -> Result<(), Error> {
        if self.shared.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("releasing {} connection", self.shared.broker.kind());

        self.shared
            .broker
            .close()
            .await
            .map_err(|e| Error::ShutdownFailed(Box::new(e)))
    }
}
