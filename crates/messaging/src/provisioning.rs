use crate::broker::Broker;
use crate::destination::Destination;
use crate::error::Error;

use std::collections::HashSet;

use tokio::sync::Mutex;
use tracing::{debug, info};

/// Remembers which broker resources are known to exist.
///
/// One cache belongs to one connection. All producers and subscribers created
/// from that connection share it, so at most one provisioning round-trip is
/// made per resource for the lifetime of the connection. The lock is held
/// across the broker calls: concurrent first users of a resource queue up
/// behind the one performing the create and then observe the cache hit.
#[derive(Debug, Default)]
pub struct ProvisioningCache {
    provisioned: Mutex<HashSet<String>>,
}

impl ProvisioningCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures the resource backing `destination` exists on `broker`.
    ///
    /// Failures are not cached; the next caller retries from scratch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProvisionFailed`] if the broker cannot describe or
    /// create the resource.
    pub async fn ensure_exists<B>(&self, broker: &B, destination: &Destination) -> Result<(), Error>
    where
        B: Broker,
    {
        let key = broker.provisioning_key(destination);

        let mut provisioned = self.provisioned.lock().await;
        if provisioned.contains(&key) {
            return Ok(());
        }

        let exists = broker
            .exists(&key)
            .await
            .map_err(|e| Error::ProvisionFailed {
                destination: destination.name().to_string(),
                source: Box::new(e),
            })?;

        if exists {
            debug!("{} resource {} already exists", broker.kind(), key);
        } else {
            broker
                .create(&key, destination)
                .await
                .map_err(|e| Error::ProvisionFailed {
                    destination: destination.name().to_string(),
                    source: Box::new(e),
                })?;

            info!("provisioned {} resource {} for {}", broker.kind(), key, destination);
        }

        provisioned.insert(key);
        drop(provisioned);

        Ok(())
    }

    /// Whether `key` has been provisioned through this cache.
    pub async fn contains(&self, key: &str) -> bool {
        self.provisioned.lock().await.contains(key)
    }
}
