mod error;

pub use error::Error;

use crate::membership::MemoryMembership;
use crate::state::{State, StoredRecord, TopicState};

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use courier_messaging::{Broker, Destination, Headers, OutboundRecord};
use tokio::sync::{Mutex, Notify};
use tracing::debug;

/// Options for the in-process broker.
#[derive(Clone, Debug, Default)]
pub struct MemoryBrokerOptions {
    /// Delay applied to every create call, to widen provisioning races.
    pub create_delay: Duration,
}

#[derive(Default)]
struct Counters {
    acks: AtomicUsize,
    close_calls: AtomicUsize,
    create_calls: AtomicUsize,
    exists_calls: AtomicUsize,
    naks: AtomicUsize,
    abandoned: AtomicUsize,
}

#[derive(Default)]
struct Faults {
    fail_next_ack: AtomicBool,
    fail_next_create: AtomicBool,
    fail_next_join: AtomicBool,
}

struct Inner {
    closed: AtomicBool,
    counters: Counters,
    create_delay: Duration,
    faults: Faults,
    notify: Notify,
    state: Mutex<State>,
}

/// An in-process partitioned log with consumer groups.
///
/// Clones share the same log.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Debug for MemoryBroker {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("MemoryBroker")
            .field("closed", &self.is_closed())
            .field("create_delay", &self.inner.create_delay)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(MemoryBrokerOptions::default())
    }
}

impl MemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new(MemoryBrokerOptions { create_delay }: MemoryBrokerOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                closed: AtomicBool::new(false),
                counters: Counters::default(),
                create_delay,
                faults: Faults::default(),
                notify: Notify::new(),
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub(crate) fn state(&self) -> &Mutex<State> {
        &self.inner.state
    }

    pub(crate) fn notify(&self) -> &Notify {
        &self.inner.notify
    }

    pub(crate) fn take_ack_fault(&self) -> Result<(), Error> {
        if self.inner.faults.fail_next_ack.swap(false, Ordering::SeqCst) {
            return Err(Error::Injected("ack"));
        }

        Ok(())
    }

    pub(crate) fn record_ack(&self) {
        self.inner.counters.acks.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_nak(&self) {
        self.inner.counters.naks.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_abandon(&self) {
        self.inner.counters.abandoned.fetch_add(1, Ordering::SeqCst);
    }

    /// Whether [`Broker::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of create calls received.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.inner.counters.create_calls.load(Ordering::SeqCst)
    }

    /// Number of existence checks received.
    #[must_use]
    pub fn exists_calls(&self) -> usize {
        self.inner.counters.exists_calls.load(Ordering::SeqCst)
    }

    /// Number of close calls received.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.inner.counters.close_calls.load(Ordering::SeqCst)
    }

    /// Number of acknowledged deliveries.
    #[must_use]
    pub fn acks(&self) -> usize {
        self.inner.counters.acks.load(Ordering::SeqCst)
    }

    /// Number of rejected deliveries.
    #[must_use]
    pub fn naks(&self) -> usize {
        self.inner.counters.naks.load(Ordering::SeqCst)
    }

    /// Number of deliveries skipped without settlement.
    #[must_use]
    pub fn abandoned(&self) -> usize {
        self.inner.counters.abandoned.load(Ordering::SeqCst)
    }

    /// Makes the next create call fail.
    pub fn fail_next_create(&self) {
        self.inner.faults.fail_next_create.store(true, Ordering::SeqCst);
    }

    /// Makes the next group join fail.
    pub fn fail_next_join(&self) {
        self.inner.faults.fail_next_join.store(true, Ordering::SeqCst);
    }

    /// Makes the next ack or nak fail.
    pub fn fail_next_ack(&self) {
        self.inner.faults.fail_next_ack.store(true, Ordering::SeqCst);
    }

    /// Number of records stored on `topic` across all partitions.
    pub async fn record_count(&self, topic: &str) -> usize {
        self.state()
            .lock()
            .await
            .topics
            .get(topic)
            .map_or(0, |t| t.log.iter().map(Vec::len).sum())
    }

    /// Records of `group` on `topic` that are in flight or awaiting redelivery.
    pub async fn pending(&self, topic: &str, group: &str) -> usize {
        self.state()
            .lock()
            .await
            .topics
            .get(topic)
            .and_then(|t| t.groups.get(group))
            .map_or(0, crate::state::GroupState::pending)
    }

    /// Appends raw bytes without headers, bypassing any encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTopic`] if the topic was never created.
    pub async fn inject_raw<P>(&self, topic: &str, payload: P) -> Result<(), Error>
    where
        P: Into<Bytes>,
    {
        self.append(topic, None, StoredRecord::new(payload.into(), Headers::new()))
            .await
    }

    /// Forces a new generation on `group`, as a broker-side rebalance would.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownGroup`] if nobody ever joined the group.
    pub async fn rebalance(&self, topic: &str, group: &str) -> Result<(), Error> {
        let mut state = self.state().lock().await;

        let group_state = state
            .topics
            .get_mut(topic)
            .and_then(|t| t.groups.get_mut(group))
            .ok_or_else(|| Error::UnknownGroup {
                topic: topic.to_string(),
                group: group.to_string(),
            })?;
        group_state.bump();
        drop(state);

        debug!("forced rebalance of {} on {}", group, topic);
        self.notify().notify_waiters();

        Ok(())
    }

    async fn append(&self, topic: &str, key: Option<&str>, record: StoredRecord) -> Result<(), Error> {
        let mut state = self.state().lock().await;

        let partition = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| Error::UnknownTopic(topic.to_string()))?
            .append(key, record);
        drop(state);

        debug!("appended record to {}[{}]", topic, partition);
        self.notify().notify_waiters();

        Ok(())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    type Error = Error;

    type Membership = MemoryMembership;

    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn exists(&self, key: &str) -> Result<bool, Self::Error> {
        self.inner.counters.exists_calls.fetch_add(1, Ordering::SeqCst);

        Ok(self.state().lock().await.topics.contains_key(key))
    }

    async fn create(&self, key: &str, destination: &Destination) -> Result<(), Self::Error> {
        self.inner.counters.create_calls.fetch_add(1, Ordering::SeqCst);

        if !self.inner.create_delay.is_zero() {
            tokio::time::sleep(self.inner.create_delay).await;
        }

        if self.inner.faults.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(Error::Injected("create"));
        }

        let partitions = usize::try_from(destination.partition_count()).unwrap_or(1);

        self.state()
            .lock()
            .await
            .topics
            .entry(key.to_string())
            .or_insert_with(|| TopicState::new(partitions));

        Ok(())
    }

    async fn publish(&self, record: OutboundRecord) -> Result<(), Self::Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let OutboundRecord {
            destination,
            key,
            payload,
            headers,
        } = record;

        self.append(&destination, key.as_deref(), StoredRecord::new(payload, headers))
            .await
    }

    async fn join_group(
        &self,
        destination: &Destination,
        group: &str,
    ) -> Result<Self::Membership, Self::Error> {
        if self.inner.faults.fail_next_join.swap(false, Ordering::SeqCst) {
            return Err(Error::Injected("join"));
        }

        let topic = destination.name();
        let mut state = self.state().lock().await;

        let member = state.next_member();
        state
            .topics
            .get_mut(topic)
            .ok_or_else(|| Error::UnknownTopic(topic.to_string()))?
            .group_mut(group)
            .join(member);
        drop(state);

        debug!("member {} joined {} on {}", member, group, topic);
        self.notify().notify_waiters();

        Ok(MemoryMembership::new(self.clone(), topic, group, member))
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.inner.counters.close_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.closed.store(true, Ordering::SeqCst);
        self.notify().notify_waiters();

        Ok(())
    }
}
