//! In-process broker.
//!
//! [`MemoryBroker`] stores partitioned topics in memory and implements both
//! [`Transport`] and [`PartitionLookup`], so readers and consumers can run
//! end to end without a network. Each subscription gets a dispatch task
//! that pushes stored messages while the subscriber holds flow permits.
//! Fault injection hooks make connection loss and slow brokers
//! reproducible.

mod dispatch;
mod partition;
mod producer;

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering},
};

use async_trait::async_trait;
use dashmap::DashMap;
use dispatch::{MemoryCommands, Permits, dispatch};
use log::{debug, info};
use partition::Partition;
pub use producer::{MemoryProducer, OutgoingMessage};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    lookup::{PartitionLookup, partition_topics},
    message_id::MessageId,
    transport::{Connection, SubscribeRequest, Transport, TransportError},
};

/// Capacity of each subscription's frame channel.
const FRAME_BUFFER: usize = 64;

/// Injected failures shared by every connection of a broker.
#[derive(Debug, Default)]
pub(crate) struct Faults {
    failing_connects: AtomicU32,
    refuse_connects: AtomicBool,
    fail_commands: AtomicBool,
}

impl Faults {
    fn take_connect_failure(&self) -> bool {
        self.refuse_connects.load(Ordering::Acquire)
            || self
                .failing_connects
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| {
                    left.checked_sub(1)
                })
                .is_ok()
    }

    fn commands_failing(&self) -> bool { self.fail_commands.load(Ordering::Acquire) }
}

#[derive(Debug)]
pub(crate) struct BrokerInner {
    topics: DashMap<String, u32>,
    partitions: DashMap<String, Arc<Partition>>,
    faults: Arc<Faults>,
    next_ledger: AtomicI64,
    next_producer: AtomicU64,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl BrokerInner {
    /// Partition count of a topic, creating an unpartitioned topic on
    /// first use.
    fn partition_count_of(&self, topic: &str) -> u32 {
        if let Some(count) = self.topics.get(topic) {
            return *count;
        }
        if self.partitions.contains_key(topic) {
            return 0;
        }
        self.create(topic, 0);
        0
    }

    fn create(&self, topic: &str, partitions: u32) {
        self.topics
            .entry(topic.to_owned())
            .or_insert_with(|| {
                for (name, index) in partition_topics(topic, partitions) {
                    let ledger = self.next_ledger.fetch_add(1, Ordering::AcqRel);
                    self.partitions
                        .insert(name.clone(), Arc::new(Partition::new(name, index, ledger)));
                }
                partitions
            });
    }

    fn partition(&self, name: &str) -> Result<Arc<Partition>, TransportError> {
        self.partitions
            .get(name)
            .map(|partition| Arc::clone(&partition))
            .ok_or_else(|| TransportError::Rejected(format!("unknown partition {name}")))
    }

    /// Every partition of `topic`, or the single partition named `topic`.
    fn partitions_of(&self, topic: &str) -> Vec<Arc<Partition>> {
        match self.topics.get(topic).map(|count| *count) {
            Some(count) => partition_topics(topic, count)
                .into_iter()
                .filter_map(|(name, _)| self.partition(&name).ok())
                .collect(),
            None => self.partition(topic).into_iter().collect(),
        }
    }
}

/// In-memory broker implementing [`Transport`] and [`PartitionLookup`].
///
/// Cloning yields another handle to the same broker.
#[derive(Clone, Debug)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for MemoryBroker {
    fn default() -> Self { Self::new() }
}

impl MemoryBroker {
    /// Empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                topics: DashMap::new(),
                partitions: DashMap::new(),
                faults: Arc::new(Faults::default()),
                next_ledger: AtomicI64::new(1),
                next_producer: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Create `topic` with `partitions` partitions; zero creates an
    /// unpartitioned topic. Existing topics are left unchanged.
    pub fn create_topic(&self, topic: &str, partitions: u32) { self.inner.create(topic, partitions); }

    /// Producer publishing to `topic`, created unpartitioned if missing.
    #[must_use]
    pub fn producer(&self, topic: &str) -> MemoryProducer {
        self.inner.partition_count_of(topic);
        let producer_id = self.inner.next_producer.fetch_add(1, Ordering::AcqRel);
        MemoryProducer {
            broker: Arc::clone(&self.inner),
            topic: topic.to_owned(),
            name: format!("producer-{producer_id}"),
            producer_id,
            sequence: 0,
            round_robin: 0,
        }
    }

    /// Identifier of the last message stored in a partition.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Rejected`] for an unknown partition.
    pub async fn last_message_id(&self, partition: &str) -> Result<MessageId, TransportError> {
        Ok(self.inner.partition(partition)?.last_message_id().await)
    }

    /// Identifiers acknowledged by `subscription` on every partition of
    /// `topic`.
    pub async fn acked(&self, topic: &str, subscription: &str) -> Vec<MessageId> {
        let mut acked = Vec::new();
        for partition in self.inner.partitions_of(topic) {
            acked.extend(partition.acked(subscription).await);
        }
        acked
    }

    /// Number of subscribe handshakes accepted for `topic`.
    pub async fn connect_count(&self, topic: &str) -> usize {
        let mut count = 0;
        for partition in self.inner.partitions_of(topic) {
            count += partition.connect_count().await;
        }
        count
    }

    /// Drop every live connection to `topic` (or one partition of it).
    /// Subscribers see their frame stream end and reconnect.
    pub async fn disconnect(&self, topic: &str) -> usize {
        let mut dropped = 0;
        for partition in self.inner.partitions_of(topic) {
            dropped += partition.disconnect_all().await;
        }
        info!("dropped connections: topic={topic}, count={dropped}");
        dropped
    }

    /// Fail the next `count` subscribe handshakes.
    pub fn fail_next_connects(&self, count: u32) {
        self.inner
            .faults
            .failing_connects
            .store(count, Ordering::Release);
    }

    /// Refuse every subscribe handshake until called with `false`.
    pub fn refuse_connects(&self, refuse: bool) {
        self.inner
            .faults
            .refuse_connects
            .store(refuse, Ordering::Release);
    }

    /// Make seek and last-id commands time out until called with `false`.
    pub fn fail_commands(&self, fail: bool) {
        self.inner.faults.fail_commands.store(fail, Ordering::Release);
    }

    /// Stop every dispatch task and wait for them to finish.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn connect(&self, request: &SubscribeRequest) -> Result<Connection, TransportError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(TransportError::Connection("broker shut down".into()));
        }
        if self.inner.faults.take_connect_failure() {
            debug!("refusing subscribe: topic={}", request.topic);
            return Err(TransportError::Connection(format!(
                "connection to {} refused",
                request.topic
            )));
        }
        let partition = self.inner.partition(&request.topic)?;
        let token = self.inner.shutdown.child_token();
        partition.register(token.clone()).await;

        let position = partition.resolve(request.start).await;
        let permits = Arc::new(Permits::default());
        let (frames_tx, frames) = mpsc::channel(FRAME_BUFFER);
        debug!(
            "subscribed: topic={}, subscription={}, position={position}",
            request.topic, request.subscription
        );
        self.inner.tracker.spawn(dispatch(
            Arc::clone(&partition),
            Arc::clone(&permits),
            token.clone(),
            frames_tx,
            position,
        ));

        Ok(Connection {
            commands: Box::new(MemoryCommands {
                partition,
                permits,
                faults: Arc::clone(&self.inner.faults),
                subscription: request.subscription.clone(),
                token,
            }),
            frames,
        })
    }
}

#[async_trait]
impl PartitionLookup for MemoryBroker {
    async fn partition_count(&self, topic: &str) -> Result<u32, TransportError> {
        Ok(self.inner.partition_count_of(topic))
    }
}

#[cfg(test)]
mod tests;
