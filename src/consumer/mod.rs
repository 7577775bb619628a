//! Multi-partition consumer.
//!
//! A [`MultiPartitionConsumer`] owns one [`PartitionSession`] per partition
//! and merges their messages through a single channel. Ordering holds
//! within a partition only. Control operations route to the sessions they
//! concern: seeking by id needs a single partition, seeking by time is
//! broadcast, and the aggregate last id refuses to pick a partition.

mod cursor;
mod options;

use std::{collections::VecDeque, sync::Arc, time::Duration};

use cursor::ReadCursor;
use futures::future::join_all;
use log::{debug, info, warn};
pub use options::{
    ConsumerOptions,
    DEFAULT_RECEIVER_QUEUE_SIZE,
    SubscriptionInitialPosition,
    SubscriptionSettings,
};
pub(crate) use options::{SubscriptionSpec, random_name, settings_setters};
use tokio::{sync::mpsc, time::timeout};
use tokio_util::sync::CancellationToken;

use crate::{
    backoff::{BackoffConfig, BackoffPolicy, ExponentialBackoff},
    error::{ConsumerError, Result},
    message::Message,
    message_id::{MessageId, MessageIdentifier},
    session::{Delivery, PartitionSession, SessionState, flow_batch},
    transport::{StartPosition, Transport},
};

/// Bounds of the retry schedule used while a partition cannot answer a
/// last-id query during `has_next`.
const HAS_NEXT_RETRY: BackoffConfig = BackoffConfig {
    initial_delay: Duration::from_millis(100),
    max_delay: Duration::from_secs(1),
};

struct PartitionSlot {
    session: PartitionSession,
    cursor: ReadCursor,
    dequeued: u32,
}

/// Consumer spanning every partition of a topic.
pub struct MultiPartitionConsumer {
    topic: String,
    subscription: String,
    slots: Vec<PartitionSlot>,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    look_ahead: VecDeque<Delivery>,
    flow_batch: u32,
    seek_inclusive: bool,
    operation_timeout: Duration,
    closed: bool,
}

impl std::fmt::Debug for MultiPartitionConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiPartitionConsumer")
            .field("topic", &self.topic)
            .field("subscription", &self.subscription)
            .field("partitions", &self.slots.len())
            .field("buffered", &self.look_ahead.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl MultiPartitionConsumer {
    /// Start one session per entry of `partitions` concurrently.
    ///
    /// # Errors
    ///
    /// Returns the first session start failure; sessions that did start are
    /// closed again.
    pub(crate) async fn subscribe(
        spec: SubscriptionSpec,
        partitions: Vec<(String, i32)>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let (output, deliveries) = mpsc::unbounded_channel();
        let starts = partitions.into_iter().enumerate().map(|(slot, (topic, index))| {
            PartitionSession::start(
                spec.session_config(topic, index),
                Arc::clone(&transport),
                slot,
                output.clone(),
            )
        });
        let results = join_all(starts).await;
        drop(output);

        let mut sessions = Vec::with_capacity(results.len());
        let mut failure = None;
        for result in results {
            match result {
                Ok(session) => sessions.push(session),
                Err(err) => {
                    warn!(
                        "partition subscribe failed: topic={}, error={err}",
                        spec.topic
                    );
                    failure.get_or_insert(err);
                }
            }
        }
        if let Some(err) = failure {
            join_all(sessions.iter_mut().map(|session| session.close())).await;
            return Err(err);
        }

        info!(
            "subscribed: topic={}, subscription={}, partitions={}",
            spec.topic,
            spec.subscription,
            sessions.len()
        );
        let cursor = ReadCursor::from(spec.start);
        Ok(Self {
            topic: spec.topic,
            subscription: spec.subscription,
            slots: sessions
                .into_iter()
                .map(|session| PartitionSlot {
                    session,
                    cursor,
                    dequeued: 0,
                })
                .collect(),
            deliveries,
            look_ahead: VecDeque::new(),
            flow_batch: flow_batch(spec.settings.receiver_queue_size),
            seek_inclusive: spec.seek_inclusive,
            operation_timeout: spec.operation_timeout,
            closed: false,
        })
    }

    /// Topic this consumer reads.
    #[must_use]
    pub fn topic(&self) -> &str { &self.topic }

    /// Subscription name.
    #[must_use]
    pub fn subscription(&self) -> &str { &self.subscription }

    /// Number of partition sessions.
    #[must_use]
    pub fn num_partitions(&self) -> usize { self.slots.len() }

    /// State of every partition session, in partition order.
    #[must_use]
    pub fn partition_states(&self) -> Vec<SessionState> {
        self.slots.iter().map(|slot| slot.session.state()).collect()
    }

    /// Whether [`MultiPartitionConsumer::close`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.closed }

    /// Wait for the next message from any partition.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Closed`] immediately once the consumer is
    /// closed, or when every session has stopped.
    pub async fn receive(&mut self) -> Result<Message> {
        loop {
            self.ensure_open()?;
            if let Some(delivery) = self.look_ahead.pop_front() {
                return Ok(self.hand_out(delivery));
            }
            let Some(delivery) = self.deliveries.recv().await else {
                debug!("all partition sessions stopped: topic={}", self.topic);
                return Err(ConsumerError::Closed);
            };
            if let Some(delivery) = self.admit(delivery) {
                return Ok(self.hand_out(delivery));
            }
        }
    }

    /// [`MultiPartitionConsumer::receive`] bounded by `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Timeout`] when nothing arrives in time; no
    /// message is lost.
    pub async fn receive_timeout(&mut self, limit: Duration) -> Result<Message> {
        timeout(limit, self.receive())
            .await
            .map_err(|_| ConsumerError::Timeout(limit))?
    }

    /// [`MultiPartitionConsumer::receive`] that gives up when `cancel`
    /// fires.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Cancelled`] on cancellation; no message is
    /// lost.
    pub async fn receive_cancellable(&mut self, cancel: &CancellationToken) -> Result<Message> {
        tokio::select! {
            biased;

            () = cancel.cancelled() => Err(ConsumerError::Cancelled),
            received = self.receive() => received,
        }
    }

    /// Whether a message is available or still stored past the read cursor
    /// of any partition.
    ///
    /// Partitions that are reconnecting are retried for at most the
    /// operation timeout and then count as empty. Closed partitions count as
    /// empty at once.
    pub async fn has_next(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.fill_look_ahead();
        if !self.look_ahead.is_empty() {
            return true;
        }
        let budget = self.operation_timeout;
        let answers = join_all(
            self.slots
                .iter()
                .map(|slot| partition_has_more(&slot.session, slot.cursor, budget)),
        )
        .await;
        answers.into_iter().any(|more| more)
    }

    /// Reposition a single-partition subscription at `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::AmbiguousOperation`] on a partitioned topic,
    /// and session errors otherwise.
    pub async fn seek<I>(&mut self, id: &I) -> Result<()>
    where
        I: MessageIdentifier + ?Sized,
    {
        self.ensure_open()?;
        let id = MessageId::from_identifier(id);
        let [slot] = self.slots.as_mut_slice() else {
            return Err(ConsumerError::AmbiguousOperation(
                "seek by message id on a partitioned topic",
            ));
        };
        let position = slot.session.seek(id).await?;
        slot.cursor = ReadCursor::new(position, self.seek_inclusive);
        self.look_ahead.clear();
        debug!("seeked: topic={}, position={position}", self.topic);
        Ok(())
    }

    /// Reposition every partition at the first message published at or
    /// after `time`.
    ///
    /// # Errors
    ///
    /// Returns the first partition failure after every partition answered.
    pub async fn seek_by_time(&mut self, time: std::time::SystemTime) -> Result<()> {
        self.ensure_open()?;
        let results = join_all(
            self.slots
                .iter()
                .map(|slot| slot.session.seek_by_time(time)),
        )
        .await;
        let mut sought = Vec::with_capacity(results.len());
        let mut failure = None;
        for (index, (slot, result)) in self.slots.iter_mut().zip(results).enumerate() {
            match result {
                Ok(position) => {
                    slot.cursor = ReadCursor::from(StartPosition::after(position));
                    sought.push(index);
                }
                Err(err) => {
                    warn!(
                        "seek by time failed: topic={}, error={err}",
                        slot.session.topic()
                    );
                    failure.get_or_insert(err);
                }
            }
        }
        // partitions that did not move keep what was already merged
        self.look_ahead
            .retain(|delivery| !sought.contains(&delivery.slot));
        failure.map_or(Ok(()), Err)
    }

    /// Last message id of a single-partition topic.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::AmbiguousOperation`] on a partitioned topic;
    /// use [`MultiPartitionConsumer::last_message_ids`] there.
    pub async fn get_last_message_id(&self) -> Result<MessageId> {
        self.ensure_open()?;
        match self.slots.as_slice() {
            [slot] => slot.session.get_last_message_id().await,
            _ => Err(ConsumerError::AmbiguousOperation(
                "get last message id on a partitioned topic",
            )),
        }
    }

    /// Last message id of every partition, in partition order.
    ///
    /// # Errors
    ///
    /// Returns the first partition failure.
    pub async fn last_message_ids(&self) -> Result<Vec<MessageId>> {
        self.ensure_open()?;
        join_all(
            self.slots
                .iter()
                .map(|slot| slot.session.get_last_message_id()),
        )
        .await
        .into_iter()
        .collect()
    }

    /// Acknowledge a received message, every chunk included.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Closed`] after close and
    /// [`ConsumerError::Validation`] for a message from another topic.
    pub fn ack(&self, message: &Message) -> Result<()> {
        self.ack_ids(message.id().partition_index(), message.ack_ids())
    }

    /// Acknowledge a message by id.
    ///
    /// # Errors
    ///
    /// As for [`MultiPartitionConsumer::ack`].
    pub fn ack_id<I>(&self, id: &I) -> Result<()>
    where
        I: MessageIdentifier + ?Sized,
    {
        let id = MessageId::from_identifier(id);
        self.ack_ids(id.partition_index(), vec![id])
    }

    fn ack_ids(&self, partition_index: i32, ids: Vec<MessageId>) -> Result<()> {
        self.ensure_open()?;
        let slot = self
            .slots
            .iter()
            .find(|slot| slot.session.partition_index() == partition_index)
            .ok_or_else(|| {
                ConsumerError::Validation(format!(
                    "partition {partition_index} is not part of {}",
                    self.topic
                ))
            })?;
        slot.session.ack(ids)
    }

    /// Close every partition session. Later calls fail with
    /// [`ConsumerError::Closed`]; closing twice is a no-op.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        join_all(
            self.slots
                .iter_mut()
                .map(|slot| slot.session.close()),
        )
        .await;
        self.look_ahead.clear();
        self.deliveries.close();
        info!(
            "consumer closed: topic={}, subscription={}",
            self.topic, self.subscription
        );
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(ConsumerError::Closed)
        } else {
            Ok(())
        }
    }

    /// Move everything already merged into the look-ahead buffer.
    fn fill_look_ahead(&mut self) {
        while let Ok(delivery) = self.deliveries.try_recv() {
            if let Some(delivery) = self.admit(delivery) {
                self.look_ahead.push_back(delivery);
            }
        }
    }

    /// Account for a delivery leaving the merge channel. Returns it unless
    /// a later seek made it stale.
    fn admit(&mut self, delivery: Delivery) -> Option<Delivery> {
        let batch = self.flow_batch;
        let slot = self.slots.get_mut(delivery.slot)?;
        slot.dequeued += 1;
        if slot.dequeued >= batch {
            slot.session.flow(std::mem::take(&mut slot.dequeued));
        }
        if delivery.generation != slot.session.generation() {
            debug!(
                "dropping message from before seek: id={}",
                delivery.message.id()
            );
            return None;
        }
        Some(delivery)
    }

    fn hand_out(&mut self, delivery: Delivery) -> Message {
        if let Some(slot) = self.slots.get_mut(delivery.slot) {
            slot.cursor = ReadCursor::after(delivery.message.id());
        }
        delivery.message
    }
}

/// Ask one partition whether messages remain past `cursor`, retrying
/// transient failures within `budget`.
async fn partition_has_more(session: &PartitionSession, cursor: ReadCursor, budget: Duration) -> bool {
    let query = async {
        let mut backoff = ExponentialBackoff::new(HAS_NEXT_RETRY);
        loop {
            match session.get_last_message_id().await {
                Ok(last) => return cursor.has_more(&last),
                Err(err) if err.is_retryable() => {
                    let delay = backoff.next_delay();
                    debug!(
                        "last id unavailable, retrying: topic={}, delay={delay:?}, error={err}",
                        session.topic()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    debug!(
                        "partition cannot answer has_next: topic={}, error={err}",
                        session.topic()
                    );
                    return false;
                }
            }
        }
    };
    if let Ok(more) = timeout(budget, query).await {
        more
    } else {
        warn!(
            "has_next gave up on partition: topic={}, budget={budget:?}",
            session.topic()
        );
        false
    }
}

#[cfg(test)]
mod tests;
