//! Per-partition subscription sessions.
//!
//! A [`PartitionSession`] is a cheap handle to a worker task that owns one
//! partition subscription. Requests travel to the worker as events carrying
//! a one-shot reply slot; the worker answers each slot exactly once. The
//! worker reconnects with backoff whenever the connection drops, so the
//! handle only ever observes `NotReady` while that happens.

mod event;
mod state;
mod worker;

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime},
};

use log::warn;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

pub(crate) use event::Delivery;
use event::{ControlRequest, SessionEvent};
pub use state::SessionState;
use state::SessionStatus;
pub(crate) use worker::flow_batch;
use worker::SessionWorker;

use crate::{
    backoff::BackoffFactory,
    chunk::ChunkConfig,
    crypto::{CryptoFailureAction, PayloadDecryptor},
    error::{ConsumerError, Result},
    message_id::MessageId,
    transport::{StartPosition, Transport},
};

/// Everything a session needs to subscribe one partition.
#[derive(Clone)]
pub struct SessionConfig {
    /// Partition topic name.
    pub topic: String,
    /// Partition index, `-1` for an unpartitioned topic.
    pub partition_index: i32,
    /// Subscription name.
    pub subscription: String,
    /// Consumer name within the subscription.
    pub consumer_name: String,
    /// Whether the subscription keeps a broker-side cursor.
    pub durable: bool,
    /// Initial start position.
    pub start: StartPosition,
    /// Whether a seek by id redelivers the message at the id.
    pub seek_inclusive: bool,
    /// Permits granted to the transport on every connect.
    pub receiver_queue_size: u32,
    /// Chunk reassembly limits.
    pub chunk: ChunkConfig,
    /// Bound on transport calls made by the worker.
    pub operation_timeout: Duration,
    /// Builds the reconnect delay policy.
    pub backoff: BackoffFactory,
    /// Consecutive failed reconnects tolerated before the session fails;
    /// `None` retries forever.
    pub max_reconnect_to_broker: Option<u32>,
    /// Decrypts payloads flagged as encrypted.
    pub decryptor: Option<Arc<dyn PayloadDecryptor>>,
    /// What to do with payloads that cannot be decrypted.
    pub crypto_failure_action: CryptoFailureAction,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("topic", &self.topic)
            .field("partition_index", &self.partition_index)
            .field("subscription", &self.subscription)
            .field("consumer_name", &self.consumer_name)
            .field("durable", &self.durable)
            .field("start", &self.start)
            .field("seek_inclusive", &self.seek_inclusive)
            .field("receiver_queue_size", &self.receiver_queue_size)
            .field("chunk", &self.chunk)
            .field("operation_timeout", &self.operation_timeout)
            .field("max_reconnect_to_broker", &self.max_reconnect_to_broker)
            .field("decryptor", &self.decryptor.is_some())
            .field("crypto_failure_action", &self.crypto_failure_action)
            .finish_non_exhaustive()
    }
}

/// Handle to the worker owning one partition subscription.
#[derive(Debug)]
pub struct PartitionSession {
    topic: String,
    partition_index: i32,
    operation_timeout: Duration,
    events: mpsc::UnboundedSender<SessionEvent>,
    status: Arc<SessionStatus>,
    generation: Arc<AtomicU64>,
    shutdown: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl PartitionSession {
    /// Subscribe the partition and spawn its worker.
    ///
    /// Messages are pushed to `output` tagged with `slot`.
    ///
    /// # Errors
    ///
    /// Returns the error of the first subscribe attempt; only later
    /// connection losses are retried.
    pub(crate) async fn start(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        slot: usize,
        output: mpsc::UnboundedSender<Delivery>,
    ) -> Result<Self> {
        let topic = config.topic.clone();
        let partition_index = config.partition_index;
        let operation_timeout = config.operation_timeout;
        let status = Arc::new(SessionStatus::new(SessionState::Initializing));
        let generation = Arc::new(AtomicU64::new(0));
        let shutdown = CancellationToken::new();
        let (events, events_rx) = mpsc::unbounded_channel();

        let mut worker = SessionWorker::new(
            config,
            transport,
            Arc::clone(&status),
            Arc::clone(&generation),
            events_rx,
            output,
            shutdown.clone(),
            slot,
        );
        worker.connect_initial().await?;
        let worker = tokio::spawn(worker.run());

        Ok(Self {
            topic,
            partition_index,
            operation_timeout,
            events,
            status,
            generation,
            shutdown,
            worker: Some(worker),
        })
    }

    /// Partition topic name.
    #[must_use]
    pub fn topic(&self) -> &str { &self.topic }

    /// Partition index, `-1` for an unpartitioned topic.
    #[must_use]
    pub fn partition_index(&self) -> i32 { self.partition_index }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState { self.status.load() }

    /// Number of successful seeks so far.
    pub(crate) fn generation(&self) -> u64 { self.generation.load(Ordering::Acquire) }

    /// Identifier of the last message stored in the partition.
    ///
    /// # Errors
    ///
    /// Fails fast with [`ConsumerError::NotReady`] while reconnecting and
    /// [`ConsumerError::Closed`] after close. A connection loss while the
    /// request is in flight yields [`ConsumerError::Connection`] once; the
    /// request is not resubmitted.
    pub async fn get_last_message_id(&self) -> Result<MessageId> {
        self.control(ControlRequest::GetLastMessageId).await
    }

    /// Reposition the subscription at `id` and return the position the
    /// broker settled on.
    ///
    /// # Errors
    ///
    /// As for [`PartitionSession::get_last_message_id`].
    pub async fn seek(&self, id: MessageId) -> Result<MessageId> {
        self.control(ControlRequest::Seek(id)).await
    }

    /// Reposition the subscription at the first message published at or
    /// after `time`. Returns the id delivery resumes after.
    ///
    /// # Errors
    ///
    /// As for [`PartitionSession::get_last_message_id`].
    pub async fn seek_by_time(&self, time: SystemTime) -> Result<MessageId> {
        self.control(ControlRequest::SeekByTime(time)).await
    }

    /// Queue an acknowledgement. Acks issued while reconnecting are dropped
    /// and the messages redelivered.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Closed`] after close.
    pub fn ack(&self, ids: Vec<MessageId>) -> Result<()> {
        if self.state().is_terminal() {
            return Err(ConsumerError::Closed);
        }
        self.events
            .send(SessionEvent::Ack(ids))
            .map_err(|_| ConsumerError::Closed)
    }

    /// Return permits for messages the consumer dequeued.
    pub(crate) fn flow(&self, permits: u32) {
        if permits > 0 {
            let _ = self.events.send(SessionEvent::Flow(permits));
        }
    }

    async fn control(&self, request: ControlRequest) -> Result<MessageId> {
        self.ensure_ready()?;
        let (reply, response) = oneshot::channel();
        self.events
            .send(SessionEvent::Control { request, reply })
            .map_err(|_| ConsumerError::Closed)?;
        match timeout(self.operation_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ConsumerError::Closed),
            Err(_) => Err(ConsumerError::Timeout(self.operation_timeout)),
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            SessionState::Ready => Ok(()),
            SessionState::Initializing | SessionState::Connecting => Err(ConsumerError::NotReady {
                topic: self.topic.clone(),
            }),
            SessionState::Closing | SessionState::Closed | SessionState::Failed => {
                Err(ConsumerError::Closed)
            }
        }
    }

    /// Stop the worker and wait for it to exit. Queued requests fail with
    /// [`ConsumerError::Closed`]. Closing twice is a no-op.
    pub async fn close(&mut self) {
        self.status.begin_close();
        self.shutdown.cancel();
        if let Some(worker) = self.worker.take()
            && let Err(err) = worker.await
        {
            warn!("session worker ended abnormally: topic={}, error={err}", self.topic);
        }
    }
}

impl Drop for PartitionSession {
    fn drop(&mut self) { self.shutdown.cancel(); }
}

#[cfg(test)]
mod tests;
