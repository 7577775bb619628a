//! Producers publishing into a [`MemoryBroker`](super::MemoryBroker).

use std::{
    collections::HashMap,
    hash::{DefaultHasher, Hash, Hasher},
    sync::Arc,
    time::SystemTime,
};

use bytes::Bytes;

use super::{BrokerInner, partition::Partition};
use crate::{
    message_id::MessageId,
    transport::{MessageMetadata, RawMessage, TransportError},
};

/// A message to publish.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    payload: Bytes,
    key: Option<String>,
    properties: HashMap<String, String>,
    event_time: Option<SystemTime>,
    publish_time: Option<SystemTime>,
    partition: Option<u32>,
    encrypted: bool,
}

impl OutgoingMessage {
    /// Message carrying `payload`.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }

    /// Set the partitioning key. Keyed messages always land on the same
    /// partition.
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Add an application property.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Set the application event time.
    #[must_use]
    pub fn event_time(mut self, time: SystemTime) -> Self {
        self.event_time = Some(time);
        self
    }

    /// Override the broker publish timestamp.
    #[must_use]
    pub fn publish_time(mut self, time: SystemTime) -> Self {
        self.publish_time = Some(time);
        self
    }

    /// Route to a specific partition.
    #[must_use]
    pub fn partition(mut self, partition: u32) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Flag the payload as encrypted. The broker stores it unchanged.
    #[must_use]
    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }
}

/// Publishes to one topic of a [`MemoryBroker`](super::MemoryBroker).
#[derive(Debug)]
pub struct MemoryProducer {
    pub(super) broker: Arc<BrokerInner>,
    pub(super) topic: String,
    pub(super) name: String,
    pub(super) producer_id: u64,
    pub(super) sequence: u64,
    pub(super) round_robin: u32,
}

impl MemoryProducer {
    /// Producer name stamped on every message.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Publish a plain payload.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Rejected`] when the target partition does
    /// not exist.
    pub async fn send(&mut self, payload: impl Into<Bytes>) -> Result<MessageId, TransportError> {
        self.send_message(OutgoingMessage::new(payload)).await
    }

    /// Publish a message with metadata.
    ///
    /// # Errors
    ///
    /// As for [`MemoryProducer::send`].
    pub async fn send_message(
        &mut self,
        message: OutgoingMessage,
    ) -> Result<MessageId, TransportError> {
        let partition = self.route(&message)?;
        let sequence_id = self.next_sequence();
        let metadata = self.metadata(&message, sequence_id);
        let ids = partition
            .append(|entry| {
                vec![RawMessage {
                    id: MessageId::new(partition.ledger, entry, partition.index),
                    payload: message.payload.clone(),
                    metadata: metadata.clone(),
                }]
            })
            .await;
        ids.last()
            .copied()
            .ok_or_else(|| TransportError::Rejected("nothing appended".into()))
    }

    /// Publish several payloads as one batched entry.
    ///
    /// # Errors
    ///
    /// As for [`MemoryProducer::send`], and [`TransportError::Rejected`]
    /// for an empty or oversized batch.
    pub async fn send_batch<I, P>(&mut self, payloads: I) -> Result<Vec<MessageId>, TransportError>
    where
        I: IntoIterator<Item = P>,
        P: Into<Bytes>,
    {
        let messages: Vec<OutgoingMessage> = payloads.into_iter().map(OutgoingMessage::new).collect();
        let size = i32::try_from(messages.len())
            .map_err(|_| TransportError::Rejected("batch too large".into()))?;
        let Some(first) = messages.first() else {
            return Err(TransportError::Rejected("empty batch".into()));
        };
        let partition = self.route(first)?;
        let mut frames = Vec::with_capacity(messages.len());
        for message in &messages {
            let sequence_id = self.next_sequence();
            frames.push((message.payload.clone(), self.metadata(message, sequence_id)));
        }
        let mut built = Ok(());
        let ids = partition
            .append(|entry| {
                let mut out = Vec::with_capacity(frames.len());
                for (batch_index, (payload, metadata)) in (0..size).zip(frames.iter()) {
                    match MessageId::batched(partition.ledger, entry, partition.index, batch_index, size) {
                        Ok(id) => out.push(RawMessage {
                            id,
                            payload: payload.clone(),
                            metadata: metadata.clone(),
                        }),
                        Err(err) => built = Err(TransportError::Rejected(err.to_string())),
                    }
                }
                out
            })
            .await;
        built.map(|()| ids)
    }

    /// Split `payload` into chunks of at most `chunk_size` bytes, each
    /// stored as its own entry. Returns the ids of every chunk.
    ///
    /// # Errors
    ///
    /// As for [`MemoryProducer::send`], and [`TransportError::Rejected`]
    /// for a zero `chunk_size`.
    pub async fn send_chunked(
        &mut self,
        message: OutgoingMessage,
        chunk_size: usize,
    ) -> Result<Vec<MessageId>, TransportError> {
        if chunk_size == 0 {
            return Err(TransportError::Rejected("chunk size must be positive".into()));
        }
        let mut pieces: Vec<Bytes> = message
            .payload
            .chunks(chunk_size)
            .map(Bytes::copy_from_slice)
            .collect();
        if pieces.is_empty() {
            pieces.push(Bytes::new());
        }
        let total = u32::try_from(pieces.len())
            .map_err(|_| TransportError::Rejected("too many chunks".into()))?;
        let sequence_id = self.next_sequence();
        let mut ids = Vec::with_capacity(pieces.len());
        for (index, piece) in (0..total).zip(pieces) {
            ids.push(
                self.send_chunk(&message, sequence_id, index, total, piece)
                    .await?,
            );
        }
        Ok(ids)
    }

    /// Publish one chunk of a chunked message explicitly, for interleaving
    /// or leaving a series incomplete.
    ///
    /// # Errors
    ///
    /// As for [`MemoryProducer::send`].
    pub async fn send_chunk(
        &mut self,
        message: &OutgoingMessage,
        sequence_id: u64,
        index: u32,
        total: u32,
        piece: impl Into<Bytes>,
    ) -> Result<MessageId, TransportError> {
        let partition = self.route(message)?;
        let mut metadata = self.metadata(message, sequence_id);
        metadata.chunk = Some((index, total));
        let piece = piece.into();
        let ids = partition
            .append(|entry| {
                vec![RawMessage {
                    id: MessageId::new(partition.ledger, entry, partition.index),
                    payload: piece.clone(),
                    metadata: metadata.clone(),
                }]
            })
            .await;
        ids.last()
            .copied()
            .ok_or_else(|| TransportError::Rejected("nothing appended".into()))
    }

    /// Reserve a sequence id for [`MemoryProducer::send_chunk`].
    pub fn next_sequence(&mut self) -> u64 {
        let sequence = self.sequence;
        self.sequence += 1;
        sequence
    }

    fn metadata(&self, message: &OutgoingMessage, sequence_id: u64) -> MessageMetadata {
        let mut metadata = MessageMetadata::new(&self.name, self.producer_id, sequence_id);
        metadata.publish_time = message.publish_time.unwrap_or_else(SystemTime::now);
        metadata.event_time = message.event_time;
        metadata.key.clone_from(&message.key);
        metadata.properties.clone_from(&message.properties);
        metadata.encrypted = message.encrypted;
        metadata
    }

    fn route(&mut self, message: &OutgoingMessage) -> Result<Arc<Partition>, TransportError> {
        let count = self.broker.partition_count_of(&self.topic);
        if count == 0 {
            return self.broker.partition(&self.topic);
        }
        let index = match (message.partition, message.key.as_deref()) {
            (Some(partition), _) => partition,
            (None, Some(key)) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                u32::try_from(hasher.finish() % u64::from(count)).unwrap_or_default()
            }
            (None, None) => {
                let index = self.round_robin % count;
                self.round_robin = self.round_robin.wrapping_add(1);
                index
            }
        };
        self.broker
            .partition(&crate::lookup::partition_topic(&self.topic, index))
    }
}
