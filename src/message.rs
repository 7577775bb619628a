//! Messages handed to readers and consumers.

use std::{collections::HashMap, time::SystemTime};

use bytes::Bytes;

use crate::{
    message_id::MessageId,
    schema::{Schema, SchemaError},
    transport::MessageMetadata,
};

/// A complete, decrypted message from one partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    id: MessageId,
    topic: String,
    payload: Bytes,
    metadata: MessageMetadata,
    chunk_ids: Vec<MessageId>,
    encrypted: bool,
}

impl Message {
    pub(crate) fn new(
        id: MessageId,
        topic: String,
        payload: Bytes,
        metadata: MessageMetadata,
    ) -> Self {
        Self {
            id,
            topic,
            payload,
            metadata,
            chunk_ids: Vec::new(),
            encrypted: false,
        }
    }

    pub(crate) fn with_chunk_ids(mut self, chunk_ids: Vec<MessageId>) -> Self {
        self.chunk_ids = chunk_ids;
        self
    }

    pub(crate) fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    /// Position of the message. For chunked messages this is the position
    /// of the final chunk.
    #[must_use]
    pub const fn id(&self) -> MessageId { self.id }

    /// Partition topic the message was read from.
    #[must_use]
    pub fn topic(&self) -> &str { &self.topic }

    /// Payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes { &self.payload }

    /// Partitioning key, if the producer set one.
    #[must_use]
    pub fn key(&self) -> Option<&str> { self.metadata.key.as_deref() }

    /// Application properties.
    #[must_use]
    pub fn properties(&self) -> &HashMap<String, String> { &self.metadata.properties }

    /// Broker publish timestamp.
    #[must_use]
    pub fn publish_time(&self) -> SystemTime { self.metadata.publish_time }

    /// Application event time, if set.
    #[must_use]
    pub fn event_time(&self) -> Option<SystemTime> { self.metadata.event_time }

    /// Name of the producing client.
    #[must_use]
    pub fn producer_name(&self) -> &str { &self.metadata.producer_name }

    /// Number of earlier deliveries of this message.
    #[must_use]
    pub fn redelivery_count(&self) -> u32 { self.metadata.redelivery_count }

    /// `true` when the payload could not be decrypted and is delivered as
    /// received.
    #[must_use]
    pub fn is_encrypted(&self) -> bool { self.encrypted }

    /// Identifiers of the chunks this message was reassembled from; empty
    /// for messages sent whole.
    #[must_use]
    pub fn chunk_ids(&self) -> &[MessageId] { &self.chunk_ids }

    /// Decode the payload with `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Decode`] when the payload does not match.
    pub fn value<S: Schema>(&self, schema: &S) -> Result<S::Value, SchemaError> {
        schema.decode(&self.payload)
    }

    /// Identifiers to acknowledge for this message.
    pub(crate) fn ack_ids(&self) -> Vec<MessageId> {
        if self.chunk_ids.is_empty() {
            vec![self.id]
        } else {
            self.chunk_ids.clone()
        }
    }
}
