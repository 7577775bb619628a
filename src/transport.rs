//! Contract between sessions and the broker connection.
//!
//! The wire protocol, framing and connection pooling live behind
//! [`Transport`]. A session asks the transport to subscribe one partition
//! and receives a [`Connection`]: a [`CommandChannel`] for request/response
//! commands plus a channel of inbound [`RawMessage`]s. The frame channel
//! closing means the connection dropped.

use std::{collections::HashMap, fmt, time::SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{
    chunk::{ChunkHeader, ChunkKey},
    message_id::MessageId,
};

/// Errors surfaced by a [`Transport`] or [`CommandChannel`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The broker could not be reached or the handshake failed.
    #[error("connection error: {0}")]
    Connection(String),
    /// The connection dropped while a command was in flight.
    #[error("connection dropped")]
    Disconnected,
    /// The broker did not answer in time.
    #[error("broker request timed out")]
    Timeout,
    /// The broker refused the request; retrying will not help.
    #[error("request rejected by broker: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Whether the failure is transient and worth a reconnect.
    #[must_use]
    pub fn is_retryable(&self) -> bool { !matches!(self, Self::Rejected(_)) }
}

/// Where a subscription starts reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StartPosition {
    /// Start identifier, possibly a sentinel.
    pub id: MessageId,
    /// Whether the message at `id` itself is delivered.
    pub inclusive: bool,
}

impl StartPosition {
    /// Start at `id`, excluding it.
    #[must_use]
    pub const fn after(id: MessageId) -> Self {
        Self {
            id,
            inclusive: false,
        }
    }

    /// Start at `id`, including it.
    #[must_use]
    pub const fn at(id: MessageId) -> Self {
        Self {
            id,
            inclusive: true,
        }
    }

    /// `true` when a message at `id` lies before the start and must be
    /// skipped. Sentinel starts never skip anything; the broker resolves
    /// them.
    #[must_use]
    pub fn skips(&self, id: &MessageId) -> bool {
        if self.id.is_sentinel() {
            return false;
        }
        if self.inclusive {
            !id.is_at_or_after(&self.id)
        } else {
            !id.is_after(&self.id)
        }
    }
}

/// Parameters for subscribing one partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribeRequest {
    /// Fully qualified partition topic name.
    pub topic: String,
    /// Partition index, `-1` for an unpartitioned topic.
    pub partition_index: i32,
    /// Subscription name.
    pub subscription: String,
    /// Name of this consumer within the subscription.
    pub consumer_name: String,
    /// `false` for reader subscriptions, which keep no broker-side cursor.
    pub durable: bool,
    /// Position the broker starts dispatching from.
    pub start: StartPosition,
}

/// Metadata attached to every inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageMetadata {
    /// Name of the producing client.
    pub producer_name: String,
    /// Numeric producer identity, shared by the chunks of one payload.
    pub producer_id: u64,
    /// Producer sequence number.
    pub sequence_id: u64,
    /// Broker publish timestamp.
    pub publish_time: SystemTime,
    /// Application supplied event time.
    pub event_time: Option<SystemTime>,
    /// Partitioning key.
    pub key: Option<String>,
    /// Application properties.
    pub properties: HashMap<String, String>,
    /// Chunk position as `(index, total)` for chunked payloads.
    pub chunk: Option<(u32, u32)>,
    /// Whether the payload is encrypted.
    pub encrypted: bool,
    /// Number of times the broker redelivered the message.
    pub redelivery_count: u32,
}

impl MessageMetadata {
    /// Metadata for a plain message from `producer_name`.
    #[must_use]
    pub fn new(producer_name: impl Into<String>, producer_id: u64, sequence_id: u64) -> Self {
        Self {
            producer_name: producer_name.into(),
            producer_id,
            sequence_id,
            publish_time: SystemTime::now(),
            event_time: None,
            key: None,
            properties: HashMap::new(),
            chunk: None,
            encrypted: false,
            redelivery_count: 0,
        }
    }

    /// Chunk header for chunked payloads with more than one fragment.
    #[must_use]
    pub fn chunk_header(&self) -> Option<ChunkHeader> {
        self.chunk.map(|(index, total)| {
            ChunkHeader::new(
                ChunkKey::new(self.producer_id, self.sequence_id),
                index,
                total,
            )
        })
    }
}

/// A frame delivered by the broker before reassembly and decryption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMessage {
    /// Position of the frame.
    pub id: MessageId,
    /// Payload bytes as sent on the wire.
    pub payload: Bytes,
    /// Frame metadata.
    pub metadata: MessageMetadata,
}

/// Request/response commands a session sends over its connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Grant the broker permission to dispatch more messages.
    Flow { permits: u32 },
    /// Acknowledge consumed messages.
    Ack(Vec<MessageId>),
    /// Reposition the subscription at an identifier.
    Seek(MessageId),
    /// Reposition the subscription at the first message published at or
    /// after a time.
    SeekByTime(SystemTime),
    /// Ask for the identifier of the last stored message.
    GetLastMessageId,
}

impl Command {
    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Flow { .. } => "flow",
            Self::Ack(_) => "ack",
            Self::Seek(_) => "seek",
            Self::SeekByTime(_) => "seek_by_time",
            Self::GetLastMessageId => "get_last_message_id",
        }
    }
}

/// Broker answers to [`Command`]s.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandResponse {
    /// The command succeeded with nothing to report.
    Done,
    /// Answer to [`Command::GetLastMessageId`]. An entry id of `-1` means
    /// the partition holds no messages.
    LastMessageId(MessageId),
    /// Answer to seeks: the subscription now resumes after this identifier
    /// (for [`Command::SeekByTime`]) or at it (for [`Command::Seek`]).
    Position(MessageId),
}

/// Command half of an established subscription.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Send a command and wait for the broker's answer.
    async fn request(&self, command: Command) -> Result<CommandResponse, TransportError>;

    /// Close the subscription. Inbound frames stop afterwards.
    async fn close(&self);
}

/// An established subscription to one partition.
pub struct Connection {
    /// Command channel for the subscription.
    pub commands: Box<dyn CommandChannel>,
    /// Inbound frames; closes when the connection drops.
    pub frames: mpsc::Receiver<RawMessage>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("commands", &"<command channel>")
            .field("frames", &self.frames)
            .finish()
    }
}

/// Establishes subscriptions with the broker.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the handshake and subscribe one partition.
    async fn connect(&self, request: &SubscribeRequest) -> Result<Connection, TransportError>;
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::StartPosition;
    use crate::message_id::MessageId;

    #[rstest]
    #[case(StartPosition::at(MessageId::new(1, 4, 0)), MessageId::new(1, 3, 0), true)]
    #[case(StartPosition::at(MessageId::new(1, 4, 0)), MessageId::new(1, 4, 0), false)]
    #[case(StartPosition::after(MessageId::new(1, 4, 0)), MessageId::new(1, 4, 0), true)]
    #[case(StartPosition::after(MessageId::new(1, 4, 0)), MessageId::new(1, 5, 0), false)]
    #[case(StartPosition::after(MessageId::earliest()), MessageId::new(0, 0, 0), false)]
    #[case(StartPosition::after(MessageId::latest()), MessageId::new(0, 0, 0), false)]
    fn start_position_skips_messages_before_it(
        #[case] start: StartPosition,
        #[case] id: MessageId,
        #[case] skipped: bool,
    ) {
        assert_eq!(start.skips(&id), skipped);
    }

    #[test]
    fn batched_start_skips_earlier_batch_members() {
        let start = StartPosition::after(MessageId::batched(2, 2, 0, 1, 4).expect("valid batch"));
        let earlier = MessageId::batched(2, 2, 0, 1, 4).expect("valid batch");
        let later = MessageId::batched(2, 2, 0, 2, 4).expect("valid batch");
        assert!(start.skips(&earlier));
        assert!(!start.skips(&later));
    }
}
