//! Message identifiers and their position ordering.
//!
//! A [`MessageId`] names a message's position inside one partition:
//! `(ledger_id, entry_id)` locates the stored entry and `batch_index`
//! selects a message inside a batched entry. Identifiers from different
//! partitions are not comparable by position, so [`MessageId`] does not
//! implement [`Ord`]; use [`MessageId::compare`] for position ordering.
//!
//! Any type exposing the same accessors through [`MessageIdentifier`] is
//! accepted wherever the client needs an identifier, so applications can
//! carry their own representation (for example one persisted in a
//! database) and hand it back to `seek` or reader construction.

use std::{cmp::Ordering, fmt};

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Length in bytes of the fixed binary encoding of a [`MessageId`].
pub const ENCODED_LEN: usize = 8 + 8 + 4 + 4 + 4;

/// Capability set required of every message identifier.
///
/// The client only ever reads identifiers through this trait; it never
/// assumes the concrete [`MessageId`] representation.
pub trait MessageIdentifier: fmt::Debug + Send + Sync {
    /// Ledger holding the entry.
    fn ledger_id(&self) -> i64;

    /// Entry within the ledger.
    fn entry_id(&self) -> i64;

    /// Partition the message was read from, or `-1` when unknown.
    fn partition_index(&self) -> i32;

    /// Position inside a batched entry, `-1` for non-batched messages.
    fn batch_index(&self) -> i32;

    /// Number of messages in the batched entry, `0` for non-batched messages.
    fn batch_size(&self) -> i32;

    /// Serialise the identifier into its fixed binary form.
    fn serialize(&self) -> Vec<u8> { MessageId::from_identifier(self).to_bytes() }
}

/// Errors raised while decoding or validating identifiers.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum MessageIdError {
    /// The input did not have the fixed encoded length.
    #[error("invalid message id encoding: expected {ENCODED_LEN} bytes, found {found}")]
    InvalidLength { found: usize },
    /// The batch fields violate `batch_index < batch_size`.
    #[error("invalid batch position: index {batch_index}, size {batch_size}")]
    InvalidBatch { batch_index: i32, batch_size: i32 },
}

/// Position of a message in a partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId {
    ledger_id: i64,
    entry_id: i64,
    partition_index: i32,
    batch_index: i32,
    batch_size: i32,
}

impl MessageId {
    /// Identifier for a non-batched message.
    #[must_use]
    pub const fn new(ledger_id: i64, entry_id: i64, partition_index: i32) -> Self {
        Self {
            ledger_id,
            entry_id,
            partition_index,
            batch_index: -1,
            batch_size: 0,
        }
    }

    /// Identifier for a message inside a batched entry.
    ///
    /// # Errors
    ///
    /// Returns [`MessageIdError::InvalidBatch`] unless
    /// `0 <= batch_index < batch_size`.
    pub fn batched(
        ledger_id: i64,
        entry_id: i64,
        partition_index: i32,
        batch_index: i32,
        batch_size: i32,
    ) -> Result<Self, MessageIdError> {
        Self::from_parts(
            ledger_id,
            entry_id,
            partition_index,
            batch_index,
            batch_size,
        )
    }

    /// Start marker for the oldest available message.
    #[must_use]
    pub const fn earliest() -> Self { Self::new(-1, -1, -1) }

    /// Start marker for the next message published after subscribing.
    #[must_use]
    pub const fn latest() -> Self { Self::new(i64::MAX, i64::MAX, -1) }

    /// Copy any identifier into the concrete representation.
    #[must_use]
    pub fn from_identifier<I: MessageIdentifier + ?Sized>(id: &I) -> Self {
        Self {
            ledger_id: id.ledger_id(),
            entry_id: id.entry_id(),
            partition_index: id.partition_index(),
            batch_index: id.batch_index(),
            batch_size: id.batch_size(),
        }
    }

    fn from_parts(
        ledger_id: i64,
        entry_id: i64,
        partition_index: i32,
        batch_index: i32,
        batch_size: i32,
    ) -> Result<Self, MessageIdError> {
        let valid = if batch_size > 0 {
            (0..batch_size).contains(&batch_index)
        } else {
            batch_size == 0 && batch_index == -1
        };
        if !valid {
            return Err(MessageIdError::InvalidBatch {
                batch_index,
                batch_size,
            });
        }
        Ok(Self {
            ledger_id,
            entry_id,
            partition_index,
            batch_index,
            batch_size,
        })
    }

    /// Encode the five fields, big-endian, in declaration order.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ENCODED_LEN);
        buf.put_i64(self.ledger_id);
        buf.put_i64(self.entry_id);
        buf.put_i32(self.partition_index);
        buf.put_i32(self.batch_index);
        buf.put_i32(self.batch_size);
        buf
    }

    /// Decode an identifier produced by [`MessageId::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`MessageIdError`] when the input has the wrong length or
    /// carries an invalid batch position.
    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self, MessageIdError> {
        if bytes.len() != ENCODED_LEN {
            return Err(MessageIdError::InvalidLength { found: bytes.len() });
        }
        let ledger_id = bytes.get_i64();
        let entry_id = bytes.get_i64();
        let partition_index = bytes.get_i32();
        let batch_index = bytes.get_i32();
        let batch_size = bytes.get_i32();
        Self::from_parts(
            ledger_id,
            entry_id,
            partition_index,
            batch_index,
            batch_size,
        )
    }

    /// Same identifier tagged with another partition index.
    #[must_use]
    pub const fn with_partition(mut self, partition_index: i32) -> Self {
        self.partition_index = partition_index;
        self
    }

    /// Compare positions: `(ledger_id, entry_id)` then `batch_index`.
    ///
    /// The partition index never takes part in the comparison.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        self.ledger_id
            .cmp(&other.ledger_id)
            .then(self.entry_id.cmp(&other.entry_id))
            .then(self.batch_index.cmp(&other.batch_index))
    }

    /// `true` when `self` is positioned strictly after `other`.
    #[must_use]
    pub fn is_after(&self, other: &Self) -> bool { self.compare(other) == Ordering::Greater }

    /// `true` when `self` is positioned at or after `other`.
    #[must_use]
    pub fn is_at_or_after(&self, other: &Self) -> bool { self.compare(other) != Ordering::Less }

    /// `true` for the [`earliest`](Self::earliest) and
    /// [`latest`](Self::latest) markers.
    #[must_use]
    pub fn is_sentinel(&self) -> bool { self.is_earliest() || self.is_latest() }

    /// `true` for the earliest marker.
    #[must_use]
    pub fn is_earliest(&self) -> bool { self.ledger_id == -1 && self.entry_id == -1 }

    /// `true` for the latest marker.
    #[must_use]
    pub fn is_latest(&self) -> bool { self.ledger_id == i64::MAX && self.entry_id == i64::MAX }

    /// `true` when the identifier names a stored entry.
    ///
    /// Brokers report an entry id of `-1` for partitions with no messages.
    #[must_use]
    pub fn is_entry_valid(&self) -> bool { self.entry_id >= 0 }

    /// `true` when the identifier addresses a message inside a batch.
    #[must_use]
    pub fn is_batched(&self) -> bool { self.batch_size > 0 }
}

impl MessageIdentifier for MessageId {
    fn ledger_id(&self) -> i64 { self.ledger_id }

    fn entry_id(&self) -> i64 { self.entry_id }

    fn partition_index(&self) -> i32 { self.partition_index }

    fn batch_index(&self) -> i32 { self.batch_index }

    fn batch_size(&self) -> i32 { self.batch_size }

    fn serialize(&self) -> Vec<u8> { self.to_bytes() }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_earliest() {
            return f.write_str("earliest");
        }
        if self.is_latest() {
            return f.write_str("latest");
        }
        write!(
            f,
            "{}:{}:{}:{}",
            self.ledger_id, self.entry_id, self.partition_index, self.batch_index
        )
    }
}

#[cfg(test)]
mod tests;
