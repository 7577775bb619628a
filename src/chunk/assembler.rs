//! Inbound buffer that stitches chunk fragments back into payloads.
//!
//! [`ChunkAssembler`] keys fragments by [`ChunkKey`] and tracks which
//! indexes have arrived. Fragments may arrive in any order and duplicates
//! overwrite the earlier copy; a key completes once every index in
//! `0..total` is present. Expired keys are purged on every push, using the
//! caller's clock reading, so the buffer needs no background timer.

use std::{
    collections::{BTreeMap, HashMap, hash_map::Entry},
    fmt,
    time::Instant,
};

use bytes::{Bytes, BytesMut};
use log::debug;

use super::{ChunkConfig, ChunkError};
use crate::{message_id::MessageId, metrics};

/// Identity shared by every fragment of one chunked message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    producer_id: u64,
    sequence_id: u64,
}

impl ChunkKey {
    /// Build a key from the producer and its sequence number.
    #[must_use]
    pub const fn new(producer_id: u64, sequence_id: u64) -> Self {
        Self {
            producer_id,
            sequence_id,
        }
    }

    /// Producer that split the payload.
    #[must_use]
    pub const fn producer_id(&self) -> u64 { self.producer_id }

    /// Sequence number of the payload within its producer.
    #[must_use]
    pub const fn sequence_id(&self) -> u64 { self.sequence_id }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.producer_id, self.sequence_id)
    }
}

/// Position of one fragment within its chunked message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Message the fragment belongs to.
    pub key: ChunkKey,
    /// Zero-based fragment index.
    pub index: u32,
    /// Number of fragments making up the message.
    pub total: u32,
}

impl ChunkHeader {
    /// Construct a header.
    #[must_use]
    pub const fn new(key: ChunkKey, index: u32, total: u32) -> Self { Self { key, index, total } }
}

/// A completely reassembled chunked message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssembledChunk {
    key: ChunkKey,
    payload: Bytes,
    message_ids: Vec<MessageId>,
}

impl AssembledChunk {
    /// Key shared by the fragments.
    #[must_use]
    pub const fn key(&self) -> ChunkKey { self.key }

    /// Concatenated payload in index order.
    #[must_use]
    pub fn payload(&self) -> &Bytes { &self.payload }

    /// Identifiers of the fragments, in index order.
    #[must_use]
    pub fn message_ids(&self) -> &[MessageId] { &self.message_ids }

    /// Identifier of the final fragment, used as the message position.
    #[must_use]
    pub fn last_message_id(&self) -> Option<MessageId> { self.message_ids.last().copied() }

    /// Split into payload and fragment identifiers.
    #[must_use]
    pub fn into_parts(self) -> (Bytes, Vec<MessageId>) { (self.payload, self.message_ids) }
}

/// Why an incomplete message was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictionReason {
    /// The key outlived `expire_time_of_incomplete_chunk`.
    Expired,
    /// A new key needed room under `max_pending_chunked_message`.
    Capacity,
    /// A fragment announced a different chunk count for the same key.
    Replaced,
}

impl EvictionReason {
    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::Capacity => "capacity",
            Self::Replaced => "replaced",
        }
    }
}

/// An incomplete message dropped from the buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvictedChunk {
    /// Key of the dropped message.
    pub key: ChunkKey,
    /// Why the message was dropped.
    pub reason: EvictionReason,
    /// Identifiers of the fragments received so far.
    pub message_ids: Vec<MessageId>,
}

/// Outcome of feeding one fragment to the assembler.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ChunkPush {
    /// The message completed by this fragment, if any.
    pub completed: Option<AssembledChunk>,
    /// Incomplete messages evicted while handling this fragment.
    pub evicted: Vec<EvictedChunk>,
}

// Fragments are stored sparsely so the announced total never sizes an
// allocation.
#[derive(Debug)]
struct PendingChunk {
    fragments: BTreeMap<u32, (MessageId, Bytes)>,
    total: u32,
    first_fragment_at: Instant,
    arrival: u64,
}

impl PendingChunk {
    fn new(total: u32, first_fragment_at: Instant, arrival: u64) -> Self {
        Self {
            fragments: BTreeMap::new(),
            total,
            first_fragment_at,
            arrival,
        }
    }

    fn received(&self) -> usize { self.fragments.len() }

    fn insert(&mut self, index: u32, message_id: MessageId, payload: Bytes) {
        self.fragments.insert(index, (message_id, payload));
    }

    fn is_complete(&self) -> bool { self.received() == self.total as usize }

    fn message_ids(&self) -> Vec<MessageId> { self.fragments.values().map(|(id, _)| *id).collect() }

    fn assemble(self, key: ChunkKey) -> AssembledChunk {
        let len = self.fragments.values().map(|(_, p)| p.len()).sum();
        let mut payload = BytesMut::with_capacity(len);
        let mut message_ids = Vec::with_capacity(self.fragments.len());
        for (id, part) in self.fragments.into_values() {
            payload.extend_from_slice(&part);
            message_ids.push(id);
        }
        AssembledChunk {
            key,
            payload: payload.freeze(),
            message_ids,
        }
    }
}

/// Bounded, expiring buffer of incomplete chunked messages.
///
/// The assembler is owned by a single session worker and is not shared.
#[derive(Debug)]
pub struct ChunkAssembler {
    config: ChunkConfig,
    pending: HashMap<ChunkKey, PendingChunk>,
    arrivals: u64,
}

impl ChunkAssembler {
    /// Create an empty assembler with normalised limits.
    #[must_use]
    pub fn new(config: ChunkConfig) -> Self {
        Self {
            config: config.normalized(),
            pending: HashMap::new(),
            arrivals: 0,
        }
    }

    /// Limits in force.
    #[must_use]
    pub fn config(&self) -> &ChunkConfig { &self.config }

    /// Number of incomplete messages currently buffered.
    #[must_use]
    pub fn pending_len(&self) -> usize { self.pending.len() }

    /// Feed a fragment using the current time.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError`] when the header is malformed.
    pub fn push(
        &mut self,
        header: ChunkHeader,
        message_id: MessageId,
        payload: Bytes,
    ) -> Result<ChunkPush, ChunkError> {
        self.push_at(header, message_id, payload, Instant::now())
    }

    /// Feed a fragment using an explicit clock reading.
    ///
    /// Expired keys are purged first. The returned [`ChunkPush`] carries the
    /// completed message, if this fragment finished one, and every key
    /// evicted along the way.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError`] when the header declares zero chunks or an
    /// index outside `0..total`. The buffer is left untouched.
    pub fn push_at(
        &mut self,
        header: ChunkHeader,
        message_id: MessageId,
        payload: Bytes,
        now: Instant,
    ) -> Result<ChunkPush, ChunkError> {
        let ChunkHeader { key, index, total } = header;
        if total == 0 {
            return Err(ChunkError::EmptySeries { key });
        }
        if index >= total {
            return Err(ChunkError::IndexOutOfRange { key, index, total });
        }

        let mut evicted = self.purge_expired_at(now);

        if total == 1 {
            if let Some(stale) = self.pending.remove(&key) {
                evicted.push(Self::evict(key, &stale, EvictionReason::Replaced));
            }
            return Ok(ChunkPush {
                completed: Some(AssembledChunk {
                    key,
                    payload,
                    message_ids: vec![message_id],
                }),
                evicted,
            });
        }

        let replaced = self
            .pending
            .get(&key)
            .is_some_and(|existing| existing.total != total);
        if replaced && let Some(stale) = self.pending.remove(&key) {
            evicted.push(Self::evict(key, &stale, EvictionReason::Replaced));
        }

        if !self.pending.contains_key(&key) {
            while self.pending.len() >= self.config.max_pending_chunked_message {
                let Some(oldest) = self.oldest_key() else { break };
                if let Some(stale) = self.pending.remove(&oldest) {
                    evicted.push(Self::evict(oldest, &stale, EvictionReason::Capacity));
                }
            }
        }

        self.arrivals += 1;
        let arrival = self.arrivals;
        let completed = match self.pending.entry(key) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().insert(index, message_id, payload);
                if occupied.get().is_complete() {
                    Some(occupied.remove().assemble(key))
                } else {
                    None
                }
            }
            Entry::Vacant(vacant) => {
                vacant
                    .insert(PendingChunk::new(total, now, arrival))
                    .insert(index, message_id, payload);
                None
            }
        };

        Ok(ChunkPush { completed, evicted })
    }

    /// Drop every key older than the expiry, measured from its first
    /// fragment.
    pub fn purge_expired_at(&mut self, now: Instant) -> Vec<EvictedChunk> {
        let expiry = self.config.expire_time_of_incomplete_chunk;
        let expired: Vec<ChunkKey> = self
            .pending
            .iter()
            .filter(|(_, chunk)| now.saturating_duration_since(chunk.first_fragment_at) > expiry)
            .map(|(key, _)| *key)
            .collect();

        expired
            .into_iter()
            .filter_map(|key| {
                self.pending
                    .remove(&key)
                    .map(|stale| Self::evict(key, &stale, EvictionReason::Expired))
            })
            .collect()
    }

    /// Discard every buffered fragment without reporting evictions.
    ///
    /// Used when the session repositions, since the broker redelivers from
    /// the new position.
    pub fn clear(&mut self) { self.pending.clear(); }

    fn oldest_key(&self) -> Option<ChunkKey> {
        self.pending
            .iter()
            .min_by_key(|(_, chunk)| (chunk.first_fragment_at, chunk.arrival))
            .map(|(key, _)| *key)
    }

    fn evict(key: ChunkKey, stale: &PendingChunk, reason: EvictionReason) -> EvictedChunk {
        debug!(
            "evicting incomplete chunked message: key={key}, reason={}, received={}/{}",
            reason.as_str(),
            stale.received(),
            stale.total
        );
        metrics::inc_chunks_evicted(reason);
        EvictedChunk {
            key,
            reason,
            message_ids: stale.message_ids(),
        }
    }
}
