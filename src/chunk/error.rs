//! Errors raised for malformed chunk headers.

use thiserror::Error;

use super::ChunkKey;

/// Reasons a fragment is rejected by the [`ChunkAssembler`](super::ChunkAssembler).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    /// The header announced a message made of zero chunks.
    #[error("chunked message {key} declares zero chunks")]
    EmptySeries { key: ChunkKey },
    /// The fragment index lies outside `0..total_chunks`.
    #[error("chunk index {index} out of range for {key} with {total} chunks")]
    IndexOutOfRange { key: ChunkKey, index: u32, total: u32 },
}
