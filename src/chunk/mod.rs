//! Reassembly of payloads split into chunks by the producer.
//!
//! Producers split payloads that exceed the broker's size limit into
//! fragments sharing a [`ChunkKey`]. [`ChunkAssembler`] buffers the
//! fragments of each key until every index is present and then emits the
//! concatenated payload. Memory is bounded by a cap on concurrently
//! incomplete keys and by an expiry measured from each key's first
//! fragment.

pub mod assembler;
pub mod config;
pub mod error;

pub use assembler::{
    AssembledChunk,
    ChunkAssembler,
    ChunkHeader,
    ChunkKey,
    ChunkPush,
    EvictedChunk,
    EvictionReason,
};
pub use config::ChunkConfig;
pub use error::ChunkError;
