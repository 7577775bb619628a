//! Limits applied to incomplete chunked messages.

use std::time::Duration;

/// Default cap on concurrently incomplete chunked messages.
pub const DEFAULT_MAX_PENDING_CHUNKED_MESSAGE: usize = 100;
/// Default age after which an incomplete chunked message is dropped.
pub const DEFAULT_EXPIRE_TIME_OF_INCOMPLETE_CHUNK: Duration = Duration::from_secs(60);

/// Settings bounding the chunk reassembly buffer of one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Maximum number of keys buffered at once. The oldest key is evicted
    /// when a new key would exceed the cap.
    pub max_pending_chunked_message: usize,
    /// Age, measured from the first fragment, after which a key is evicted.
    pub expire_time_of_incomplete_chunk: Duration,
    /// Acknowledge the fragments of evicted keys so they are not redelivered.
    pub auto_ack_incomplete_chunk: bool,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_pending_chunked_message: DEFAULT_MAX_PENDING_CHUNKED_MESSAGE,
            expire_time_of_incomplete_chunk: DEFAULT_EXPIRE_TIME_OF_INCOMPLETE_CHUNK,
            auto_ack_incomplete_chunk: false,
        }
    }
}

impl ChunkConfig {
    /// Replace zero limits with their defaults.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.max_pending_chunked_message == 0 {
            self.max_pending_chunked_message = DEFAULT_MAX_PENDING_CHUNKED_MESSAGE;
        }
        if self.expire_time_of_incomplete_chunk.is_zero() {
            self.expire_time_of_incomplete_chunk = DEFAULT_EXPIRE_TIME_OF_INCOMPLETE_CHUNK;
        }
        self
    }
}
