//! Session lifecycle state shared between the handle and its worker.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a [`PartitionSession`](super::PartitionSession).
///
/// `Initializing → Connecting → Ready`, back to `Connecting` whenever the
/// connection drops, and `Closing → Closed` on explicit close. `Failed` is
/// terminal and only reached when a reconnect limit is configured and
/// exhausted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Initializing = 0,
    Connecting = 1,
    Ready = 2,
    Closing = 3,
    Closed = 4,
    Failed = 5,
}

impl SessionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initializing,
            1 => Self::Connecting,
            2 => Self::Ready,
            3 => Self::Closing,
            4 => Self::Closed,
            _ => Self::Failed,
        }
    }

    /// `true` once the session can no longer serve requests.
    #[must_use]
    pub const fn is_terminal(self) -> bool { matches!(self, Self::Closing | Self::Closed | Self::Failed) }
}

/// Atomic cell holding a [`SessionState`].
#[derive(Debug)]
pub(crate) struct SessionStatus(AtomicU8);

impl SessionStatus {
    pub(crate) fn new(state: SessionState) -> Self { Self(AtomicU8::new(state as u8)) }

    pub(crate) fn load(&self) -> SessionState { SessionState::from_u8(self.0.load(Ordering::Acquire)) }

    pub(crate) fn store(&self, state: SessionState) { self.0.store(state as u8, Ordering::Release); }

    /// Move to `Closing` unless the session already ended.
    pub(crate) fn begin_close(&self) {
        let _ = self.0.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            if SessionState::from_u8(current).is_terminal() {
                None
            } else {
                Some(SessionState::Closing as u8)
            }
        });
    }
}
