//! Per-partition read cursor answering `has_next`.

use crate::{message_id::MessageId, transport::StartPosition};

/// Position of the next message the caller has not seen yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ReadCursor {
    position: MessageId,
    inclusive: bool,
}

impl ReadCursor {
    pub(crate) const fn new(position: MessageId, inclusive: bool) -> Self { Self { position, inclusive } }

    /// Cursor just past a dequeued message.
    pub(crate) const fn after(id: MessageId) -> Self { Self::new(id, false) }

    /// Whether a partition whose last stored message is `last` still holds
    /// messages at or past the cursor.
    pub(crate) fn has_more(&self, last: &MessageId) -> bool {
        if !last.is_entry_valid() {
            return false;
        }
        if self.position.is_latest() {
            return self.inclusive;
        }
        if self.inclusive {
            last.is_at_or_after(&self.position)
        } else {
            last.is_after(&self.position)
        }
    }
}

impl From<StartPosition> for ReadCursor {
    fn from(start: StartPosition) -> Self { Self::new(start.id, start.inclusive) }
}
