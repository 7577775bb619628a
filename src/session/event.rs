//! Events queued to a session worker.
//!
//! Every request travels with a one-shot reply slot that the worker
//! fulfils or fails exactly once.

use std::time::SystemTime;

use tokio::sync::oneshot;

use crate::{error::ConsumerError, message::Message, message_id::MessageId};

/// Reply slot for a control request.
pub(crate) type Responder<T> = oneshot::Sender<Result<T, ConsumerError>>;

/// Control requests answered with an identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ControlRequest {
    Seek(MessageId),
    SeekByTime(SystemTime),
    GetLastMessageId,
}

/// Work items processed by the session event loop.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    /// A control request and its reply slot.
    Control {
        request: ControlRequest,
        reply: Responder<MessageId>,
    },
    /// Acknowledge messages.
    Ack(Vec<MessageId>),
    /// Permits returned by the consumer after dequeuing messages.
    Flow(u32),
}

impl SessionEvent {
    /// Fail the event's reply slot, if it has one.
    pub(crate) fn fail(self, error: impl FnOnce() -> ConsumerError) {
        if let Self::Control { reply, .. } = self {
            let _ = reply.send(Err(error()));
        }
    }
}

/// A message pushed into the consumer's merge stage.
#[derive(Debug)]
pub(crate) struct Delivery {
    /// Index of the producing session within its consumer.
    pub(crate) slot: usize,
    /// Seek generation of the session when the message was delivered.
    pub(crate) generation: u64,
    pub(crate) message: Message,
}
