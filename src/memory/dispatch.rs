//! Per-connection dispatch and command handling.

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use async_trait::async_trait;
use log::debug;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use super::{Faults, partition::Partition};
use crate::{
    message_id::MessageId,
    transport::{Command, CommandChannel, CommandResponse, RawMessage, TransportError},
};

/// Permits granted by the subscriber of one connection.
#[derive(Debug, Default)]
pub(super) struct Permits {
    available: AtomicU32,
    granted: Notify,
}

impl Permits {
    fn grant(&self, permits: u32) {
        let _ = self
            .available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(permits))
            });
        self.granted.notify_one();
    }

    fn take(&self) -> bool {
        self.available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            })
            .is_ok()
    }
}

/// Push stored messages to one subscriber while it holds permits.
///
/// Ends when the connection token is cancelled or the subscriber drops its
/// frame receiver; dropping `frames` signals the disconnect.
pub(super) async fn dispatch(
    partition: Arc<Partition>,
    permits: Arc<Permits>,
    token: CancellationToken,
    frames: mpsc::Sender<RawMessage>,
    mut position: usize,
) {
    let mut appended = partition.watch_appends();
    loop {
        match partition.get(position).await {
            Some(frame) if permits.take() => {
                tokio::select! {
                    biased;

                    () = token.cancelled() => break,
                    sent = frames.send(frame) => {
                        if sent.is_err() {
                            break;
                        }
                        position += 1;
                    }
                }
            }
            Some(_) => {
                tokio::select! {
                    biased;

                    () = token.cancelled() => break,
                    () = permits.granted.notified() => {}
                }
            }
            None => {
                tokio::select! {
                    biased;

                    () = token.cancelled() => break,
                    changed = appended.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    debug!(
        "dispatch stopped: topic={}, position={position}",
        partition.name
    );
}

/// Command half of an in-memory subscription.
pub(super) struct MemoryCommands {
    pub(super) partition: Arc<Partition>,
    pub(super) permits: Arc<Permits>,
    pub(super) faults: Arc<Faults>,
    pub(super) subscription: String,
    pub(super) token: CancellationToken,
}

#[async_trait]
impl CommandChannel for MemoryCommands {
    async fn request(&self, command: Command) -> Result<CommandResponse, TransportError> {
        if self.token.is_cancelled() {
            return Err(TransportError::Disconnected);
        }
        let control = !matches!(command, Command::Flow { .. } | Command::Ack(_));
        if control && self.faults.commands_failing() {
            return Err(TransportError::Timeout);
        }
        match command {
            Command::Flow { permits } => {
                self.permits.grant(permits);
                Ok(CommandResponse::Done)
            }
            Command::Ack(ids) => {
                self.partition.record_acks(&self.subscription, ids).await;
                Ok(CommandResponse::Done)
            }
            Command::GetLastMessageId => Ok(CommandResponse::LastMessageId(
                self.partition.last_message_id().await,
            )),
            Command::Seek(id) => Ok(CommandResponse::Position(id)),
            Command::SeekByTime(time) => Ok(CommandResponse::Position(
                self.partition
                    .last_published_before(time)
                    .await
                    .unwrap_or_else(MessageId::earliest),
            )),
        }
    }

    async fn close(&self) { self.token.cancel(); }
}
