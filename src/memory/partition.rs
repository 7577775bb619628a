//! Stored log of one partition.

use std::{collections::HashMap, time::SystemTime};

use tokio::sync::{Mutex, RwLock, watch};
use tokio_util::sync::CancellationToken;

use crate::{
    message_id::{MessageId, MessageIdentifier},
    transport::{RawMessage, StartPosition},
};

/// Append-only log plus per-subscription bookkeeping for one partition.
#[derive(Debug)]
pub(super) struct Partition {
    pub(super) name: String,
    pub(super) index: i32,
    pub(super) ledger: i64,
    log: RwLock<Vec<RawMessage>>,
    appended: watch::Sender<usize>,
    connections: Mutex<Vec<CancellationToken>>,
    acks: Mutex<HashMap<String, Vec<MessageId>>>,
    connects: Mutex<usize>,
}

impl Partition {
    pub(super) fn new(name: String, index: i32, ledger: i64) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            name,
            index,
            ledger,
            log: RwLock::new(Vec::new()),
            appended,
            connections: Mutex::new(Vec::new()),
            acks: Mutex::new(HashMap::new()),
            connects: Mutex::new(0),
        }
    }

    /// Append one entry. A batch shares the entry id and carries one
    /// message per batch index.
    pub(super) async fn append(
        &self,
        mut build: impl FnMut(i64) -> Vec<RawMessage>,
    ) -> Vec<MessageId> {
        let mut log = self.log.write().await;
        let entry = log.last().map_or(0, |last| last.id.entry_id() + 1);
        let messages = build(entry);
        let ids = messages.iter().map(|message| message.id).collect();
        log.extend(messages);
        self.appended.send_replace(log.len());
        ids
    }

    pub(super) fn watch_appends(&self) -> watch::Receiver<usize> { self.appended.subscribe() }

    pub(super) async fn get(&self, position: usize) -> Option<RawMessage> {
        self.log.read().await.get(position).cloned()
    }

    /// Log position dispatch starts from.
    ///
    /// Concrete starts resolve to the first message of the containing
    /// entry, so batch members before the start are sent and left to the
    /// client to filter.
    pub(super) async fn resolve(&self, start: StartPosition) -> usize {
        let log = self.log.read().await;
        if start.id.is_earliest() {
            return 0;
        }
        if start.id.is_latest() {
            return if start.inclusive {
                log.len().saturating_sub(1)
            } else {
                log.len()
            };
        }
        log.iter()
            .position(|message| {
                (message.id.ledger_id(), message.id.entry_id())
                    >= (start.id.ledger_id(), start.id.entry_id())
            })
            .unwrap_or(log.len())
    }

    /// Identifier of the last stored message; entry `-1` when empty.
    pub(super) async fn last_message_id(&self) -> MessageId {
        self.log
            .read()
            .await
            .last()
            .map_or(MessageId::new(self.ledger, -1, self.index), |last| last.id)
    }

    /// Last message published strictly before `time`.
    pub(super) async fn last_published_before(&self, time: SystemTime) -> Option<MessageId> {
        self.log
            .read()
            .await
            .iter()
            .rev()
            .find(|message| message.metadata.publish_time < time)
            .map(|message| message.id)
    }

    pub(super) async fn register(&self, token: CancellationToken) {
        *self.connects.lock().await += 1;
        let mut connections = self.connections.lock().await;
        connections.retain(|existing| !existing.is_cancelled());
        connections.push(token);
    }

    pub(super) async fn connect_count(&self) -> usize { *self.connects.lock().await }

    /// Cancel every live connection. Returns how many were dropped.
    pub(super) async fn disconnect_all(&self) -> usize {
        let mut connections = self.connections.lock().await;
        connections
            .drain(..)
            .filter(|token| !token.is_cancelled())
            .inspect(CancellationToken::cancel)
            .count()
    }

    pub(super) async fn record_acks(&self, subscription: &str, ids: Vec<MessageId>) {
        self.acks
            .lock()
            .await
            .entry(subscription.to_owned())
            .or_default()
            .extend(ids);
    }

    pub(super) async fn acked(&self, subscription: &str) -> Vec<MessageId> {
        self.acks
            .lock()
            .await
            .get(subscription)
            .cloned()
            .unwrap_or_default()
    }
}
