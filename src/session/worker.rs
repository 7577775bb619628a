//! Event loop owning one partition subscription.
//!
//! The worker is the only code that touches the connection, the chunk
//! assembler and the backoff state of its session. It polls the shutdown
//! token, inbound frames and queued requests with a `biased`
//! `tokio::select!`, so frames already queued are always handled before a
//! request that arrived after them.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use log::{debug, error, info, warn};
use tokio::{sync::mpsc, time::timeout};
use tokio_util::sync::CancellationToken;

use super::{
    SessionConfig,
    event::{ControlRequest, Delivery, SessionEvent},
    state::{SessionState, SessionStatus},
};
use crate::{
    backoff::BackoffPolicy,
    chunk::{ChunkAssembler, EvictedChunk},
    crypto::{CryptoError, CryptoFailureAction},
    error::ConsumerError,
    message::Message,
    message_id::MessageId,
    metrics,
    transport::{
        Command,
        CommandResponse,
        Connection,
        MessageMetadata,
        RawMessage,
        StartPosition,
        SubscribeRequest,
        Transport,
        TransportError,
    },
};

/// Whether the loop keeps running after an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Continue,
    Stop,
}

/// Outcome of one poll of the worker's sources.
enum WorkerEvent {
    Shutdown,
    Frame(Option<RawMessage>),
    Request(Option<SessionEvent>),
}

pub(super) struct SessionWorker {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    status: Arc<SessionStatus>,
    generation: Arc<AtomicU64>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    output: mpsc::UnboundedSender<Delivery>,
    shutdown: CancellationToken,
    slot: usize,
    connection: Option<Connection>,
    backoff: Box<dyn BackoffPolicy>,
    assembler: ChunkAssembler,
    start: StartPosition,
    last_delivered: Option<MessageId>,
    failed_attempts: u32,
    // Messages delivered to the merge stage whose permits have not come back.
    unreturned: u32,
    // Permits of frames that produced no delivery, returned in batches.
    reclaimed: u32,
    orphaned: bool,
}

impl SessionWorker {
    #[expect(
        clippy::too_many_arguments,
        reason = "the worker is wired once, by PartitionSession::start"
    )]
    pub(super) fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        status: Arc<SessionStatus>,
        generation: Arc<AtomicU64>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        output: mpsc::UnboundedSender<Delivery>,
        shutdown: CancellationToken,
        slot: usize,
    ) -> Self {
        let backoff = (config.backoff)();
        let assembler = ChunkAssembler::new(config.chunk);
        let start = config.start;
        Self {
            config,
            transport,
            status,
            generation,
            events,
            output,
            shutdown,
            slot,
            connection: None,
            backoff,
            assembler,
            start,
            last_delivered: None,
            failed_attempts: 0,
            unreturned: 0,
            reclaimed: 0,
            orphaned: false,
        }
    }

    /// Perform the first subscribe. Failure ends the session.
    pub(super) async fn connect_initial(&mut self) -> Result<(), ConsumerError> {
        if let Err(err) = self.try_connect().await {
            self.status.store(SessionState::Closed);
            return Err(err);
        }
        Ok(())
    }

    /// Run until closed, orphaned or out of reconnect attempts.
    pub(super) async fn run(mut self) {
        loop {
            let step = if self.connection.is_some() {
                self.serve().await
            } else {
                self.reconnect().await
            };
            if step == Step::Stop || self.orphaned || self.shutdown.is_cancelled() {
                break;
            }
        }
        self.finish().await;
    }

    async fn next_event(&mut self) -> WorkerEvent {
        let Some(connection) = self.connection.as_mut() else {
            return WorkerEvent::Frame(None);
        };
        tokio::select! {
            biased;

            () = self.shutdown.cancelled() => WorkerEvent::Shutdown,
            frame = connection.frames.recv() => WorkerEvent::Frame(frame),
            event = self.events.recv() => WorkerEvent::Request(event),
        }
    }

    async fn serve(&mut self) -> Step {
        match self.next_event().await {
            WorkerEvent::Shutdown | WorkerEvent::Request(None) => Step::Stop,
            WorkerEvent::Frame(Some(frame)) => {
                self.handle_frame(frame).await;
                Step::Continue
            }
            WorkerEvent::Frame(None) => {
                self.on_disconnect("frame stream closed");
                Step::Continue
            }
            WorkerEvent::Request(Some(event)) => {
                self.handle_event(event).await;
                Step::Continue
            }
        }
    }

    /// Wait out one backoff delay, answering requests meanwhile, then try to
    /// subscribe again.
    async fn reconnect(&mut self) -> Step {
        if let Some(limit) = self.config.max_reconnect_to_broker
            && self.failed_attempts >= limit
        {
            error!(
                "giving up on partition: topic={}, attempts={}",
                self.config.topic, self.failed_attempts
            );
            self.status.store(SessionState::Failed);
            return Step::Stop;
        }

        let delay = self.backoff.next_delay();
        info!(
            "reconnecting: topic={}, attempt={}, delay={delay:?}, max_backoff={}",
            self.config.topic,
            self.failed_attempts + 1,
            self.backoff.is_max_backoff_reached()
        );
        metrics::inc_reconnects();

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => return Step::Stop,
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => return Step::Stop,
                },
                () = &mut sleep => break,
            }
        }

        match self.try_connect().await {
            Ok(()) => Step::Continue,
            Err(ConsumerError::Closed) => Step::Stop,
            Err(err) => {
                self.failed_attempts = self.failed_attempts.saturating_add(1);
                warn!(
                    "reconnect failed: topic={}, attempt={}, error={err}",
                    self.config.topic, self.failed_attempts
                );
                Step::Continue
            }
        }
    }

    /// Record a transition unless the handle already started closing.
    fn transition(&self, state: SessionState) {
        if !self.status.load().is_terminal() {
            self.status.store(state);
        }
    }

    async fn try_connect(&mut self) -> Result<(), ConsumerError> {
        self.transition(SessionState::Connecting);
        let request = self.subscribe_request();
        let result = tokio::select! {
            biased;

            () = self.shutdown.cancelled() => return Err(ConsumerError::Closed),
            result = timeout(self.config.operation_timeout, self.transport.connect(&request)) => result,
        };
        let connection = match result {
            Ok(Ok(connection)) => connection,
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => return Err(ConsumerError::Timeout(self.config.operation_timeout)),
        };

        self.connection = Some(connection);
        self.backoff.reset();
        self.failed_attempts = 0;
        self.assembler.clear();
        self.reclaimed = 0;
        self.transition(SessionState::Ready);
        metrics::inc_sessions_ready();
        info!(
            "session ready: topic={}, start={}, inclusive={}",
            request.topic, request.start.id, request.start.inclusive
        );

        let permits = self
            .config
            .receiver_queue_size
            .saturating_sub(self.unreturned);
        if permits > 0 {
            self.send_flow(permits).await;
        }
        Ok(())
    }

    fn subscribe_request(&self) -> SubscribeRequest {
        SubscribeRequest {
            topic: self.config.topic.clone(),
            partition_index: self.config.partition_index,
            subscription: self.config.subscription.clone(),
            consumer_name: self.config.consumer_name.clone(),
            durable: self.config.durable,
            start: self.resume_position(),
        }
    }

    /// Where delivery continues: after the last delivered message, or at
    /// the configured (or sought) start.
    fn resume_position(&self) -> StartPosition {
        self.last_delivered
            .map_or(self.start, StartPosition::after)
    }

    fn on_disconnect(&mut self, reason: &str) {
        if self.connection.take().is_some() {
            metrics::dec_sessions_ready();
            self.transition(SessionState::Connecting);
            warn!(
                "connection lost: topic={}, reason={reason}",
                self.config.topic
            );
        }
    }

    async fn close_connection(&mut self, reason: &str) {
        if let Some(connection) = self.connection.as_ref() {
            connection.commands.close().await;
        }
        self.on_disconnect(reason);
    }

    /// Send a command on the live connection.
    ///
    /// A connection failure drops the connection; the caller sees the error
    /// once and the loop moves on to reconnecting.
    async fn command(&mut self, command: Command) -> Result<CommandResponse, ConsumerError> {
        let Some(connection) = self.connection.as_ref() else {
            return Err(ConsumerError::NotReady {
                topic: self.config.topic.clone(),
            });
        };
        let name = command.name();
        let result = tokio::select! {
            biased;

            () = self.shutdown.cancelled() => return Err(ConsumerError::Closed),
            result = timeout(self.config.operation_timeout, connection.commands.request(command)) => result,
        };
        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => {
                debug!(
                    "command failed: topic={}, command={name}, error={err}",
                    self.config.topic
                );
                if matches!(
                    err,
                    TransportError::Connection(_) | TransportError::Disconnected
                ) {
                    self.on_disconnect("command failed");
                }
                Err(err.into())
            }
            Err(_) => Err(ConsumerError::Timeout(self.config.operation_timeout)),
        }
    }

    async fn send_flow(&mut self, permits: u32) {
        if let Err(err) = self.command(Command::Flow { permits }).await {
            debug!(
                "flow not sent: topic={}, permits={permits}, error={err}",
                self.config.topic
            );
        }
    }

    async fn send_ack(&mut self, ids: Vec<MessageId>) {
        let count = ids.len();
        if let Err(err) = self.command(Command::Ack(ids)).await {
            debug!(
                "ack not sent: topic={}, count={count}, error={err}",
                self.config.topic
            );
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Control { request, reply } => {
                self.drain_frames().await;
                let result = self.handle_control(request).await;
                if reply.send(result).is_err() {
                    debug!(
                        "control reply dropped: topic={}, request={request:?}",
                        self.config.topic
                    );
                }
            }
            SessionEvent::Ack(ids) => self.send_ack(ids).await,
            SessionEvent::Flow(permits) => {
                self.unreturned = self.unreturned.saturating_sub(permits);
                if self.connection.is_some() {
                    self.send_flow(permits).await;
                }
            }
        }
    }

    /// Handle every frame already queued on the connection.
    async fn drain_frames(&mut self) {
        while let Some(frame) = self
            .connection
            .as_mut()
            .and_then(|connection| connection.frames.try_recv().ok())
        {
            self.handle_frame(frame).await;
        }
    }

    async fn handle_control(&mut self, request: ControlRequest) -> Result<MessageId, ConsumerError> {
        match request {
            ControlRequest::GetLastMessageId => match self.command(Command::GetLastMessageId).await? {
                CommandResponse::LastMessageId(id) | CommandResponse::Position(id) => Ok(id),
                CommandResponse::Done => Err(unexpected_response("get_last_message_id")),
            },
            ControlRequest::Seek(id) => {
                let position = match self.command(Command::Seek(id)).await? {
                    CommandResponse::Position(position) => position,
                    CommandResponse::Done => id,
                    CommandResponse::LastMessageId(_) => return Err(unexpected_response("seek")),
                };
                let inclusive = self.config.seek_inclusive;
                self.reposition(StartPosition {
                    id: position,
                    inclusive,
                })
                .await;
                Ok(position)
            }
            ControlRequest::SeekByTime(time) => {
                let position = match self.command(Command::SeekByTime(time)).await? {
                    CommandResponse::Position(position) => position,
                    CommandResponse::Done | CommandResponse::LastMessageId(_) => {
                        return Err(unexpected_response("seek_by_time"));
                    }
                };
                self.reposition(StartPosition::after(position)).await;
                Ok(position)
            }
        }
    }

    /// Restart delivery at `start`, discarding everything received before.
    async fn reposition(&mut self, start: StartPosition) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.assembler.clear();
        self.start = start;
        self.last_delivered = None;
        info!(
            "repositioning: topic={}, start={}, inclusive={}, generation={generation}",
            self.config.topic, start.id, start.inclusive
        );
        self.close_connection("seek").await;
        match self.try_connect().await {
            Ok(()) | Err(ConsumerError::Closed) => {}
            Err(err) => warn!(
                "resubscribe after seek failed: topic={}, error={err}",
                self.config.topic
            ),
        }
    }

    async fn handle_frame(&mut self, frame: RawMessage) {
        let RawMessage {
            id,
            payload,
            metadata,
        } = frame;

        let (id, payload, chunk_ids) = match metadata.chunk_header() {
            Some(header) if header.total > 1 => match self.assembler.push(header, id, payload) {
                Ok(push) => {
                    self.handle_evictions(push.evicted).await;
                    let Some(done) = push.completed else {
                        self.reclaim(1).await;
                        return;
                    };
                    let Some(last) = done.last_message_id() else {
                        warn!(
                            "completed chunk without fragment ids dropped: topic={}, id={id}",
                            self.config.topic
                        );
                        self.reclaim(1).await;
                        return;
                    };
                    let (payload, ids) = done.into_parts();
                    (last, payload, ids)
                }
                Err(err) => {
                    warn!(
                        "malformed chunk dropped: topic={}, id={id}, error={err}",
                        self.config.topic
                    );
                    self.reclaim(1).await;
                    return;
                }
            },
            _ => (id, payload, Vec::new()),
        };

        if self.resume_position().skips(&id) {
            debug!(
                "skipping message before start: topic={}, id={id}",
                self.config.topic
            );
            self.reclaim(1).await;
            return;
        }

        let Some((payload, encrypted)) = self.decrypt(id, payload, &metadata, &chunk_ids).await
        else {
            self.reclaim(1).await;
            return;
        };

        let message = Message::new(id, self.config.topic.clone(), payload, metadata)
            .with_chunk_ids(chunk_ids)
            .with_encrypted(encrypted);
        self.deliver(message);
    }

    /// Returns the payload to deliver and whether it is still encrypted, or
    /// `None` when the message must be dropped.
    async fn decrypt(
        &mut self,
        id: MessageId,
        payload: Bytes,
        metadata: &MessageMetadata,
        chunk_ids: &[MessageId],
    ) -> Option<(Bytes, bool)> {
        if !metadata.encrypted {
            return Some((payload, false));
        }
        let result = match self.config.decryptor.as_ref() {
            Some(decryptor) => decryptor.decrypt(&payload, metadata),
            None => Err(CryptoError::new("no decryptor configured")),
        };
        let err = match result {
            Ok(plain) => return Some((plain, false)),
            Err(err) => err,
        };
        match self.config.crypto_failure_action {
            CryptoFailureAction::Fail => {
                warn!(
                    "decryption failed, message left unacknowledged: topic={}, id={id}, error={err}",
                    self.config.topic
                );
                None
            }
            CryptoFailureAction::Discard => {
                warn!(
                    "decryption failed, message discarded: topic={}, id={id}, error={err}",
                    self.config.topic
                );
                let ids = if chunk_ids.is_empty() {
                    vec![id]
                } else {
                    chunk_ids.to_vec()
                };
                self.send_ack(ids).await;
                None
            }
            CryptoFailureAction::Consume => {
                debug!(
                    "delivering encrypted payload: topic={}, id={id}",
                    self.config.topic
                );
                Some((payload, true))
            }
        }
    }

    fn deliver(&mut self, message: Message) {
        let id = message.id();
        let delivery = Delivery {
            slot: self.slot,
            generation: self.generation.load(Ordering::Acquire),
            message,
        };
        if self.output.send(delivery).is_err() {
            debug!("consumer gone, stopping: topic={}", self.config.topic);
            self.orphaned = true;
            return;
        }
        self.last_delivered = Some(id);
        self.unreturned = self.unreturned.saturating_add(1);
        metrics::inc_messages_received();
    }

    async fn handle_evictions(&mut self, evicted: Vec<EvictedChunk>) {
        if evicted.is_empty() || !self.assembler.config().auto_ack_incomplete_chunk {
            return;
        }
        let ids: Vec<MessageId> = evicted
            .into_iter()
            .flat_map(|chunk| chunk.message_ids)
            .collect();
        if !ids.is_empty() {
            self.send_ack(ids).await;
        }
    }

    /// Return permits for frames that produced no delivery.
    async fn reclaim(&mut self, permits: u32) {
        self.reclaimed = self.reclaimed.saturating_add(permits);
        if self.reclaimed >= flow_batch(self.config.receiver_queue_size) {
            let permits = std::mem::take(&mut self.reclaimed);
            self.send_flow(permits).await;
        }
    }

    async fn finish(mut self) {
        if self.status.load() != SessionState::Failed {
            self.status.store(SessionState::Closing);
        }
        self.close_connection("closed").await;
        self.events.close();
        while let Ok(event) = self.events.try_recv() {
            event.fail(|| ConsumerError::Closed);
        }
        if self.status.load() != SessionState::Failed {
            self.status.store(SessionState::Closed);
        }
        debug!("session stopped: topic={}", self.config.topic);
    }
}

/// Number of permits returned together.
pub(crate) fn flow_batch(queue_size: u32) -> u32 { (queue_size / 2).max(1) }

fn unexpected_response(command: &str) -> ConsumerError {
    ConsumerError::Rejected(format!("unexpected response to {command}"))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::flow_batch;

    #[rstest]
    #[case(1000, 500)]
    #[case(3, 1)]
    #[case(1, 1)]
    fn flow_batches_are_half_the_queue(#[case] queue: u32, #[case] batch: u32) {
        assert_eq!(flow_batch(queue), batch);
    }
}
