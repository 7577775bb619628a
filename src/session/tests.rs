//! Tests for partition sessions running against the in-memory broker.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use rstest::{fixture, rstest};
use tokio::{sync::mpsc, time::timeout};

use super::{Delivery, PartitionSession, SessionConfig, SessionState};
use crate::{
    backoff::BackoffConfig,
    chunk::ChunkConfig,
    crypto::{CryptoError, CryptoFailureAction, PayloadDecryptor},
    error::ConsumerError,
    memory::{MemoryBroker, OutgoingMessage},
    message_id::MessageId,
    transport::{
        Connection,
        MessageMetadata,
        StartPosition,
        SubscribeRequest,
        Transport,
        TransportError,
    },
};

const TOPIC: &str = "session-topic";

#[fixture]
fn broker() -> MemoryBroker {
    let broker = MemoryBroker::new();
    broker.create_topic(TOPIC, 0);
    broker
}

fn config(start: StartPosition) -> SessionConfig {
    SessionConfig {
        topic: TOPIC.into(),
        partition_index: -1,
        subscription: "sub".into(),
        consumer_name: "session-test".into(),
        durable: false,
        start,
        seek_inclusive: start.inclusive,
        receiver_queue_size: 100,
        chunk: ChunkConfig::default(),
        operation_timeout: Duration::from_secs(1),
        backoff: BackoffConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        }
        .factory(),
        max_reconnect_to_broker: None,
        decryptor: None,
        crypto_failure_action: CryptoFailureAction::Fail,
    }
}

async fn start(
    broker: &MemoryBroker,
    config: SessionConfig,
) -> (PartitionSession, mpsc::UnboundedReceiver<Delivery>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = PartitionSession::start(config, Arc::new(broker.clone()), 0, tx)
        .await
        .expect("session starts");
    (session, rx)
}

async fn publish(broker: &MemoryBroker, count: usize) -> Vec<MessageId> {
    let mut producer = broker.producer(TOPIC);
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        ids.push(producer.send(format!("hello-{i}")).await.expect("send"));
    }
    ids
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Delivery {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("delivery in time")
        .expect("session alive")
}

async fn wait_for(session: &PartitionSession, state: SessionState) {
    timeout(Duration::from_secs(5), async {
        while session.state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("state reached");
}

#[rstest]
#[tokio::test]
async fn delivers_in_order_from_start(broker: MemoryBroker) {
    let ids = publish(&broker, 5).await;
    let (session, mut rx) = start(&broker, config(StartPosition::after(ids[1]))).await;
    assert_eq!(session.state(), SessionState::Ready);

    for expected in &ids[2..] {
        let delivery = next(&mut rx).await;
        assert_eq!(delivery.message.id(), *expected);
        assert_eq!(delivery.slot, 0);
        assert_eq!(delivery.generation, 0);
    }
}

#[rstest]
#[tokio::test]
async fn first_connect_failure_is_returned(broker: MemoryBroker) {
    broker.fail_next_connects(1);
    let (tx, _rx) = mpsc::unbounded_channel();
    let result = PartitionSession::start(
        config(StartPosition::after(MessageId::earliest())),
        Arc::new(broker.clone()),
        0,
        tx,
    )
    .await;
    assert!(matches!(result, Err(ConsumerError::Connection(_))));
}

#[rstest]
#[tokio::test]
async fn reports_last_message_id(broker: MemoryBroker) {
    let (session, _rx) = start(&broker, config(StartPosition::after(MessageId::earliest()))).await;
    let empty = session.get_last_message_id().await.expect("last id");
    assert!(!empty.is_entry_valid());

    let ids = publish(&broker, 3).await;
    assert_eq!(session.get_last_message_id().await.expect("last id"), ids[2]);
}

#[rstest]
#[tokio::test]
async fn reconnect_resumes_after_last_delivery(broker: MemoryBroker) {
    let ids = publish(&broker, 3).await;
    let (session, mut rx) = start(&broker, config(StartPosition::after(MessageId::earliest()))).await;
    for expected in &ids {
        assert_eq!(next(&mut rx).await.message.id(), *expected);
    }

    broker.disconnect(TOPIC).await;
    let more = publish(&broker, 2).await;
    for expected in &more {
        assert_eq!(next(&mut rx).await.message.id(), *expected);
    }
    wait_for(&session, SessionState::Ready).await;
    assert_eq!(broker.connect_count(TOPIC).await, 2);
}

#[rstest]
#[tokio::test]
async fn requests_fail_fast_while_reconnecting(broker: MemoryBroker) {
    let (session, _rx) = start(&broker, config(StartPosition::after(MessageId::earliest()))).await;
    broker.refuse_connects(true);
    broker.disconnect(TOPIC).await;
    wait_for(&session, SessionState::Connecting).await;

    let result = session.get_last_message_id().await;
    assert!(matches!(result, Err(ConsumerError::NotReady { .. })));

    broker.refuse_connects(false);
    wait_for(&session, SessionState::Ready).await;
    assert!(session.get_last_message_id().await.is_ok());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn reconnect_attempts_follow_the_backoff_schedule(broker: MemoryBroker) {
    let mut slow = config(StartPosition::after(MessageId::earliest()));
    slow.backoff = BackoffConfig {
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(4),
    }
    .factory();
    let (session, _rx) = start(&broker, slow).await;
    broker.refuse_connects(true);
    let dropped_at = tokio::time::Instant::now();
    broker.disconnect(TOPIC).await;

    // attempts at 1s and 3s are refused; the next one waits a further 4s
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(session.state(), SessionState::Connecting);
    broker.refuse_connects(false);
    timeout(Duration::from_secs(20), async {
        while session.state() != SessionState::Ready {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("reconnected");

    let elapsed = dropped_at.elapsed();
    assert!(elapsed >= Duration::from_secs(7), "reconnected after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(7100), "reconnected after {elapsed:?}");
}

#[rstest]
#[tokio::test]
async fn gives_up_after_reconnect_limit(broker: MemoryBroker) {
    let mut limited = config(StartPosition::after(MessageId::earliest()));
    limited.max_reconnect_to_broker = Some(2);
    let (session, mut rx) = start(&broker, limited).await;
    broker.refuse_connects(true);
    broker.disconnect(TOPIC).await;

    wait_for(&session, SessionState::Failed).await;
    assert!(matches!(
        session.get_last_message_id().await,
        Err(ConsumerError::Closed)
    ));
    assert!(timeout(Duration::from_secs(1), rx.recv()).await.expect("channel closes").is_none());
}

#[rstest]
#[tokio::test]
async fn close_fails_later_requests(broker: MemoryBroker) {
    let (mut session, mut rx) = start(&broker, config(StartPosition::after(MessageId::earliest()))).await;
    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);
    assert!(matches!(
        session.get_last_message_id().await,
        Err(ConsumerError::Closed)
    ));
    assert!(matches!(session.ack(vec![]), Err(ConsumerError::Closed)));
    assert!(rx.recv().await.is_none());
    session.close().await;
}

#[rstest]
#[tokio::test]
async fn seek_restarts_delivery_with_new_generation(broker: MemoryBroker) {
    let ids = publish(&broker, 5).await;
    let (session, mut rx) = start(&broker, config(StartPosition::after(MessageId::earliest()))).await;
    for expected in &ids {
        assert_eq!(next(&mut rx).await.message.id(), *expected);
    }

    let position = session.seek(ids[1]).await.expect("seek");
    assert_eq!(position, ids[1]);
    assert_eq!(session.generation(), 1);

    for expected in &ids[2..] {
        let delivery = next(&mut rx).await;
        assert_eq!(delivery.message.id(), *expected);
        assert_eq!(delivery.generation, 1);
    }
}

#[rstest]
#[tokio::test]
async fn inclusive_seek_redelivers_the_target(broker: MemoryBroker) {
    let ids = publish(&broker, 3).await;
    let (session, mut rx) = start(&broker, config(StartPosition::at(MessageId::earliest()))).await;
    for _ in &ids {
        next(&mut rx).await;
    }
    session.seek(ids[1]).await.expect("seek");
    assert_eq!(next(&mut rx).await.message.id(), ids[1]);
}

#[rstest]
#[tokio::test]
async fn acks_reach_the_broker(broker: MemoryBroker) {
    let ids = publish(&broker, 2).await;
    let (session, mut rx) = start(&broker, config(StartPosition::after(MessageId::earliest()))).await;
    let first = next(&mut rx).await.message;
    session.ack(first.ack_ids()).expect("ack queued");

    // a control round trip orders after the queued ack
    session.get_last_message_id().await.expect("last id");
    assert_eq!(broker.acked(TOPIC, "sub").await, vec![ids[0]]);
}

#[rstest]
#[tokio::test]
async fn reassembles_chunked_messages(broker: MemoryBroker) {
    let mut producer = broker.producer(TOPIC);
    let ids = producer
        .send_chunked(OutgoingMessage::new("0123456789"), 4)
        .await
        .expect("chunked");
    let (_session, mut rx) = start(&broker, config(StartPosition::after(MessageId::earliest()))).await;

    let message = next(&mut rx).await.message;
    assert_eq!(message.payload(), &Bytes::from_static(b"0123456789"));
    assert_eq!(message.id(), ids[2]);
    assert_eq!(message.chunk_ids(), ids.as_slice());
}

struct Upper;

impl PayloadDecryptor for Upper {
    fn decrypt(&self, payload: &Bytes, _: &MessageMetadata) -> Result<Bytes, CryptoError> {
        Ok(Bytes::from(payload.to_ascii_uppercase()))
    }
}

struct Broken;

impl PayloadDecryptor for Broken {
    fn decrypt(&self, _: &Bytes, _: &MessageMetadata) -> Result<Bytes, CryptoError> {
        Err(CryptoError::new("bad key"))
    }
}

#[rstest]
#[tokio::test]
async fn decrypts_flagged_payloads(broker: MemoryBroker) {
    let mut producer = broker.producer(TOPIC);
    producer
        .send_message(OutgoingMessage::new("secret").encrypted())
        .await
        .expect("send");
    let mut cfg = config(StartPosition::after(MessageId::earliest()));
    cfg.decryptor = Some(Arc::new(Upper));
    let (_session, mut rx) = start(&broker, cfg).await;

    let message = next(&mut rx).await.message;
    assert_eq!(message.payload(), &Bytes::from_static(b"SECRET"));
    assert!(!message.is_encrypted());
}

#[rstest]
#[case(CryptoFailureAction::Fail, false, false)]
#[case(CryptoFailureAction::Discard, false, true)]
#[case(CryptoFailureAction::Consume, true, false)]
#[tokio::test]
async fn crypto_failure_action_decides_fate(
    broker: MemoryBroker,
    #[case] action: CryptoFailureAction,
    #[case] delivered: bool,
    #[case] acked: bool,
) {
    let mut producer = broker.producer(TOPIC);
    let secret = producer
        .send_message(OutgoingMessage::new("secret").encrypted())
        .await
        .expect("send");
    let plain = producer.send("plain").await.expect("send");
    let mut cfg = config(StartPosition::after(MessageId::earliest()));
    cfg.decryptor = Some(Arc::new(Broken));
    cfg.crypto_failure_action = action;
    let (session, mut rx) = start(&broker, cfg).await;

    let first = next(&mut rx).await.message;
    if delivered {
        assert_eq!(first.id(), secret);
        assert!(first.is_encrypted());
        assert_eq!(next(&mut rx).await.message.id(), plain);
    } else {
        assert_eq!(first.id(), plain);
    }

    session.get_last_message_id().await.expect("last id");
    let expected = if acked { vec![secret] } else { Vec::new() };
    assert_eq!(broker.acked(TOPIC, "sub").await, expected);
}

/// Hands the first subscribe to the broker and never answers later ones.
struct StallingReconnects {
    broker: MemoryBroker,
    connects: std::sync::atomic::AtomicU32,
}

#[async_trait::async_trait]
impl Transport for StallingReconnects {
    async fn connect(&self, request: &SubscribeRequest) -> Result<Connection, TransportError> {
        if self.connects.fetch_add(1, std::sync::atomic::Ordering::AcqRel) == 0 {
            return self.broker.connect(request).await;
        }
        std::future::pending().await
    }
}

#[rstest]
#[tokio::test]
async fn close_interrupts_a_stalled_reconnect(broker: MemoryBroker) {
    let mut cfg = config(StartPosition::after(MessageId::earliest()));
    cfg.operation_timeout = Duration::from_secs(30);
    let transport = Arc::new(StallingReconnects {
        broker: broker.clone(),
        connects: std::sync::atomic::AtomicU32::new(0),
    });
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut session = PartitionSession::start(cfg, transport, 0, tx)
        .await
        .expect("session starts");
    broker.disconnect(TOPIC).await;
    wait_for(&session, SessionState::Connecting).await;
    // past the first backoff delay, the worker is waiting on the handshake
    tokio::time::sleep(Duration::from_millis(50)).await;

    timeout(Duration::from_secs(1), session.close())
        .await
        .expect("close does not wait for the handshake");
    assert_eq!(session.state(), SessionState::Closed);
    assert!(matches!(
        session.get_last_message_id().await,
        Err(ConsumerError::Closed)
    ));
}
