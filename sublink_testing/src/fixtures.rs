//! Broker and client fixtures shared by integration tests.

use std::time::Duration;

use rstest::fixture;
use sublink::{Client, Message, MessageId, Reader, memory::MemoryBroker};

/// Upper bound on waiting for a single message in tests.
pub const RECEIVE_DEADLINE: Duration = Duration::from_secs(5);

/// Fresh in-memory broker.
#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
#[fixture]
pub fn broker() -> MemoryBroker { MemoryBroker::new() }

/// Client using `broker` for both transport and partition lookup.
///
/// # Panics
///
/// Never in practice; building only fails without a transport.
#[must_use]
pub fn client_for(broker: &MemoryBroker) -> Client {
    Client::builder()
        .broker(broker.clone())
        .operation_timeout(Duration::from_secs(2))
        .build()
        .expect("broker provides transport and lookup")
}

/// Publish `hello-0` to `hello-{count - 1}` to `topic`, one entry each.
///
/// # Panics
///
/// Panics if the broker rejects a send.
pub async fn publish(broker: &MemoryBroker, topic: &str, count: usize) -> Vec<MessageId> {
    let mut producer = broker.producer(topic);
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        ids.push(producer.send(format!("hello-{i}")).await.expect("send"));
    }
    ids
}

/// Publish the same payloads as [`publish`] as a single batched entry.
///
/// # Panics
///
/// Panics if the broker rejects the batch.
pub async fn publish_batch(broker: &MemoryBroker, topic: &str, count: usize) -> Vec<MessageId> {
    broker
        .producer(topic)
        .send_batch((0..count).map(|i| format!("hello-{i}")))
        .await
        .expect("send batch")
}

/// Read `count` messages, failing the test if any takes longer than
/// [`RECEIVE_DEADLINE`].
///
/// # Panics
///
/// Panics when a read fails or times out.
pub async fn drain(reader: &mut Reader, count: usize) -> Vec<Message> {
    let mut messages = Vec::with_capacity(count);
    for _ in 0..count {
        messages.push(reader.next_timeout(RECEIVE_DEADLINE).await.expect("message"));
    }
    messages
}

/// Payload decoded as UTF-8.
///
/// # Panics
///
/// Panics on a non UTF-8 payload.
#[must_use]
pub fn payload_text(message: &Message) -> &str {
    std::str::from_utf8(message.payload()).expect("utf-8 payload")
}
