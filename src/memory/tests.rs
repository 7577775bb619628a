//! Tests for the in-memory broker.

use std::time::{Duration, SystemTime};

use rstest::{fixture, rstest};
use tokio::time::timeout;

use super::{MemoryBroker, OutgoingMessage};
use crate::{
    lookup::PartitionLookup,
    message_id::{MessageId, MessageIdentifier},
    transport::{
        Command,
        CommandResponse,
        Connection,
        RawMessage,
        StartPosition,
        SubscribeRequest,
        Transport,
        TransportError,
    },
};

#[fixture]
fn broker() -> MemoryBroker {
    let broker = MemoryBroker::new();
    broker.create_topic("orders", 0);
    broker
}

fn request(topic: &str, start: StartPosition) -> SubscribeRequest {
    SubscribeRequest {
        topic: topic.into(),
        partition_index: -1,
        subscription: "sub".into(),
        consumer_name: "c".into(),
        durable: false,
        start,
    }
}

async fn publish(broker: &MemoryBroker, count: usize) -> Vec<MessageId> {
    let mut producer = broker.producer("orders");
    let mut ids = Vec::new();
    for i in 0..count {
        ids.push(producer.send(format!("m-{i}")).await.expect("send"));
    }
    ids
}

async fn next_frame(connection: &mut Connection) -> RawMessage {
    timeout(Duration::from_secs(1), connection.frames.recv())
        .await
        .expect("frame in time")
        .expect("stream open")
}

#[rstest]
#[tokio::test]
async fn dispatch_waits_for_permits(broker: MemoryBroker) {
    publish(&broker, 3).await;
    let mut connection = broker
        .connect(&request("orders", StartPosition::after(MessageId::earliest())))
        .await
        .expect("connect");

    assert!(
        timeout(Duration::from_millis(50), connection.frames.recv())
            .await
            .is_err(),
        "nothing is dispatched without permits"
    );

    connection
        .commands
        .request(Command::Flow { permits: 2 })
        .await
        .expect("flow");
    assert_eq!(next_frame(&mut connection).await.payload, "m-0");
    assert_eq!(next_frame(&mut connection).await.payload, "m-1");
    assert!(
        timeout(Duration::from_millis(50), connection.frames.recv())
            .await
            .is_err()
    );
}

#[rstest]
#[tokio::test]
async fn concrete_start_resumes_at_the_entry(broker: MemoryBroker) {
    let ids = publish(&broker, 5).await;
    let mut connection = broker
        .connect(&request("orders", StartPosition::after(ids[2])))
        .await
        .expect("connect");
    connection
        .commands
        .request(Command::Flow { permits: 10 })
        .await
        .expect("flow");
    // the entry itself is sent; exclusive starts are filtered by the client
    assert_eq!(next_frame(&mut connection).await.id, ids[2]);
}

#[rstest]
#[case(false, None)]
#[case(true, Some(4))]
#[tokio::test]
async fn latest_start_position(
    broker: MemoryBroker,
    #[case] inclusive: bool,
    #[case] first: Option<usize>,
) {
    let ids = publish(&broker, 5).await;
    let start = StartPosition {
        id: MessageId::latest(),
        inclusive,
    };
    let mut connection = broker
        .connect(&request("orders", start))
        .await
        .expect("connect");
    connection
        .commands
        .request(Command::Flow { permits: 10 })
        .await
        .expect("flow");
    let received = timeout(Duration::from_millis(50), connection.frames.recv())
        .await
        .ok()
        .flatten()
        .map(|frame| frame.id);
    assert_eq!(received, first.map(|index| ids[index]));
}

#[rstest]
#[tokio::test]
async fn last_message_id_of_empty_partition_has_no_entry(broker: MemoryBroker) {
    let last = broker.last_message_id("orders").await.expect("partition");
    assert!(!last.is_entry_valid());

    let ids = publish(&broker, 2).await;
    assert_eq!(broker.last_message_id("orders").await.expect("partition"), ids[1]);
}

#[rstest]
#[tokio::test]
async fn seek_by_time_resolves_last_earlier_message(broker: MemoryBroker) {
    let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
    let mut producer = broker.producer("orders");
    let mut ids = Vec::new();
    for i in 0..4_u64 {
        let message = OutgoingMessage::new("x").publish_time(base + Duration::from_secs(i));
        ids.push(producer.send_message(message).await.expect("send"));
    }
    let connection = broker
        .connect(&request("orders", StartPosition::after(MessageId::earliest())))
        .await
        .expect("connect");

    let at = |secs| base + Duration::from_secs(secs);
    assert_eq!(
        connection.commands.request(Command::SeekByTime(at(2))).await,
        Ok(CommandResponse::Position(ids[1]))
    );
    assert_eq!(
        connection.commands.request(Command::SeekByTime(at(0))).await,
        Ok(CommandResponse::Position(MessageId::earliest()))
    );
}

#[rstest]
#[tokio::test]
async fn batches_share_an_entry(broker: MemoryBroker) {
    let mut producer = broker.producer("orders");
    let ids = producer.send_batch(["a", "b", "c"]).await.expect("batch");
    assert_eq!(ids.len(), 3);
    assert!(ids.iter().all(|id| id.entry_id() == ids[0].entry_id()));
    assert_eq!(
        ids.iter().map(MessageIdentifier::batch_index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert!(producer.send_batch(Vec::<&str>::new()).await.is_err());
}

#[rstest]
#[tokio::test]
async fn chunked_send_splits_payload(broker: MemoryBroker) {
    let mut producer = broker.producer("orders");
    let ids = producer
        .send_chunked(OutgoingMessage::new("abcdefg"), 3)
        .await
        .expect("chunked");
    assert_eq!(ids.len(), 3);
}

#[rstest]
#[tokio::test]
async fn fault_injection_fails_connects(broker: MemoryBroker) {
    broker.fail_next_connects(2);
    let req = request("orders", StartPosition::after(MessageId::earliest()));
    assert!(matches!(broker.connect(&req).await, Err(TransportError::Connection(_))));
    assert!(matches!(broker.connect(&req).await, Err(TransportError::Connection(_))));
    assert!(broker.connect(&req).await.is_ok());
    assert_eq!(broker.connect_count("orders").await, 1);
}

#[rstest]
#[tokio::test]
async fn disconnect_closes_frame_stream(broker: MemoryBroker) {
    let mut connection = broker
        .connect(&request("orders", StartPosition::after(MessageId::earliest())))
        .await
        .expect("connect");
    assert_eq!(broker.disconnect("orders").await, 1);
    let end = timeout(Duration::from_secs(1), connection.frames.recv())
        .await
        .expect("stream ends");
    assert!(end.is_none());
    assert_eq!(
        connection.commands.request(Command::GetLastMessageId).await,
        Err(TransportError::Disconnected)
    );
}

#[rstest]
#[tokio::test]
async fn failing_commands_time_out_but_flow_passes(broker: MemoryBroker) {
    let connection = broker
        .connect(&request("orders", StartPosition::after(MessageId::earliest())))
        .await
        .expect("connect");
    broker.fail_commands(true);
    assert_eq!(
        connection.commands.request(Command::GetLastMessageId).await,
        Err(TransportError::Timeout)
    );
    assert!(connection
        .commands
        .request(Command::Flow { permits: 1 })
        .await
        .is_ok());
}

#[rstest]
#[tokio::test]
async fn acks_are_recorded_per_subscription(broker: MemoryBroker) {
    let ids = publish(&broker, 2).await;
    let connection = broker
        .connect(&request("orders", StartPosition::after(MessageId::earliest())))
        .await
        .expect("connect");
    connection
        .commands
        .request(Command::Ack(vec![ids[0]]))
        .await
        .expect("ack");
    assert_eq!(broker.acked("orders", "sub").await, vec![ids[0]]);
    assert!(broker.acked("orders", "other").await.is_empty());
}

#[tokio::test]
async fn lookup_reports_partitions_and_routes_keys() {
    let broker = MemoryBroker::new();
    broker.create_topic("events", 3);
    assert_eq!(broker.partition_count("events").await, Ok(3));
    assert_eq!(broker.partition_count("fresh").await, Ok(0));

    let mut producer = broker.producer("events");
    let first = producer
        .send_message(OutgoingMessage::new("a").key("user-1"))
        .await
        .expect("send");
    let second = producer
        .send_message(OutgoingMessage::new("b").key("user-1"))
        .await
        .expect("send");
    assert_eq!(first.partition_index(), second.partition_index());

    let pinned = producer
        .send_message(OutgoingMessage::new("c").partition(2))
        .await
        .expect("send");
    assert_eq!(pinned.partition_index(), 2);
}
