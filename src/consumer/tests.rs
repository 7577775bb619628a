//! Tests for the multi-partition consumer.

use std::{collections::HashMap, sync::Arc, time::Duration};

use rstest::{fixture, rstest};

use super::{MultiPartitionConsumer, SubscriptionSettings, SubscriptionSpec};
use crate::{
    error::ConsumerError,
    lookup::partition_topics,
    memory::MemoryBroker,
    message_id::{MessageId, MessageIdentifier},
    transport::StartPosition,
};

#[fixture]
fn broker() -> MemoryBroker { MemoryBroker::new() }

async fn consumer(
    broker: &MemoryBroker,
    topic: &str,
    partitions: u32,
    settings: SubscriptionSettings,
) -> Result<MultiPartitionConsumer, ConsumerError> {
    broker.create_topic(topic, partitions);
    let spec = SubscriptionSpec::new(
        topic.into(),
        "sub".into(),
        "consumer".into(),
        true,
        StartPosition::at(MessageId::earliest()),
        false,
        settings,
        Duration::from_secs(1),
    )?;
    MultiPartitionConsumer::subscribe(spec, partition_topics(topic, partitions), Arc::new(broker.clone()))
        .await
}

async fn publish(broker: &MemoryBroker, topic: &str, count: usize) -> Vec<MessageId> {
    let mut producer = broker.producer(topic);
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        ids.push(producer.send(format!("msg-{i}")).await.expect("send"));
    }
    ids
}

#[rstest]
#[tokio::test]
async fn merges_partitions_preserving_partition_order(broker: MemoryBroker) {
    let mut consumer = consumer(&broker, "merged", 3, SubscriptionSettings::default())
        .await
        .expect("consumer");
    let sent = publish(&broker, "merged", 9).await;

    let mut per_partition: HashMap<i32, Vec<MessageId>> = HashMap::new();
    for _ in 0..9 {
        let message = consumer
            .receive_timeout(Duration::from_secs(5))
            .await
            .expect("message");
        per_partition
            .entry(message.id().partition_index())
            .or_default()
            .push(message.id());
    }
    assert_eq!(per_partition.len(), 3);
    for (partition, received) in per_partition {
        let expected: Vec<MessageId> = sent
            .iter()
            .copied()
            .filter(|id| id.partition_index() == partition)
            .collect();
        assert_eq!(received, expected);
    }
}

#[rstest]
#[tokio::test]
async fn small_queue_keeps_flowing(broker: MemoryBroker) {
    let settings = SubscriptionSettings::default().receiver_queue_size(4);
    let mut consumer = consumer(&broker, "small", 0, settings).await.expect("consumer");
    let sent = publish(&broker, "small", 20).await;
    for expected in sent {
        let message = consumer
            .receive_timeout(Duration::from_secs(5))
            .await
            .expect("message");
        assert_eq!(message.id(), expected);
    }
}

#[rstest]
#[tokio::test]
async fn partitioned_topics_refuse_ambiguous_requests(broker: MemoryBroker) {
    let mut consumer = consumer(&broker, "wide", 3, SubscriptionSettings::default())
        .await
        .expect("consumer");
    assert!(matches!(
        consumer.get_last_message_id().await,
        Err(ConsumerError::AmbiguousOperation(_))
    ));
    assert!(matches!(
        consumer.seek(&MessageId::new(1, 0, 0)).await,
        Err(ConsumerError::AmbiguousOperation(_))
    ));
    assert_eq!(consumer.last_message_ids().await.expect("ids").len(), 3);
}

#[rstest]
#[tokio::test]
async fn seek_discards_buffered_messages(broker: MemoryBroker) {
    let mut consumer = consumer(&broker, "rewind", 0, SubscriptionSettings::default())
        .await
        .expect("consumer");
    let sent = publish(&broker, "rewind", 5).await;
    assert!(consumer.has_next().await);
    assert_eq!(
        consumer
            .receive_timeout(Duration::from_secs(5))
            .await
            .expect("message")
            .id(),
        sent[0]
    );

    consumer.seek(&sent[2]).await.expect("seek");
    let message = consumer
        .receive_timeout(Duration::from_secs(5))
        .await
        .expect("message");
    assert_eq!(message.id(), sent[3]);
}

#[rstest]
#[tokio::test]
async fn acks_route_to_the_owning_partition(broker: MemoryBroker) {
    let mut consumer = consumer(&broker, "acks", 2, SubscriptionSettings::default())
        .await
        .expect("consumer");
    publish(&broker, "acks", 2).await;
    let message = consumer
        .receive_timeout(Duration::from_secs(5))
        .await
        .expect("message");
    consumer.ack(&message).expect("ack");
    assert!(matches!(
        consumer.ack_id(&MessageId::new(1, 0, 7)),
        Err(ConsumerError::Validation(_))
    ));

    // a control round trip on every partition orders after the ack
    consumer.last_message_ids().await.expect("ids");
    assert_eq!(broker.acked("acks", "sub").await, vec![message.id()]);
}

#[rstest]
#[tokio::test]
async fn failed_partition_start_fails_subscribe(broker: MemoryBroker) {
    broker.fail_next_connects(1);
    let result = consumer(&broker, "flaky", 2, SubscriptionSettings::default()).await;
    assert!(matches!(result, Err(ConsumerError::Connection(_))));
}

#[rstest]
#[tokio::test]
async fn closed_consumer_fails_fast(broker: MemoryBroker) {
    let mut consumer = consumer(&broker, "closing", 2, SubscriptionSettings::default())
        .await
        .expect("consumer");
    consumer.close().await;
    assert!(consumer.is_closed());
    assert!(matches!(consumer.receive().await, Err(ConsumerError::Closed)));
    assert!(!consumer.has_next().await);
    assert!(matches!(
        consumer.seek_by_time(std::time::SystemTime::now()).await,
        Err(ConsumerError::Closed)
    ));
    consumer.close().await;
}

#[rstest]
#[tokio::test]
async fn cancellation_leaves_consumer_usable(broker: MemoryBroker) {
    let mut consumer = consumer(&broker, "cancel", 0, SubscriptionSettings::default())
        .await
        .expect("consumer");
    let token = tokio_util::sync::CancellationToken::new();
    token.cancel();
    assert!(matches!(
        consumer.receive_cancellable(&token).await,
        Err(ConsumerError::Cancelled)
    ));
    assert!(matches!(
        consumer.receive_timeout(Duration::from_millis(20)).await,
        Err(ConsumerError::Timeout(_))
    ));

    let sent = publish(&broker, "cancel", 1).await;
    let message = consumer
        .receive_timeout(Duration::from_secs(5))
        .await
        .expect("message");
    assert_eq!(message.id(), sent[0]);
}
