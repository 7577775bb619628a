//! Tests for client construction and subscription setup.

use std::{sync::Arc, time::Duration};

use rstest::rstest;

use super::{Client, ClientBuilder};
use crate::{
    consumer::ConsumerOptions,
    error::ConsumerError,
    lookup::MockPartitionLookup,
    memory::MemoryBroker,
    message_id::MessageId,
    reader::ReaderOptions,
    transport::TransportError,
};

fn client_with_lookup(broker: &MemoryBroker, lookup: MockPartitionLookup) -> Client {
    ClientBuilder::new()
        .transport(Arc::new(broker.clone()))
        .lookup(Arc::new(lookup))
        .build()
        .expect("client")
}

#[test]
fn build_requires_collaborators() {
    assert!(matches!(
        ClientBuilder::new().build(),
        Err(ConsumerError::Validation(_))
    ));
    assert!(matches!(
        ClientBuilder::new()
            .transport(Arc::new(MemoryBroker::new()))
            .build(),
        Err(ConsumerError::Validation(_))
    ));
}

#[test]
fn zero_timeout_uses_default() {
    let client = ClientBuilder::new()
        .broker(MemoryBroker::new())
        .operation_timeout(Duration::ZERO)
        .build()
        .expect("client");
    assert_eq!(client.config().timeout(), super::DEFAULT_OPERATION_TIMEOUT);
}

#[tokio::test]
async fn lookup_failure_fails_creation() {
    let broker = MemoryBroker::new();
    let mut lookup = MockPartitionLookup::new();
    lookup
        .expect_partition_count()
        .withf(|topic| topic == "missing")
        .times(1)
        .returning(|_| Err(TransportError::Rejected("no such topic".into())));
    let client = client_with_lookup(&broker, lookup);

    let result = client
        .create_reader(ReaderOptions::new("missing").start_message_id(&MessageId::earliest()))
        .await;
    assert!(matches!(result, Err(ConsumerError::Rejected(_))));
}

#[tokio::test]
async fn lookup_count_decides_session_count() {
    let broker = MemoryBroker::new();
    broker.create_topic("fanout", 4);
    let mut lookup = MockPartitionLookup::new();
    lookup.expect_partition_count().returning(|_| Ok(4));
    let client = client_with_lookup(&broker, lookup);

    let mut consumer = client
        .create_consumer(ConsumerOptions::new("fanout", "sub"))
        .await
        .expect("consumer");
    assert_eq!(consumer.num_partitions(), 4);
    consumer.close().await;
}

#[rstest]
#[case(0, vec!["plain"])]
#[case(2, vec!["plain-partition-0", "plain-partition-1"])]
#[tokio::test]
async fn partitions_for_topic_names_every_partition(
    #[case] count: u32,
    #[case] expected: Vec<&str>,
) {
    let broker = MemoryBroker::new();
    let mut lookup = MockPartitionLookup::new();
    lookup.expect_partition_count().returning(move |_| Ok(count));
    let client = client_with_lookup(&broker, lookup);
    assert_eq!(
        client.partitions_for_topic("plain").await.expect("names"),
        expected
    );
}

#[tokio::test]
async fn invalid_options_skip_the_lookup() {
    let broker = MemoryBroker::new();
    let mut lookup = MockPartitionLookup::new();
    lookup.expect_partition_count().never();
    let client = client_with_lookup(&broker, lookup);

    let result = client.create_consumer(ConsumerOptions::new("t", "")).await;
    assert!(matches!(result, Err(ConsumerError::Validation(_))));
}
