//! Partition metadata lookup.

use async_trait::async_trait;

use crate::transport::TransportError;

/// Suffix joining a topic name and a partition index.
pub const PARTITION_SUFFIX: &str = "-partition-";

/// Resolves how many partitions a topic has.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PartitionLookup: Send + Sync {
    /// Number of partitions of `topic`; `0` for an unpartitioned topic.
    async fn partition_count(&self, topic: &str) -> Result<u32, TransportError>;
}

/// Name of partition `index` of `topic`.
///
/// # Examples
///
/// ```
/// use sublink::lookup::partition_topic;
///
/// assert_eq!(partition_topic("orders", 2), "orders-partition-2");
/// ```
#[must_use]
pub fn partition_topic(topic: &str, index: u32) -> String { format!("{topic}{PARTITION_SUFFIX}{index}") }

/// `(topic, partition_index)` pairs for a topic with `count` partitions.
///
/// An unpartitioned topic yields the bare name with partition index `-1`.
#[must_use]
pub fn partition_topics(topic: &str, count: u32) -> Vec<(String, i32)> {
    if count == 0 {
        return vec![(topic.to_owned(), -1)];
    }
    (0..count)
        .map(|index| {
            let partition = i32::try_from(index).unwrap_or(i32::MAX);
            (partition_topic(topic, index), partition)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::partition_topics;

    #[test]
    fn unpartitioned_topic_keeps_its_name() {
        assert_eq!(partition_topics("t", 0), vec![("t".to_owned(), -1)]);
    }

    #[test]
    fn partitioned_topic_expands_to_indexed_names() {
        let names = partition_topics("t", 3);
        assert_eq!(
            names,
            vec![
                ("t-partition-0".to_owned(), 0),
                ("t-partition-1".to_owned(), 1),
                ("t-partition-2".to_owned(), 2),
            ]
        );
    }
}
