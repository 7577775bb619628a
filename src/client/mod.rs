//! Entry point creating readers and consumers.
//!
//! A [`Client`] pairs a [`Transport`] with a [`PartitionLookup`]. Creating a
//! reader or consumer validates the options, asks the lookup how many
//! partitions the topic has and starts one session per partition.

mod builder;
mod config;

use std::{fmt, sync::Arc};

pub use builder::ClientBuilder;
pub use config::{ClientConfig, DEFAULT_OPERATION_TIMEOUT};
use log::debug;
use tokio::time::timeout;

use crate::{
    consumer::{ConsumerOptions, MultiPartitionConsumer, SubscriptionSpec},
    error::{ConsumerError, Result},
    lookup::{PartitionLookup, partition_topics},
    reader::{Reader, ReaderOptions},
    transport::Transport,
};

/// Handle for creating readers and consumers. Cloning is cheap.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    lookup: Arc<dyn PartitionLookup>,
    config: ClientConfig,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Start configuring a client.
    #[must_use]
    pub fn builder() -> ClientBuilder { ClientBuilder::new() }

    /// Client settings.
    #[must_use]
    pub fn config(&self) -> &ClientConfig { &self.config }

    /// Partition topic names of `topic`; the topic itself when it is not
    /// partitioned.
    ///
    /// # Errors
    ///
    /// Returns the lookup failure, or [`ConsumerError::Timeout`].
    pub async fn partitions_for_topic(&self, topic: &str) -> Result<Vec<String>> {
        Ok(self
            .partitions(topic)
            .await?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    /// Create a reader.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Validation`] or [`ConsumerError::Schema`]
    /// for invalid options and the first partition's subscribe failure
    /// otherwise.
    pub async fn create_reader(&self, options: ReaderOptions) -> Result<Reader> {
        let spec = options.into_spec(self.config.timeout())?;
        self.subscribe(spec).await.map(Reader::new)
    }

    /// Create a durable consumer.
    ///
    /// # Errors
    ///
    /// As for [`Client::create_reader`].
    pub async fn create_consumer(&self, options: ConsumerOptions) -> Result<MultiPartitionConsumer> {
        let spec = options.into_spec(self.config.timeout())?;
        self.subscribe(spec).await
    }

    async fn subscribe(&self, spec: SubscriptionSpec) -> Result<MultiPartitionConsumer> {
        let partitions = self.partitions(&spec.topic).await?;
        debug!(
            "creating subscription: topic={}, subscription={}, partitions={}",
            spec.topic,
            spec.subscription,
            partitions.len()
        );
        MultiPartitionConsumer::subscribe(spec, partitions, Arc::clone(&self.transport)).await
    }

    async fn partitions(&self, topic: &str) -> Result<Vec<(String, i32)>> {
        let limit = self.config.timeout();
        let count = timeout(limit, self.lookup.partition_count(topic))
            .await
            .map_err(|_| ConsumerError::Timeout(limit))??;
        Ok(partition_topics(topic, count))
    }
}

#[cfg(test)]
mod tests;
