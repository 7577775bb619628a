//! Builder for [`Client`].

use std::{sync::Arc, time::Duration};

use super::{Client, ClientConfig};
use crate::{
    error::{ConsumerError, Result},
    lookup::PartitionLookup,
    transport::Transport,
};

/// Assembles a [`Client`] from its collaborators.
///
/// # Examples
///
/// ```
/// use sublink::{client::ClientBuilder, memory::MemoryBroker};
///
/// let client = ClientBuilder::new()
///     .broker(MemoryBroker::new())
///     .build()
///     .expect("transport and lookup are set");
/// let _ = client;
/// ```
#[derive(Default)]
pub struct ClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    lookup: Option<Arc<dyn PartitionLookup>>,
    config: ClientConfig,
}

impl ClientBuilder {
    /// Builder with default settings and no collaborators.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Transport used to subscribe partitions.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Lookup used to count a topic's partitions.
    #[must_use]
    pub fn lookup(mut self, lookup: Arc<dyn PartitionLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Use one broker handle for both transport and lookup.
    #[must_use]
    pub fn broker<B>(self, broker: B) -> Self
    where
        B: Transport + PartitionLookup + 'static,
    {
        let broker = Arc::new(broker);
        self.transport(Arc::clone(&broker) as Arc<dyn Transport>)
            .lookup(broker)
    }

    /// Replace the client settings.
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Bound on control requests, lookups and subscribe handshakes.
    #[must_use]
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.operation_timeout(timeout);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Validation`] when the transport or lookup is
    /// missing.
    pub fn build(self) -> Result<Client> {
        let transport = self
            .transport
            .ok_or_else(|| ConsumerError::Validation("transport is required".into()))?;
        let lookup = self
            .lookup
            .ok_or_else(|| ConsumerError::Validation("partition lookup is required".into()))?;
        Ok(Client {
            transport,
            lookup,
            config: self.config.normalized(),
        })
    }
}
