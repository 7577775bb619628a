//! Read-only façade over [`MultiPartitionConsumer`].
//!
//! A reader holds a non-durable subscription that starts at an explicit
//! message id. It never acknowledges; its position lives only in the
//! client.

use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

use crate::{
    consumer::{
        MultiPartitionConsumer,
        SubscriptionSettings,
        SubscriptionSpec,
        random_name,
        settings_setters,
    },
    error::{ConsumerError, Result},
    message::Message,
    message_id::{MessageId, MessageIdentifier},
    transport::StartPosition,
};

/// Default prefix of generated reader subscription names.
pub const DEFAULT_SUBSCRIPTION_ROLE_PREFIX: &str = "reader";

/// Options for [`Client::create_reader`](crate::client::Client::create_reader).
#[derive(Clone, Debug)]
pub struct ReaderOptions {
    /// Topic to read.
    pub topic: String,
    /// First message to read; [`MessageId::earliest`] and
    /// [`MessageId::latest`] are accepted. Required.
    pub start_message_id: Option<MessageId>,
    /// Whether the message at `start_message_id` is itself delivered. Also
    /// applies to [`Reader::seek`].
    pub start_message_id_inclusive: bool,
    /// Reader name; generated when unset.
    pub name: Option<String>,
    /// Subscription name; `"{subscription_role_prefix}-{5 hex digits}"`
    /// when unset.
    pub subscription_name: Option<String>,
    /// Prefix of generated subscription names.
    pub subscription_role_prefix: String,
    /// Delivery tuning.
    pub settings: SubscriptionSettings,
}

impl ReaderOptions {
    /// Options for reading `topic`. A start id must still be set.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            start_message_id: None,
            start_message_id_inclusive: false,
            name: None,
            subscription_name: None,
            subscription_role_prefix: DEFAULT_SUBSCRIPTION_ROLE_PREFIX.into(),
            settings: SubscriptionSettings::default(),
        }
    }

    /// First message to read. Any [`MessageIdentifier`] is accepted.
    #[must_use]
    pub fn start_message_id<I>(mut self, id: &I) -> Self
    where
        I: MessageIdentifier + ?Sized,
    {
        self.start_message_id = Some(MessageId::from_identifier(id));
        self
    }

    /// Deliver the start message itself.
    #[must_use]
    pub fn start_message_id_inclusive(mut self, inclusive: bool) -> Self {
        self.start_message_id_inclusive = inclusive;
        self
    }

    /// Reader name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Fixed subscription name.
    #[must_use]
    pub fn subscription_name(mut self, name: impl Into<String>) -> Self {
        self.subscription_name = Some(name.into());
        self
    }

    /// Prefix of generated subscription names.
    #[must_use]
    pub fn subscription_role_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subscription_role_prefix = prefix.into();
        self
    }

    pub(crate) fn into_spec(self, operation_timeout: Duration) -> Result<SubscriptionSpec> {
        let Some(start) = self.start_message_id else {
            return Err(ConsumerError::Validation(
                "start message id is required".into(),
            ));
        };
        let inclusive = self.start_message_id_inclusive;
        let subscription = self
            .subscription_name
            .unwrap_or_else(|| random_name(&self.subscription_role_prefix));
        let name = self.name.unwrap_or_else(|| random_name("reader"));
        SubscriptionSpec::new(
            self.topic,
            subscription,
            name,
            false,
            StartPosition {
                id: start,
                inclusive,
            },
            inclusive,
            self.settings,
            operation_timeout,
        )
    }
}

settings_setters!(ReaderOptions);

/// Sequential reader over every partition of a topic.
#[derive(Debug)]
pub struct Reader {
    consumer: MultiPartitionConsumer,
}

impl Reader {
    pub(crate) fn new(consumer: MultiPartitionConsumer) -> Self { Self { consumer } }

    /// Topic being read.
    #[must_use]
    pub fn topic(&self) -> &str { self.consumer.topic() }

    /// Name of the reader's subscription.
    #[must_use]
    pub fn subscription(&self) -> &str { self.consumer.subscription() }

    /// Whether [`Reader::close`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.consumer.is_closed() }

    /// Whether another message can be read.
    pub async fn has_next(&mut self) -> bool { self.consumer.has_next().await }

    /// Wait for the next message.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Closed`] immediately after close.
    pub async fn next(&mut self) -> Result<Message> { self.consumer.receive().await }

    /// [`Reader::next`] bounded by `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Timeout`] when nothing arrives in time.
    pub async fn next_timeout(&mut self, limit: Duration) -> Result<Message> {
        self.consumer.receive_timeout(limit).await
    }

    /// [`Reader::next`] that gives up when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Cancelled`] on cancellation.
    pub async fn next_cancellable(&mut self, cancel: &CancellationToken) -> Result<Message> {
        self.consumer.receive_cancellable(cancel).await
    }

    /// Reposition at `id`; inclusive when the reader was created inclusive.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::AmbiguousOperation`] on a partitioned topic.
    pub async fn seek<I>(&mut self, id: &I) -> Result<()>
    where
        I: MessageIdentifier + ?Sized,
    {
        self.consumer.seek(id).await
    }

    /// Reposition every partition at the first message published at or
    /// after `time`.
    ///
    /// # Errors
    ///
    /// Returns the first partition failure.
    pub async fn seek_by_time(&mut self, time: SystemTime) -> Result<()> {
        self.consumer.seek_by_time(time).await
    }

    /// Last message id of a single-partition topic.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::AmbiguousOperation`] on a partitioned topic.
    pub async fn get_last_message_id(&self) -> Result<MessageId> {
        self.consumer.get_last_message_id().await
    }

    /// Last message id of every partition.
    ///
    /// # Errors
    ///
    /// Returns the first partition failure.
    pub async fn last_message_ids(&self) -> Result<Vec<MessageId>> {
        self.consumer.last_message_ids().await
    }

    /// Close the reader.
    pub async fn close(&mut self) { self.consumer.close().await; }
}
