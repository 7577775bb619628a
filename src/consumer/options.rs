//! Subscription options shared by readers and consumers.

use std::{fmt, sync::Arc, time::Duration};

use rand::Rng;

use crate::{
    backoff::{BackoffConfig, BackoffFactory},
    chunk::{
        ChunkConfig,
        config::{DEFAULT_EXPIRE_TIME_OF_INCOMPLETE_CHUNK, DEFAULT_MAX_PENDING_CHUNKED_MESSAGE},
    },
    crypto::{CryptoFailureAction, PayloadDecryptor},
    error::{ConsumerError, Result},
    message_id::MessageId,
    schema::SchemaInfo,
    session::SessionConfig,
    transport::StartPosition,
};

/// Default number of messages a session may have outstanding.
pub const DEFAULT_RECEIVER_QUEUE_SIZE: u32 = 1000;

/// Delivery tuning common to readers and consumers.
///
/// # Default Values
/// - `receiver_queue_size`: 1000
/// - `max_pending_chunked_message`: 100
/// - `expire_time_of_incomplete_chunk`: 60 seconds
/// - `auto_ack_incomplete_chunk`: `false`
/// - `backoff_policy`: exponential, 100 ms to 60 s
/// - `max_reconnect_to_broker`: unlimited
/// - `crypto_failure_action`: [`CryptoFailureAction::Fail`]
#[derive(Clone)]
pub struct SubscriptionSettings {
    /// Permits granted to the broker per partition. Zero selects the default.
    pub receiver_queue_size: u32,
    /// Cap on incomplete chunked messages per partition. Zero selects the
    /// default.
    pub max_pending_chunked_message: usize,
    /// Age after which an incomplete chunked message is dropped.
    pub expire_time_of_incomplete_chunk: Duration,
    /// Acknowledge the chunks of dropped incomplete messages.
    pub auto_ack_incomplete_chunk: bool,
    /// Reconnect delay policy; `None` uses [`BackoffConfig::default`].
    pub backoff_policy: Option<BackoffFactory>,
    /// Consecutive failed reconnects before a partition gives up.
    pub max_reconnect_to_broker: Option<u32>,
    /// Decrypts encrypted payloads.
    pub decryptor: Option<Arc<dyn PayloadDecryptor>>,
    /// Handling of payloads that cannot be decrypted.
    pub crypto_failure_action: CryptoFailureAction,
    /// Schema the topic's payloads are expected to follow.
    pub schema: Option<SchemaInfo>,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            receiver_queue_size: DEFAULT_RECEIVER_QUEUE_SIZE,
            max_pending_chunked_message: DEFAULT_MAX_PENDING_CHUNKED_MESSAGE,
            expire_time_of_incomplete_chunk: DEFAULT_EXPIRE_TIME_OF_INCOMPLETE_CHUNK,
            auto_ack_incomplete_chunk: false,
            backoff_policy: None,
            max_reconnect_to_broker: None,
            decryptor: None,
            crypto_failure_action: CryptoFailureAction::Fail,
            schema: None,
        }
    }
}

impl fmt::Debug for SubscriptionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSettings")
            .field("receiver_queue_size", &self.receiver_queue_size)
            .field(
                "max_pending_chunked_message",
                &self.max_pending_chunked_message,
            )
            .field(
                "expire_time_of_incomplete_chunk",
                &self.expire_time_of_incomplete_chunk,
            )
            .field("auto_ack_incomplete_chunk", &self.auto_ack_incomplete_chunk)
            .field(
                "backoff_policy",
                &self.backoff_policy.as_ref().map(|_| "Some(<factory>)"),
            )
            .field("max_reconnect_to_broker", &self.max_reconnect_to_broker)
            .field(
                "decryptor",
                &self.decryptor.as_ref().map(|_| "Some(<decryptor>)"),
            )
            .field("crypto_failure_action", &self.crypto_failure_action)
            .field("schema", &self.schema)
            .finish()
    }
}

impl SubscriptionSettings {
    /// Permits granted to the broker per partition.
    #[must_use]
    pub fn receiver_queue_size(mut self, size: u32) -> Self {
        self.receiver_queue_size = size;
        self
    }

    /// Cap on incomplete chunked messages per partition.
    #[must_use]
    pub fn max_pending_chunked_message(mut self, limit: usize) -> Self {
        self.max_pending_chunked_message = limit;
        self
    }

    /// Age after which an incomplete chunked message is dropped.
    #[must_use]
    pub fn expire_time_of_incomplete_chunk(mut self, expiry: Duration) -> Self {
        self.expire_time_of_incomplete_chunk = expiry;
        self
    }

    /// Acknowledge the chunks of dropped incomplete messages.
    #[must_use]
    pub fn auto_ack_incomplete_chunk(mut self, enabled: bool) -> Self {
        self.auto_ack_incomplete_chunk = enabled;
        self
    }

    /// Reconnect delay policy.
    #[must_use]
    pub fn backoff_policy(mut self, factory: BackoffFactory) -> Self {
        self.backoff_policy = Some(factory);
        self
    }

    /// Consecutive failed reconnects tolerated per partition.
    #[must_use]
    pub fn max_reconnect_to_broker(mut self, limit: u32) -> Self {
        self.max_reconnect_to_broker = Some(limit);
        self
    }

    /// Decryptor for encrypted payloads.
    #[must_use]
    pub fn decryptor(mut self, decryptor: Arc<dyn PayloadDecryptor>) -> Self {
        self.decryptor = Some(decryptor);
        self
    }

    /// Handling of payloads that cannot be decrypted.
    #[must_use]
    pub fn crypto_failure_action(mut self, action: CryptoFailureAction) -> Self {
        self.crypto_failure_action = action;
        self
    }

    /// Expected schema, validated when the subscription is created.
    #[must_use]
    pub fn schema(mut self, schema: SchemaInfo) -> Self {
        self.schema = Some(schema);
        self
    }

    fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            max_pending_chunked_message: self.max_pending_chunked_message,
            expire_time_of_incomplete_chunk: self.expire_time_of_incomplete_chunk,
            auto_ack_incomplete_chunk: self.auto_ack_incomplete_chunk,
        }
        .normalized()
    }
}

/// Delegating setters for option types embedding [`SubscriptionSettings`].
macro_rules! settings_setters {
    ($options:ty) => {
        impl $options {
            /// Replace every delivery setting at once.
            #[must_use]
            pub fn settings(mut self, settings: $crate::consumer::SubscriptionSettings) -> Self {
                self.settings = settings;
                self
            }

            /// Permits granted to the broker per partition.
            #[must_use]
            pub fn receiver_queue_size(mut self, size: u32) -> Self {
                self.settings = self.settings.receiver_queue_size(size);
                self
            }

            /// Cap on incomplete chunked messages per partition.
            #[must_use]
            pub fn max_pending_chunked_message(mut self, limit: usize) -> Self {
                self.settings = self.settings.max_pending_chunked_message(limit);
                self
            }

            /// Age after which an incomplete chunked message is dropped.
            #[must_use]
            pub fn expire_time_of_incomplete_chunk(mut self, expiry: ::std::time::Duration) -> Self {
                self.settings = self.settings.expire_time_of_incomplete_chunk(expiry);
                self
            }

            /// Acknowledge the chunks of dropped incomplete messages.
            #[must_use]
            pub fn auto_ack_incomplete_chunk(mut self, enabled: bool) -> Self {
                self.settings = self.settings.auto_ack_incomplete_chunk(enabled);
                self
            }

            /// Reconnect delay policy.
            #[must_use]
            pub fn backoff_policy(mut self, factory: $crate::backoff::BackoffFactory) -> Self {
                self.settings = self.settings.backoff_policy(factory);
                self
            }

            /// Consecutive failed reconnects tolerated per partition.
            #[must_use]
            pub fn max_reconnect_to_broker(mut self, limit: u32) -> Self {
                self.settings = self.settings.max_reconnect_to_broker(limit);
                self
            }

            /// Decryptor for encrypted payloads.
            #[must_use]
            pub fn decryptor(
                mut self,
                decryptor: ::std::sync::Arc<dyn $crate::crypto::PayloadDecryptor>,
            ) -> Self {
                self.settings = self.settings.decryptor(decryptor);
                self
            }

            /// Handling of payloads that cannot be decrypted.
            #[must_use]
            pub fn crypto_failure_action(mut self, action: $crate::crypto::CryptoFailureAction) -> Self {
                self.settings = self.settings.crypto_failure_action(action);
                self
            }

            /// Expected schema, validated when the subscription is created.
            #[must_use]
            pub fn schema(mut self, schema: $crate::schema::SchemaInfo) -> Self {
                self.settings = self.settings.schema(schema);
                self
            }
        }
    };
}

pub(crate) use settings_setters;

/// Where a new durable subscription starts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SubscriptionInitialPosition {
    /// Oldest retained message.
    Earliest,
    /// Next message published after subscribing.
    #[default]
    Latest,
}

impl SubscriptionInitialPosition {
    pub(crate) const fn start(self) -> StartPosition {
        match self {
            Self::Earliest => StartPosition::at(MessageId::earliest()),
            Self::Latest => StartPosition::after(MessageId::latest()),
        }
    }
}

/// Options for [`Client::create_consumer`](crate::client::Client::create_consumer).
#[derive(Clone, Debug)]
pub struct ConsumerOptions {
    /// Topic to subscribe to.
    pub topic: String,
    /// Durable subscription name; required.
    pub subscription_name: String,
    /// Consumer name; generated when unset.
    pub name: Option<String>,
    /// Start of a new subscription.
    pub subscription_initial_position: SubscriptionInitialPosition,
    /// Delivery tuning.
    pub settings: SubscriptionSettings,
}

impl ConsumerOptions {
    /// Options for `subscription_name` on `topic`.
    #[must_use]
    pub fn new(topic: impl Into<String>, subscription_name: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            subscription_name: subscription_name.into(),
            name: None,
            subscription_initial_position: SubscriptionInitialPosition::default(),
            settings: SubscriptionSettings::default(),
        }
    }

    /// Consumer name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Start of a new subscription.
    #[must_use]
    pub fn subscription_initial_position(mut self, position: SubscriptionInitialPosition) -> Self {
        self.subscription_initial_position = position;
        self
    }

    pub(crate) fn into_spec(self, operation_timeout: Duration) -> Result<SubscriptionSpec> {
        if self.subscription_name.trim().is_empty() {
            return Err(ConsumerError::Validation(
                "subscription name is required".into(),
            ));
        }
        let consumer_name = self
            .name
            .unwrap_or_else(|| random_name("consumer"));
        SubscriptionSpec::new(
            self.topic,
            self.subscription_name,
            consumer_name,
            true,
            self.subscription_initial_position.start(),
            true,
            self.settings,
            operation_timeout,
        )
    }
}

settings_setters!(ConsumerOptions);

/// Validated subscription, ready to be split into partition sessions.
#[derive(Clone, Debug)]
pub(crate) struct SubscriptionSpec {
    pub(crate) topic: String,
    pub(crate) subscription: String,
    pub(crate) consumer_name: String,
    pub(crate) durable: bool,
    pub(crate) start: StartPosition,
    pub(crate) seek_inclusive: bool,
    pub(crate) settings: SubscriptionSettings,
    pub(crate) operation_timeout: Duration,
}

impl SubscriptionSpec {
    #[expect(
        clippy::too_many_arguments,
        reason = "readers and consumers each fill every field from their options"
    )]
    pub(crate) fn new(
        topic: String,
        subscription: String,
        consumer_name: String,
        durable: bool,
        start: StartPosition,
        seek_inclusive: bool,
        mut settings: SubscriptionSettings,
        operation_timeout: Duration,
    ) -> Result<Self> {
        if topic.trim().is_empty() {
            return Err(ConsumerError::Validation("topic is required".into()));
        }
        if let Some(schema) = settings.schema.as_ref() {
            schema.validate()?;
        }
        if settings.receiver_queue_size == 0 {
            settings.receiver_queue_size = DEFAULT_RECEIVER_QUEUE_SIZE;
        }
        Ok(Self {
            topic,
            subscription,
            consumer_name,
            durable,
            start,
            seek_inclusive,
            settings,
            operation_timeout,
        })
    }

    /// Session configuration for one partition.
    pub(crate) fn session_config(&self, topic: String, partition_index: i32) -> SessionConfig {
        SessionConfig {
            topic,
            partition_index,
            subscription: self.subscription.clone(),
            consumer_name: self.consumer_name.clone(),
            durable: self.durable,
            start: self.start,
            seek_inclusive: self.seek_inclusive,
            receiver_queue_size: self.settings.receiver_queue_size,
            chunk: self.settings.chunk_config(),
            operation_timeout: self.operation_timeout,
            backoff: self
                .settings
                .backoff_policy
                .clone()
                .unwrap_or_else(|| BackoffConfig::default().factory()),
            max_reconnect_to_broker: self.settings.max_reconnect_to_broker,
            decryptor: self.settings.decryptor.clone(),
            crypto_failure_action: self.settings.crypto_failure_action,
        }
    }
}

/// `"{prefix}-{5 hex digits}"`.
pub(crate) fn random_name(prefix: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x10_0000);
    format!("{prefix}-{suffix:05x}")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::{ConsumerOptions, DEFAULT_RECEIVER_QUEUE_SIZE, SubscriptionInitialPosition, random_name};
    use crate::{
        error::ConsumerError,
        message_id::MessageId,
        schema::{SchemaInfo, SchemaType},
    };

    const TIMEOUT: Duration = Duration::from_secs(30);

    #[test]
    fn random_names_carry_five_hex_digits() {
        let name = random_name("reader");
        let suffix = name.strip_prefix("reader-").expect("prefix");
        assert_eq!(suffix.len(), 5);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[rstest]
    #[case("", "sub")]
    #[case("topic", " ")]
    fn missing_names_are_rejected(#[case] topic: &str, #[case] subscription: &str) {
        let result = ConsumerOptions::new(topic, subscription).into_spec(TIMEOUT);
        assert!(matches!(result, Err(ConsumerError::Validation(_))));
    }

    #[test]
    fn invalid_schema_is_rejected() {
        let options = ConsumerOptions::new("topic", "sub")
            .schema(SchemaInfo::new(SchemaType::Json).with_definition("not json"));
        assert!(matches!(
            options.into_spec(TIMEOUT),
            Err(ConsumerError::Schema(_))
        ));
    }

    #[test]
    fn zero_limits_fall_back_to_defaults() {
        let spec = ConsumerOptions::new("topic", "sub")
            .receiver_queue_size(0)
            .max_pending_chunked_message(0)
            .into_spec(TIMEOUT)
            .expect("valid options");
        let config = spec.session_config("topic".into(), -1);
        assert_eq!(config.receiver_queue_size, DEFAULT_RECEIVER_QUEUE_SIZE);
        assert_eq!(config.chunk.max_pending_chunked_message, 100);
        assert!(config.durable);
    }

    #[rstest]
    #[case(SubscriptionInitialPosition::Earliest, MessageId::earliest())]
    #[case(SubscriptionInitialPosition::Latest, MessageId::latest())]
    fn initial_position_maps_to_sentinel(
        #[case] position: SubscriptionInitialPosition,
        #[case] expected: MessageId,
    ) {
        assert_eq!(position.start().id, expected);
    }
}
