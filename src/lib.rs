//! Client-side engine for reading partitioned pub/sub topics.
//!
//! `sublink` turns the frames a broker pushes for each partition into one
//! ordered stream of [`Message`]s. A [`Client`] subscribes every partition
//! of a topic through a [`transport::Transport`], runs a
//! [`session::PartitionSession`] per partition to handle flow control,
//! reconnects, chunk reassembly and decryption, and merges their output in
//! a [`MultiPartitionConsumer`]. [`Reader`] is the non-durable, read-only
//! view most applications start with.
//!
//! [`memory::MemoryBroker`] implements the transport in process and backs
//! the tests and the bundled demo binary.

pub mod backoff;
pub mod chunk;
pub mod client;
pub mod consumer;
pub mod crypto;
pub mod error;
pub mod lookup;
pub mod memory;
pub mod message;
pub mod message_id;
pub mod metrics;
pub mod reader;
pub mod schema;
pub mod session;
pub mod transport;

pub use client::{Client, ClientBuilder, ClientConfig};
pub use consumer::{
    ConsumerOptions,
    MultiPartitionConsumer,
    SubscriptionInitialPosition,
    SubscriptionSettings,
};
pub use error::{ConsumerError, ErrorKind, Result};
pub use message::Message;
pub use message_id::{MessageId, MessageIdentifier};
pub use reader::{Reader, ReaderOptions};
