//! Test support for `sublink`.
//!
//! Fixtures build a [`MemoryBroker`](sublink::memory::MemoryBroker) and a
//! [`Client`](sublink::Client) bound to it; the helpers publish numbered
//! payloads and drain readers with a deadline so a stuck test fails instead
//! of hanging.
//!
//! ```rust
//! use sublink::memory::MemoryBroker;
//! use sublink_testing::{client_for, publish};
//!
//! # async fn example() {
//! let broker = MemoryBroker::new();
//! let ids = publish(&broker, "orders", 3).await;
//! let client = client_for(&broker);
//! # let _ = (ids, client);
//! # }
//! ```

pub mod fixtures;
pub mod logging;
pub mod metrics;

pub use fixtures::{
    RECEIVE_DEADLINE,
    broker,
    client_for,
    drain,
    payload_text,
    publish,
    publish_batch,
};
pub use logging::{LoggerHandle, logger};
pub use metrics::{counter_value, gauge_value};
