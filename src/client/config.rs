//! Client-wide settings.

use std::time::Duration;

/// Default bound on control requests and transport calls.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings shared by every reader and consumer of a [`Client`](super::Client).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use sublink::client::ClientConfig;
///
/// let config = ClientConfig::default().operation_timeout(Duration::ZERO);
/// assert_eq!(config.normalized(), ClientConfig::default());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    operation_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Bound on control requests, lookups and subscribe handshakes.
    #[must_use]
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Configured operation timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration { self.operation_timeout }

    /// Replace a zero timeout with the default.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.operation_timeout.is_zero() {
            self.operation_timeout = DEFAULT_OPERATION_TIMEOUT;
        }
        self
    }
}
