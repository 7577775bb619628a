//! Reconnect delay policies.
//!
//! A [`BackoffPolicy`] yields the delay a session waits before each
//! reconnect attempt. Policies are plain state machines with no I/O so
//! their schedule can be checked by calling them directly.

use std::{sync::Arc, time::Duration};

/// Delay schedule between reconnect attempts.
pub trait BackoffPolicy: Send {
    /// Delay to wait before the next attempt. Called once per failed attempt.
    fn next_delay(&mut self) -> Duration;

    /// Restart the schedule after a successful connection.
    fn reset(&mut self);

    /// Whether the schedule has reached its ceiling.
    fn is_max_backoff_reached(&self) -> bool;
}

/// Builds a fresh policy for every session.
pub type BackoffFactory = Arc<dyn Fn() -> Box<dyn BackoffPolicy> + Send + Sync>;

/// Bounds for [`ExponentialBackoff`].
///
/// # Default Values
/// - `initial_delay`: 100 milliseconds
/// - `max_delay`: 60 seconds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay returned by the first call after a reset.
    pub initial_delay: Duration,
    /// Ceiling the delay is clamped to.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl BackoffConfig {
    /// Clamp delays to at least one millisecond and ensure
    /// `initial_delay <= max_delay`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use sublink::backoff::BackoffConfig;
    ///
    /// let cfg = BackoffConfig {
    ///     initial_delay: Duration::from_secs(4),
    ///     max_delay: Duration::from_secs(1),
    /// };
    ///
    /// let normalized = cfg.normalized();
    /// assert_eq!(normalized.initial_delay, Duration::from_secs(1));
    /// assert_eq!(normalized.max_delay, Duration::from_secs(4));
    /// ```
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.initial_delay = self.initial_delay.max(Duration::from_millis(1));
        self.max_delay = self.max_delay.max(Duration::from_millis(1));
        if self.initial_delay > self.max_delay {
            std::mem::swap(&mut self.initial_delay, &mut self.max_delay);
        }
        self
    }

    /// Factory producing an [`ExponentialBackoff`] with these bounds.
    #[must_use]
    pub fn factory(self) -> BackoffFactory {
        Arc::new(move || Box::new(ExponentialBackoff::new(self)) as Box<dyn BackoffPolicy>)
    }
}

/// Doubling backoff clamped to `[initial_delay, max_delay]`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use sublink::backoff::{BackoffConfig, BackoffPolicy, ExponentialBackoff};
///
/// let mut backoff = ExponentialBackoff::new(BackoffConfig {
///     initial_delay: Duration::from_secs(1),
///     max_delay: Duration::from_secs(4),
/// });
/// let delays: Vec<_> = (0..4).map(|_| backoff.next_delay().as_secs()).collect();
/// assert_eq!(delays, [1, 2, 4, 4]);
/// ```
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current: Duration,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Create a policy from normalised bounds.
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config: config.normalized(),
            current: Duration::ZERO,
            attempt: 0,
        }
    }

    /// Number of delays handed out since the last reset.
    #[must_use]
    pub fn attempt(&self) -> u32 { self.attempt }
}

impl Default for ExponentialBackoff {
    fn default() -> Self { Self::new(BackoffConfig::default()) }
}

impl BackoffPolicy for ExponentialBackoff {
    fn next_delay(&mut self) -> Duration {
        let doubled = self.current.saturating_mul(2);
        self.current = doubled.clamp(self.config.initial_delay, self.config.max_delay);
        self.attempt = self.attempt.saturating_add(1);
        self.current
    }

    fn reset(&mut self) {
        self.current = Duration::ZERO;
        self.attempt = 0;
    }

    fn is_max_backoff_reached(&self) -> bool { self.current == self.config.max_delay }
}
