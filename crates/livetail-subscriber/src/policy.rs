//! Reconnection timing.

use std::time::Duration;

use livetail_core::config::SubscriberConfig;

/// Why a connection ended and another one is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    /// The server closed the connection at its maximum duration.
    Timeout,
    /// Transport failure, error event, or an unexpected end of stream.
    Error,
}

/// Backoff reconnection policy.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay after an error before the first reconnect attempt.
    pub error_delay: Duration,
    /// Delay after a server-side timeout. Timeouts never count as failures.
    pub timeout_delay: Duration,
    /// Multiplier applied to the error delay after each consecutive failure.
    pub multiplier: f64,
    /// Maximum delay between error reconnect attempts.
    pub max_delay: Duration,
    /// Maximum number of consecutive failed attempts (None = unlimited).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            error_delay: Duration::from_secs(5),
            timeout_delay: Duration::from_secs(1),
            multiplier: 1.0,
            max_delay: Duration::from_secs(60),
            max_attempts: None,
        }
    }
}

impl From<&SubscriberConfig> for ReconnectPolicy {
    fn from(config: &SubscriberConfig) -> Self {
        Self {
            error_delay: Duration::from_millis(config.error_reconnect_ms),
            timeout_delay: Duration::from_millis(config.timeout_reconnect_ms),
            ..Self::default()
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnecting. `attempt` counts consecutive failures
    /// (0-indexed) and only affects error reconnects.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for(&self, reason: ReconnectReason, attempt: u32) -> Duration {
        match reason {
            ReconnectReason::Timeout => self.timeout_delay,
            ReconnectReason::Error => {
                let base_ms = self.error_delay.as_millis() as f64;
                let delay_ms = base_ms * self.multiplier.powi(attempt.min(64) as i32);
                let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
                Duration::from_millis(capped_ms as u64)
            }
        }
    }

    /// Whether another attempt should be made after `attempt` consecutive
    /// failures.
    pub const fn should_retry(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}
