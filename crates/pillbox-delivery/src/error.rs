use std::time::Duration;

use thiserror::Error;

/// Outcome classes a [`Notifier`](crate::Notifier) reports for a failed send.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Worth retrying: timeouts, network hiccups, upstream 5xx.
    #[error("transient: {0}")]
    Transient(String),

    /// Upstream asked us to slow down; retry no sooner than `retry_after`.
    #[error("throttled, retry after {retry_after:?}")]
    Throttled { retry_after: Duration },

    /// Retrying cannot help: blocked bot, unknown chat, malformed message.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, DeliveryError::Permanent(_))
    }

    /// Minimum wait the upstream requested, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            DeliveryError::Throttled { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}
