//! Queue error types.

use thiserror::Error;

/// Queue operation errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The connection dropped. Unacknowledged deliveries will be redelivered.
    #[error("connection lost")]
    ConnectionLost,

    #[error("broker closed")]
    Closed,

    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    #[error("no queue bound to routing key {0}")]
    Unroutable(String),

    #[error("unknown delivery tag: {0}")]
    UnknownDeliveryTag(u64),

    #[error("message error: {0}")]
    Message(#[from] ferry_core::Error),

    #[error("broker error: {0}")]
    Backend(String),
}

impl QueueError {
    /// Whether reconnecting may resolve the error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionLost | Self::Backend(_))
    }
}

/// Result type for queue operations.
pub type QueueResult<T> = std::result::Result<T, QueueError>;
