//! Worker error taxonomy.

use ferry_core::CredentialKey;
use ferry_drive::DriveError;
use ferry_metadata::MetadataError;
use ferry_queue::{HandlerOutcome, QueueError};
use ferry_storage::StorageError;
use std::time::Duration;

/// Delay before redelivering a message that failed on a persistence error.
pub const PERSISTENCE_BACKOFF: Duration = Duration::from_secs(5);

/// Errors raised while handling a message.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Bad input. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No leasable credential right now.
    #[error("no leasable credential for {0}")]
    QuotaExhausted(CredentialKey),

    /// The remote API failed or rejected the request.
    #[error("upstream error: {0}")]
    Upstream(#[from] DriveError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// Map onto a consumer outcome. `quota_backoff` is the delay used when no
    /// credential could be leased or the remote API is temporarily failing.
    pub fn outcome(&self, quota_backoff: Duration) -> HandlerOutcome {
        match self {
            Self::Upstream(e) if e.is_transient() => {
                HandlerOutcome::retry(self.to_string(), quota_backoff)
            }
            Self::Validation(_) | Self::Upstream(_) => HandlerOutcome::fatal(self.to_string()),
            Self::Metadata(MetadataError::NotFound(_)) => HandlerOutcome::fatal(self.to_string()),
            Self::QuotaExhausted(_) => HandlerOutcome::retry(self.to_string(), quota_backoff),
            Self::Queue(e) if !e.is_transient() => HandlerOutcome::fatal(self.to_string()),
            Self::Metadata(_) | Self::Storage(_) | Self::Queue(_) | Self::Io(_) => {
                HandlerOutcome::retry(self.to_string(), PERSISTENCE_BACKOFF)
            }
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::QuotaExhausted(_) => "quota_exhausted",
            Self::Upstream(_) => "upstream",
            Self::Metadata(_) => "metadata",
            Self::Storage(_) => "storage",
            Self::Queue(_) => "queue",
            Self::Io(_) => "io",
        }
    }
}

/// Result type for worker operations.
pub type WorkerResult<T> = std::result::Result<T, WorkerError>;
