//! Drive client error types.

use thiserror::Error;

/// Drive API errors.
#[derive(Debug, Error)]
pub enum DriveError {
    /// The video info response carried no session cookie.
    #[error("no session token returned for {item_id}")]
    MissingSessionToken { item_id: String },

    /// The video info status field signalled failure or was absent.
    #[error("upstream rejected {item_id}: {reason}")]
    UpstreamRejected { item_id: String, reason: String },

    #[error("malformed stream map entry: {0}")]
    MalformedStreamMap(String),

    /// Non-success HTTP status.
    #[error("drive API error (status {status_code}): {message}")]
    Api { status_code: u16, message: String },

    #[error("failed to parse drive response: {0}")]
    Parse(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid drive configuration: {0}")]
    Config(String),
}

impl DriveError {
    /// Whether the request may succeed when repeated.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Api { status_code, .. } => *status_code == 429 || *status_code >= 500,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Result type for drive operations.
pub type DriveResult<T> = std::result::Result<T, DriveError>;
