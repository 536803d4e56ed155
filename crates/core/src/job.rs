//! Extraction job lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Extraction job status.
///
/// Transitions: `pending -> extracting -> finished | error`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Pending,
    Extracting,
    Finished,
    Error,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Finished => "finished",
            Self::Error => "error",
        }
    }

    /// Check if the job reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "extracting" => Ok(Self::Extracting),
            "finished" => Ok(Self::Finished),
            "error" => Ok(Self::Error),
            other => Err(crate::Error::UnknownValue {
                kind: "extraction status",
                value: other.to_string(),
            }),
        }
    }
}

/// One export request for a remote folder tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionJob {
    pub id: i64,
    pub root_id: String,
    pub owner_id: i64,
    pub total_items: i64,
    pub status: ExtractionStatus,
}

impl ExtractionJob {
    /// Blob key under which the completed job log is stored.
    pub fn log_key(&self) -> String {
        log_key(&self.root_id, self.id)
    }
}

/// Blob key for a job log: `{root_id}_{job_id}`.
pub fn log_key(root_id: &str, job_id: i64) -> String {
    format!("{root_id}_{job_id}")
}
